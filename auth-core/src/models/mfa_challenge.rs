//! MFA challenge model - attempt-bounded one-time-code exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Delivery channel codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaChannel {
    Email,
    Totp,
    Backup,
}

impl MfaChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaChannel::Email => "email",
            MfaChannel::Totp => "totp",
            MfaChannel::Backup => "backup",
        }
    }
}

/// MFA challenge entity. `challenge_token` is the opaque handle handed to the
/// client; the code itself is only stored as a hash.
#[derive(Debug, Clone, FromRow)]
pub struct MfaChallenge {
    pub challenge_token: String,
    pub user_id: Uuid,
    pub code_hash: String,
    pub channel_code: String,
    pub expiry_utc: DateTime<Utc>,
    pub attempt_count: i32,
    pub verified_utc: Option<DateTime<Utc>>,
    pub last_sent_utc: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl MfaChallenge {
    /// Create a new pending challenge.
    pub fn new(
        challenge_token: String,
        user_id: Uuid,
        code_hash: String,
        channel: MfaChannel,
        created_utc: DateTime<Utc>,
        expiry_utc: DateTime<Utc>,
        client_ip: Option<String>,
    ) -> Self {
        Self {
            challenge_token,
            user_id,
            code_hash,
            channel_code: channel.as_str().to_string(),
            expiry_utc,
            attempt_count: 0,
            verified_utc: None,
            last_sent_utc: created_utc,
            client_ip,
            created_utc,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verified_utc.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }

    pub fn attempts_exhausted(&self, max_attempts: i32) -> bool {
        self.attempt_count >= max_attempts
    }

    /// Pending means the challenge can still be verified or resent.
    pub fn is_pending(&self, now: DateTime<Utc>, max_attempts: i32) -> bool {
        !self.is_verified() && !self.is_expired(now) && !self.attempts_exhausted(max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn challenge_at(now: DateTime<Utc>) -> MfaChallenge {
        MfaChallenge::new(
            "handle".to_string(),
            Uuid::new_v4(),
            "code-hash".to_string(),
            MfaChannel::Email,
            now,
            now + Duration::minutes(5),
            None,
        )
    }

    #[test]
    fn fresh_challenge_is_pending() {
        let now = Utc::now();
        assert!(challenge_at(now).is_pending(now, 5));
    }

    #[test]
    fn expiry_ends_the_challenge() {
        let now = Utc::now();
        let challenge = challenge_at(now);
        assert!(!challenge.is_pending(now + Duration::minutes(6), 5));
    }

    #[test]
    fn attempt_cap_ends_the_challenge() {
        let now = Utc::now();
        let mut challenge = challenge_at(now);
        challenge.attempt_count = 5;
        assert!(challenge.attempts_exhausted(5));
        assert!(!challenge.is_pending(now, 5));
    }

    #[test]
    fn verification_is_terminal() {
        let now = Utc::now();
        let mut challenge = challenge_at(now);
        challenge.verified_utc = Some(now);
        assert!(!challenge.is_pending(now, 5));
    }
}
