//! MFA challenge engine - time-boxed, attempt-bounded one-time codes.
//!
//! Challenge states: Pending -> {Verified, Expired, AttemptsExhausted}, all
//! terminal. The attempt counter moves on every verification call, success
//! or failure, so brute force is bounded no matter what the caller does.

use crate::clock::Clock;
use crate::config::MfaConfig;
use crate::models::{MfaChallenge, MfaChannel};
use crate::repository::MfaChallengeRepository;
use crate::services::error::ServiceError;
use crate::utils::{generate_numeric_code, generate_secure_token, hash_token, verify_token_hash};
use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

/// A challenge handed back to the caller: the opaque handle for the client
/// plus the plaintext code for out-of-band delivery.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub challenge_token: String,
    pub code: String,
    pub expiry_utc: chrono::DateTime<chrono::Utc>,
}

/// Owns every write to the MFA challenge table.
#[derive(Clone)]
pub struct MfaService {
    repo: Arc<dyn MfaChallengeRepository>,
    clock: Arc<dyn Clock>,
    config: MfaConfig,
}

impl MfaService {
    pub fn new(
        repo: Arc<dyn MfaChallengeRepository>,
        clock: Arc<dyn Clock>,
        config: MfaConfig,
    ) -> Self {
        Self {
            repo,
            clock,
            config,
        }
    }

    /// Create a pending challenge for a user. The code goes to the caller
    /// for delivery; only its hash is stored.
    pub async fn create_challenge(
        &self,
        user_id: Uuid,
        channel: MfaChannel,
        client_ip: Option<&str>,
    ) -> Result<IssuedChallenge, ServiceError> {
        let now = self.clock.now();
        let code = generate_numeric_code(self.config.code_length);
        let challenge = MfaChallenge::new(
            generate_secure_token(),
            user_id,
            hash_token(&code),
            channel,
            now,
            now + Duration::minutes(self.config.ttl_minutes),
            client_ip.map(str::to_string),
        );

        self.repo.insert(&challenge).await?;

        tracing::info!(
            user_id = %user_id,
            channel = channel.as_str(),
            "MFA challenge created"
        );

        Ok(IssuedChallenge {
            challenge_token: challenge.challenge_token,
            code,
            expiry_utc: challenge.expiry_utc,
        })
    }

    /// Verify a submitted code against a pending challenge.
    ///
    /// Fails closed on anything unknown or terminal. The attempt counter is
    /// bumped before the code is judged, so even a correct code after the
    /// cap gets `AttemptsExhausted`.
    pub async fn verify_code(
        &self,
        challenge_token: &str,
        submitted_code: &str,
    ) -> Result<Uuid, ServiceError> {
        let now = self.clock.now();
        let challenge = self
            .repo
            .find(challenge_token)
            .await?
            .ok_or(ServiceError::InvalidCredential)?;

        if challenge.is_verified() {
            return Err(ServiceError::InvalidCredential);
        }
        if challenge.is_expired(now) {
            return Err(ServiceError::TokenExpired);
        }

        let attempts = self.repo.increment_attempts(challenge_token).await?;
        if attempts > self.config.max_attempts {
            tracing::warn!(
                user_id = %challenge.user_id,
                attempts,
                "MFA attempts exhausted"
            );
            return Err(ServiceError::AttemptsExhausted);
        }

        if !verify_token_hash(submitted_code, &challenge.code_hash) {
            return Err(ServiceError::InvalidCredential);
        }

        // At most one success per challenge, even under concurrent submits.
        let consumed = self
            .repo
            .mark_verified_if_pending(challenge_token, now)
            .await?;
        if !consumed {
            return Err(ServiceError::InvalidCredential);
        }

        tracing::info!(user_id = %challenge.user_id, "MFA challenge verified");
        Ok(challenge.user_id)
    }

    /// Resend path: put a fresh code under the same handle, subject to a
    /// cooldown between sends. The expiry window does not restart.
    pub async fn refresh_challenge(
        &self,
        challenge_token: &str,
    ) -> Result<IssuedChallenge, ServiceError> {
        let now = self.clock.now();
        let challenge = self
            .repo
            .find(challenge_token)
            .await?
            .ok_or(ServiceError::InvalidCredential)?;

        if challenge.is_expired(now) {
            return Err(ServiceError::TokenExpired);
        }
        if challenge.attempts_exhausted(self.config.max_attempts) {
            return Err(ServiceError::AttemptsExhausted);
        }
        if challenge.is_verified() {
            return Err(ServiceError::InvalidCredential);
        }

        let elapsed = now - challenge.last_sent_utc;
        if elapsed < Duration::seconds(self.config.resend_cooldown_seconds) {
            return Err(ServiceError::Validation(
                "resend cooldown is still active".to_string(),
            ));
        }

        let code = generate_numeric_code(self.config.code_length);
        self.repo
            .replace_code(challenge_token, &hash_token(&code), now)
            .await?;

        tracing::info!(user_id = %challenge.user_id, "MFA challenge code resent");

        Ok(IssuedChallenge {
            challenge_token: challenge.challenge_token,
            code,
            expiry_utc: challenge.expiry_utc,
        })
    }
}
