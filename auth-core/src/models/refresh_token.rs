//! Refresh token model - one row per issued or rotated token.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh token entity. The raw secret is never stored; `token_hash` is its
/// SHA-256 digest. `family_id` tags every token descended from one login so
/// a reuse signal can revoke the whole lineage in one statement.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub client_ip: Option<String>,
}

impl RefreshToken {
    /// Create a new token row for a family.
    pub fn new(
        user_id: Uuid,
        token_hash: String,
        family_id: Uuid,
        issued_utc: DateTime<Utc>,
        expiry_utc: DateTime<Utc>,
        client_ip: Option<String>,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            user_id,
            token_hash,
            family_id,
            issued_utc,
            expiry_utc,
            revoked_utc: None,
            client_ip,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }

    /// Active means neither revoked nor expired; everything else is terminal.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }
}
