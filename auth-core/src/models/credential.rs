//! Credential model - password hash storage, isolated from profile data.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Credential entity. At most one live row per user; updates replace the
/// hash and stamp `updated_utc` in the same statement.
#[derive(Debug, Clone, FromRow)]
pub struct Credential {
    pub user_id: Uuid,
    pub password_hash: String,
    pub updated_utc: DateTime<Utc>,
}

impl Credential {
    pub fn new(user_id: Uuid, password_hash: String, updated_utc: DateTime<Utc>) -> Self {
        Self {
            user_id,
            password_hash,
            updated_utc,
        }
    }
}
