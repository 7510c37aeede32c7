//! Repository contracts for the authentication core.
//!
//! Engines only ever see these traits; the PostgreSQL adapter lives in
//! `postgres`, the in-memory test stores in `memory`. Every mutation that
//! can race (revocation, consumption, attempt counting) is expressed as a
//! conditional operation whose return value says whether THIS call made the
//! transition — engines branch on that instead of reading then writing.

pub mod memory;
pub mod postgres;

use crate::models::{
    AuthUser, Credential, ExternalLogin, MfaChallenge, RefreshToken, SingleUseToken, TokenSubject,
};
use crate::services::error::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Password-hash storage, one row per user.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<Credential>, ServiceError>;

    /// Create or replace the user's credential in a single statement.
    async fn upsert(&self, credential: &Credential) -> Result<(), ServiceError>;
}

/// Refresh token rows. The engine owns every write path to this entity.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn insert(&self, token: &RefreshToken) -> Result<(), ServiceError>;

    async fn find_by_hash(&self, token_hash: &str)
        -> Result<Option<RefreshToken>, ServiceError>;

    /// Revoke iff the row is not already revoked. Returns true when this
    /// call made the transition; false means someone else got there first.
    async fn revoke_if_active(
        &self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;

    /// Revoke every unrevoked token in a family. Idempotent.
    async fn revoke_family(&self, family_id: Uuid, now: DateTime<Utc>)
        -> Result<u64, ServiceError>;

    /// Revoke every unrevoked token a user holds. Idempotent.
    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;

    async fn count_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError>;

    /// Oldest active token by issue time, for FIFO session eviction.
    async fn find_oldest_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, ServiceError>;
}

/// MFA challenge rows.
#[async_trait]
pub trait MfaChallengeRepository: Send + Sync {
    async fn insert(&self, challenge: &MfaChallenge) -> Result<(), ServiceError>;

    async fn find(&self, challenge_token: &str) -> Result<Option<MfaChallenge>, ServiceError>;

    /// Atomically bump the attempt counter and return the new count.
    async fn increment_attempts(&self, challenge_token: &str) -> Result<i32, ServiceError>;

    /// Mark verified iff still unverified. Returns true when this call
    /// consumed the challenge.
    async fn mark_verified_if_pending(
        &self,
        challenge_token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;

    /// Swap in a fresh code hash on resend and stamp the send time.
    async fn replace_code(
        &self,
        challenge_token: &str,
        code_hash: &str,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), ServiceError>;
}

/// Storage contract for one single-use token table. Password reset, email
/// verification and registration completion each bind their own instance.
#[async_trait]
pub trait SingleUseTokenStore: Send + Sync {
    async fn insert(&self, token: &SingleUseToken) -> Result<(), ServiceError>;

    async fn find_by_hash(&self, token_hash: &str)
        -> Result<Option<SingleUseToken>, ServiceError>;

    /// Mark used iff still unused. Returns true when this call consumed the
    /// token; false means a concurrent consume won.
    async fn mark_used_if_unused(
        &self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;

    /// Expire the subject's outstanding tokens so only the newest issue can
    /// ever be consumed. Returns how many were invalidated.
    async fn invalidate_outstanding(
        &self,
        subject: &TokenSubject,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;
}

/// The auth-visible slice of user accounts. Profile CRUD owns the rest of
/// the row elsewhere.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<AuthUser>, ServiceError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<AuthUser>, ServiceError>;

    /// Atomically bump the failed-login counter and return the new count.
    async fn increment_failed_logins(&self, user_id: Uuid) -> Result<i32, ServiceError>;

    async fn set_lockout(&self, user_id: Uuid, until: DateTime<Utc>)
        -> Result<(), ServiceError>;

    /// Reset failure counters, clear any lockout and stamp the login.
    async fn record_login_success(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        client_ip: Option<&str>,
    ) -> Result<(), ServiceError>;

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), ServiceError>;

    /// Activate the account (registration completion).
    async fn activate(&self, user_id: Uuid) -> Result<(), ServiceError>;

    async fn clear_password_change_requirement(&self, user_id: Uuid)
        -> Result<(), ServiceError>;

    async fn list_external_logins(&self, user_id: Uuid)
        -> Result<Vec<ExternalLogin>, ServiceError>;

    /// Returns true when a link was actually removed.
    async fn remove_external_login(
        &self,
        user_id: Uuid,
        provider: &str,
    ) -> Result<bool, ServiceError>;
}
