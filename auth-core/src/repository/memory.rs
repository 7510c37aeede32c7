//! In-memory stores for deterministic tests.
//!
//! Each store serializes mutations behind one `RwLock`, so the conditional
//! transitions (revoke-if-active, mark-used-if-unused, attempt increments)
//! are atomic exactly like their single-statement SQL counterparts.

use super::{
    CredentialRepository, MfaChallengeRepository, RefreshTokenRepository, SingleUseTokenStore,
    UserRepository,
};
use crate::models::{
    AuthUser, Credential, ExternalLogin, MfaChallenge, RefreshToken, SingleUseToken, TokenSubject,
};
use crate::services::error::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory credential store.
#[derive(Default)]
pub struct MemoryCredentialRepository {
    rows: RwLock<HashMap<Uuid, Credential>>,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn get(&self, user_id: Uuid) -> Result<Option<Credential>, ServiceError> {
        Ok(self.rows.read().await.get(&user_id).cloned())
    }

    async fn upsert(&self, credential: &Credential) -> Result<(), ServiceError> {
        self.rows
            .write()
            .await
            .insert(credential.user_id, credential.clone());
        Ok(())
    }
}

/// In-memory refresh token store.
#[derive(Default)]
pub struct MemoryRefreshTokenRepository {
    rows: RwLock<HashMap<Uuid, RefreshToken>>,
}

impl MemoryRefreshTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a token row for test assertions.
    pub async fn get(&self, token_id: Uuid) -> Option<RefreshToken> {
        self.rows.read().await.get(&token_id).cloned()
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryRefreshTokenRepository {
    async fn insert(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        self.rows
            .write()
            .await
            .insert(token.token_id, token.clone());
        Ok(())
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, ServiceError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn revoke_if_active(
        &self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&token_id) {
            Some(token) if token.revoked_utc.is_none() => {
                token.revoked_utc = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut rows = self.rows.write().await;
        let mut revoked = 0;
        for token in rows.values_mut() {
            if token.family_id == family_id && token.revoked_utc.is_none() {
                token.revoked_utc = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut rows = self.rows.write().await;
        let mut revoked = 0;
        for token in rows.values_mut() {
            if token.user_id == user_id && token.revoked_utc.is_none() {
                token.revoked_utc = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn count_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id && t.is_active(now))
            .count() as i64)
    }

    async fn find_oldest_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, ServiceError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id && t.is_active(now))
            .min_by_key(|t| t.issued_utc)
            .cloned())
    }
}

/// In-memory MFA challenge store.
#[derive(Default)]
pub struct MemoryMfaChallengeRepository {
    rows: RwLock<HashMap<String, MfaChallenge>>,
}

impl MemoryMfaChallengeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, challenge_token: &str) -> Option<MfaChallenge> {
        self.rows.read().await.get(challenge_token).cloned()
    }
}

#[async_trait]
impl MfaChallengeRepository for MemoryMfaChallengeRepository {
    async fn insert(&self, challenge: &MfaChallenge) -> Result<(), ServiceError> {
        self.rows
            .write()
            .await
            .insert(challenge.challenge_token.clone(), challenge.clone());
        Ok(())
    }

    async fn find(&self, challenge_token: &str) -> Result<Option<MfaChallenge>, ServiceError> {
        Ok(self.rows.read().await.get(challenge_token).cloned())
    }

    async fn increment_attempts(&self, challenge_token: &str) -> Result<i32, ServiceError> {
        let mut rows = self.rows.write().await;
        let challenge = rows
            .get_mut(challenge_token)
            .ok_or(ServiceError::InvalidCredential)?;
        challenge.attempt_count += 1;
        Ok(challenge.attempt_count)
    }

    async fn mark_verified_if_pending(
        &self,
        challenge_token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(challenge_token) {
            Some(challenge) if challenge.verified_utc.is_none() => {
                challenge.verified_utc = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn replace_code(
        &self,
        challenge_token: &str,
        code_hash: &str,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut rows = self.rows.write().await;
        if let Some(challenge) = rows.get_mut(challenge_token) {
            challenge.code_hash = code_hash.to_string();
            challenge.last_sent_utc = sent_utc;
        }
        Ok(())
    }
}

/// In-memory single-use token store. Tests bind one instance per purpose,
/// mirroring the per-purpose tables of the SQL schema.
#[derive(Default)]
pub struct MemorySingleUseTokenStore {
    rows: RwLock<HashMap<Uuid, SingleUseToken>>,
}

impl MemorySingleUseTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, token_id: Uuid) -> Option<SingleUseToken> {
        self.rows.read().await.get(&token_id).cloned()
    }
}

fn same_subject(token: &SingleUseToken, subject: &TokenSubject) -> bool {
    match subject {
        TokenSubject::User(id) => token.user_id == Some(*id),
        TokenSubject::Email(email) => token.email.as_deref() == Some(email.as_str()),
    }
}

#[async_trait]
impl SingleUseTokenStore for MemorySingleUseTokenStore {
    async fn insert(&self, token: &SingleUseToken) -> Result<(), ServiceError> {
        self.rows
            .write()
            .await
            .insert(token.token_id, token.clone());
        Ok(())
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<SingleUseToken>, ServiceError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn mark_used_if_unused(
        &self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&token_id) {
            Some(token) if token.used_utc.is_none() => {
                token.used_utc = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn invalidate_outstanding(
        &self,
        subject: &TokenSubject,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut rows = self.rows.write().await;
        let mut invalidated = 0;
        for token in rows.values_mut() {
            if same_subject(token, subject) && token.is_outstanding(now) {
                token.expiry_utc = now;
                invalidated += 1;
            }
        }
        Ok(invalidated)
    }
}

/// In-memory user store with test seeding helpers.
#[derive(Default)]
pub struct MemoryUserRepository {
    rows: RwLock<HashMap<Uuid, AuthUser>>,
    external_logins: RwLock<Vec<ExternalLogin>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: AuthUser) {
        self.rows.write().await.insert(user.user_id, user);
    }

    pub async fn add_external_login(&self, login: ExternalLogin) {
        self.external_logins.write().await.push(login);
    }

    /// Snapshot a user row for test assertions.
    pub async fn get(&self, user_id: Uuid) -> Option<AuthUser> {
        self.rows.read().await.get(&user_id).cloned()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<AuthUser>, ServiceError> {
        Ok(self.rows.read().await.get(&user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AuthUser>, ServiceError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn increment_failed_logins(&self, user_id: Uuid) -> Result<i32, ServiceError> {
        let mut rows = self.rows.write().await;
        let user = rows
            .get_mut(&user_id)
            .ok_or(ServiceError::InvalidCredential)?;
        user.failed_login_count += 1;
        Ok(user.failed_login_count)
    }

    async fn set_lockout(
        &self,
        user_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if let Some(user) = self.rows.write().await.get_mut(&user_id) {
            user.lockout_until_utc = Some(until);
        }
        Ok(())
    }

    async fn record_login_success(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        client_ip: Option<&str>,
    ) -> Result<(), ServiceError> {
        if let Some(user) = self.rows.write().await.get_mut(&user_id) {
            user.failed_login_count = 0;
            user.lockout_until_utc = None;
            user.last_login_utc = Some(now);
            user.last_login_ip = client_ip.map(str::to_string);
        }
        Ok(())
    }

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), ServiceError> {
        if let Some(user) = self.rows.write().await.get_mut(&user_id) {
            user.email_verified = true;
        }
        Ok(())
    }

    async fn activate(&self, user_id: Uuid) -> Result<(), ServiceError> {
        if let Some(user) = self.rows.write().await.get_mut(&user_id) {
            user.is_active = true;
        }
        Ok(())
    }

    async fn clear_password_change_requirement(
        &self,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        if let Some(user) = self.rows.write().await.get_mut(&user_id) {
            user.requires_password_change = false;
        }
        Ok(())
    }

    async fn list_external_logins(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ExternalLogin>, ServiceError> {
        Ok(self
            .external_logins
            .read()
            .await
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn remove_external_login(
        &self,
        user_id: Uuid,
        provider: &str,
    ) -> Result<bool, ServiceError> {
        let mut logins = self.external_logins.write().await;
        let before = logins.len();
        logins.retain(|l| !(l.user_id == user_id && l.provider == provider));
        Ok(logins.len() < before)
    }
}
