//! Refresh token engine - issuance, rotation, reuse detection, revocation.
//!
//! Token states: Active -> {Rotated, Revoked, Expired}, all terminal. Every
//! token descended from one login shares a family id; presenting a token
//! that already left the active state revokes its whole family, which is the
//! defence against stolen-token replay.

use crate::clock::Clock;
use crate::config::RefreshTokenConfig;
use crate::models::RefreshToken;
use crate::repository::RefreshTokenRepository;
use crate::services::audit::{Actor, AuditEvent, AuditSink};
use crate::services::error::ServiceError;
use crate::utils::{generate_secure_token, hash_token};
use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

/// A freshly minted refresh token. `raw_token` is the only copy of the
/// secret that will ever exist; the store keeps its hash.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub raw_token: String,
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub family_id: Uuid,
    pub expiry_utc: chrono::DateTime<chrono::Utc>,
}

/// Owns every write to the refresh token table.
#[derive(Clone)]
pub struct RefreshTokenService {
    repo: Arc<dyn RefreshTokenRepository>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    config: RefreshTokenConfig,
}

impl RefreshTokenService {
    pub fn new(
        repo: Arc<dyn RefreshTokenRepository>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        config: RefreshTokenConfig,
    ) -> Self {
        Self {
            repo,
            clock,
            audit,
            config,
        }
    }

    /// Issue a brand-new token, starting a fresh family.
    ///
    /// Enforces the per-user session cap first: when the user is at the
    /// ceiling, the single oldest active token is revoked (FIFO) so login
    /// never hard-fails on session count.
    pub async fn issue(
        &self,
        user_id: Uuid,
        client_ip: Option<&str>,
        remember_me: bool,
        actor: &Actor,
    ) -> Result<IssuedRefreshToken, ServiceError> {
        let now = self.clock.now();

        let active = self.repo.count_active_for_user(user_id, now).await?;
        if active >= self.config.max_sessions_per_user {
            if let Some(oldest) = self.repo.find_oldest_active_for_user(user_id, now).await? {
                self.repo.revoke_if_active(oldest.token_id, now).await?;

                tracing::info!(
                    user_id = %user_id,
                    token_id = %oldest.token_id,
                    "Evicted oldest session at session cap"
                );
                self.audit
                    .record(
                        AuditEvent::new("session_evicted", *actor, now)
                            .user(user_id)
                            .client_ip(client_ip),
                    )
                    .await;
            }
        }

        let ttl_days = if remember_me {
            self.config.remembered_ttl_days
        } else {
            self.config.ttl_days
        };

        self.mint(user_id, Uuid::new_v4(), ttl_days, client_ip).await
    }

    /// Validate a raw token without mutating anything. Returns the owning
    /// user id; all failures look identical to the caller.
    pub async fn validate(&self, raw_token: &str) -> Result<Uuid, ServiceError> {
        let now = self.clock.now();
        let token = self
            .repo
            .find_by_hash(&hash_token(raw_token))
            .await?
            .ok_or(ServiceError::InvalidCredential)?;

        if !token.is_active(now) {
            return Err(ServiceError::InvalidCredential);
        }

        Ok(token.user_id)
    }

    /// Exchange an active token for its successor in the same family.
    ///
    /// The caller only ever learns "authentication failed"; which of the
    /// failure reasons applied (unknown, expired, replayed) stays internal.
    pub async fn rotate(
        &self,
        raw_token: &str,
        client_ip: Option<&str>,
        actor: &Actor,
    ) -> Result<IssuedRefreshToken, ServiceError> {
        self.rotate_inner(raw_token, client_ip, actor)
            .await
            .map_err(ServiceError::redact)
    }

    async fn rotate_inner(
        &self,
        raw_token: &str,
        client_ip: Option<&str>,
        actor: &Actor,
    ) -> Result<IssuedRefreshToken, ServiceError> {
        let now = self.clock.now();
        let token = self
            .repo
            .find_by_hash(&hash_token(raw_token))
            .await?
            .ok_or(ServiceError::InvalidCredential)?;

        if token.is_expired(now) {
            return Err(ServiceError::TokenExpired);
        }

        if token.is_revoked() {
            // Reuse signal: this token was already rotated or revoked, yet
            // someone is presenting it again. Kill the whole lineage.
            return Err(self.handle_reuse(&token, client_ip, actor).await?);
        }

        // Single conditional transition; two concurrent rotations of the
        // same token cannot both pass this gate.
        let transitioned = self.repo.revoke_if_active(token.token_id, now).await?;
        if !transitioned {
            return Err(self.handle_reuse(&token, client_ip, actor).await?);
        }

        let ttl_days = self.config.ttl_days;
        let issued = self
            .mint(token.user_id, token.family_id, ttl_days, client_ip)
            .await?;

        tracing::debug!(
            user_id = %token.user_id,
            family_id = %token.family_id,
            "Refresh token rotated"
        );

        Ok(issued)
    }

    /// Revoke by raw token (logout). Idempotent: an unknown or already
    /// revoked token reports false, never an error.
    pub async fn revoke(&self, raw_token: &str, actor: &Actor) -> Result<bool, ServiceError> {
        let now = self.clock.now();
        let Some(token) = self.repo.find_by_hash(&hash_token(raw_token)).await? else {
            return Ok(false);
        };

        let revoked = self.repo.revoke_if_active(token.token_id, now).await?;
        if revoked {
            self.audit
                .record(
                    AuditEvent::new("refresh_token_revoked", *actor, now).user(token.user_id),
                )
                .await;
        }

        Ok(revoked)
    }

    /// Revoke every live token in a family. Idempotent.
    pub async fn revoke_family(
        &self,
        family_id: Uuid,
        actor: &Actor,
    ) -> Result<u64, ServiceError> {
        let now = self.clock.now();
        let revoked = self.repo.revoke_family(family_id, now).await?;

        if revoked > 0 {
            tracing::info!(family_id = %family_id, revoked, actor = %actor, "Revoked token family");
        }

        Ok(revoked)
    }

    /// Revoke every live token a user holds. Idempotent.
    pub async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        actor: &Actor,
    ) -> Result<u64, ServiceError> {
        let now = self.clock.now();
        let revoked = self.repo.revoke_all_for_user(user_id, now).await?;

        if revoked > 0 {
            self.audit
                .record(
                    AuditEvent::new("all_sessions_revoked", *actor, now)
                        .user(user_id)
                        .detail(serde_json::json!({ "revoked": revoked })),
                )
                .await;
        }

        Ok(revoked)
    }

    async fn handle_reuse(
        &self,
        token: &RefreshToken,
        client_ip: Option<&str>,
        actor: &Actor,
    ) -> Result<ServiceError, ServiceError> {
        let now = self.clock.now();
        let revoked = self.repo.revoke_family(token.family_id, now).await?;

        tracing::warn!(
            user_id = %token.user_id,
            family_id = %token.family_id,
            revoked,
            "Refresh token reuse detected; family revoked"
        );
        self.audit
            .record(
                AuditEvent::new("token_reuse_detected", *actor, now)
                    .user(token.user_id)
                    .client_ip(client_ip)
                    .detail(serde_json::json!({
                        "family_id": token.family_id,
                        "descendants_revoked": revoked,
                    })),
            )
            .await;

        Ok(ServiceError::TokenReused)
    }

    async fn mint(
        &self,
        user_id: Uuid,
        family_id: Uuid,
        ttl_days: i64,
        client_ip: Option<&str>,
    ) -> Result<IssuedRefreshToken, ServiceError> {
        let now = self.clock.now();
        let raw_token = generate_secure_token();
        let token = RefreshToken::new(
            user_id,
            hash_token(&raw_token),
            family_id,
            now,
            now + Duration::days(ttl_days),
            client_ip.map(str::to_string),
        );

        self.repo.insert(&token).await?;

        Ok(IssuedRefreshToken {
            raw_token,
            token_id: token.token_id,
            user_id,
            family_id,
            expiry_utc: token.expiry_utc,
        })
    }
}
