//! Single-use token engine.
//!
//! One engine serves password reset, email verification and registration
//! completion; each purpose binds its own store instance and TTL. Tokens
//! are hash-at-rest, expire, and can be consumed exactly once; issuing a
//! new token supersedes everything outstanding for the same subject.

use crate::clock::Clock;
use crate::models::{SingleUseToken, TokenSubject};
use crate::repository::SingleUseTokenStore;
use crate::services::error::ServiceError;
use crate::utils::{generate_secure_token, hash_token};
use chrono::Duration;
use std::sync::Arc;

/// Owns every write to one single-use token table.
#[derive(Clone)]
pub struct SingleUseTokenService {
    store: Arc<dyn SingleUseTokenStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    purpose: &'static str,
}

impl SingleUseTokenService {
    pub fn new(
        store: Arc<dyn SingleUseTokenStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        purpose: &'static str,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            purpose,
        }
    }

    /// Issue a token for a subject, invalidating every outstanding one the
    /// subject still had. Returns the raw secret; the store only keeps its
    /// hash.
    pub async fn issue(&self, subject: &TokenSubject) -> Result<String, ServiceError> {
        let now = self.clock.now();

        let superseded = self.store.invalidate_outstanding(subject, now).await?;
        if superseded > 0 {
            tracing::debug!(
                purpose = self.purpose,
                superseded,
                "Superseded outstanding tokens on reissue"
            );
        }

        let raw_token = generate_secure_token();
        let token = SingleUseToken::new(subject, hash_token(&raw_token), now, now + self.ttl);
        self.store.insert(&token).await?;

        tracing::info!(purpose = self.purpose, "Single-use token issued");
        Ok(raw_token)
    }

    /// Consume a token, returning its subject. At most one consume can ever
    /// succeed per token; the subject-specific side effect belongs to the
    /// caller, inside the same logical transaction.
    pub async fn consume(&self, raw_token: &str) -> Result<TokenSubject, ServiceError> {
        let now = self.clock.now();
        let token = self
            .store
            .find_by_hash(&hash_token(raw_token))
            .await?
            .ok_or(ServiceError::InvalidCredential)?;

        if token.is_used() {
            return Err(ServiceError::AlreadyUsed);
        }
        if token.is_expired(now) {
            return Err(ServiceError::TokenExpired);
        }

        // Conditional consume: a concurrent call on the same token loses
        // here instead of double-applying the caller's side effect.
        let consumed = self.store.mark_used_if_unused(token.token_id, now).await?;
        if !consumed {
            return Err(ServiceError::AlreadyUsed);
        }

        tracing::info!(purpose = self.purpose, "Single-use token consumed");
        Ok(token.subject())
    }
}
