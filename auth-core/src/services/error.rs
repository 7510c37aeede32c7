//! Error taxonomy for the authentication core.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Typed per-request failures. Nothing here is fatal to the process.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Bad password, unknown user, or an unusable token — always reported
    /// identically so callers learn nothing about which it was.
    #[error("Invalid credentials")]
    InvalidCredential,

    #[error("Account locked")]
    AccountLocked { until: DateTime<Utc> },

    #[error("Token expired")]
    TokenExpired,

    /// A revoked refresh token was presented again. Internal-only: the
    /// orchestrator collapses this to `InvalidCredential` before it crosses
    /// any external boundary.
    #[error("Token reuse detected")]
    TokenReused,

    #[error("Too many attempts")]
    AttemptsExhausted,

    #[error("Token already used")]
    AlreadyUsed,

    /// Removing this authentication method would lock the user out.
    #[error("At least one authentication method must remain")]
    LastAuthMethod,

    /// Store-level optimistic conflict; the caller may retry once with a
    /// fresh read.
    #[error("Concurrent modification")]
    ConcurrencyConflict,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Collapse security-sensitive distinctions before an external boundary.
    ///
    /// Whether a token was unknown, expired, or replayed must look the same
    /// to the caller; operational errors pass through unchanged.
    pub fn redact(self) -> Self {
        match self {
            ServiceError::TokenReused | ServiceError::TokenExpired => {
                ServiceError::InvalidCredential
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_and_expiry_collapse_to_invalid_credential() {
        assert!(matches!(
            ServiceError::TokenReused.redact(),
            ServiceError::InvalidCredential
        ));
        assert!(matches!(
            ServiceError::TokenExpired.redact(),
            ServiceError::InvalidCredential
        ));
    }

    #[test]
    fn operational_errors_pass_through() {
        let err = ServiceError::Validation("bad input".to_string()).redact();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = ServiceError::AccountLocked { until: Utc::now() }.redact();
        assert!(matches!(err, ServiceError::AccountLocked { .. }));
    }
}
