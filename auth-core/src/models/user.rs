//! Auth-visible projection of the user account.
//!
//! The user row is owned by profile CRUD elsewhere; this crate only reads
//! and writes the fields that drive authentication decisions.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// The slice of a user account the auth core needs.
#[derive(Debug, Clone, FromRow)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub is_active: bool,
    pub is_deleted: bool,
    pub email_verified: bool,
    pub mfa_required: bool,
    pub roles: Vec<String>,
    pub failed_login_count: i32,
    pub lockout_until_utc: Option<DateTime<Utc>>,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub requires_password_change: bool,
}

impl AuthUser {
    /// Whether the account can authenticate at all.
    pub fn can_authenticate(&self) -> bool {
        self.is_active && !self.is_deleted
    }

    /// Whether the account is locked out at `now`.
    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lockout_until_utc, Some(until) if until > now)
    }
}

/// External login (federated identity) linked to a user.
#[derive(Debug, Clone, FromRow)]
pub struct ExternalLogin {
    pub user_id: Uuid,
    pub provider: String,
    pub subject_id: String,
    pub created_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user() -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            is_active: true,
            is_deleted: false,
            email_verified: true,
            mfa_required: false,
            roles: vec!["user".to_string()],
            failed_login_count: 0,
            lockout_until_utc: None,
            last_login_utc: None,
            last_login_ip: None,
            requires_password_change: false,
        }
    }

    #[test]
    fn deleted_accounts_cannot_authenticate() {
        let mut u = user();
        assert!(u.can_authenticate());
        u.is_deleted = true;
        assert!(!u.can_authenticate());
    }

    #[test]
    fn lockout_expires() {
        let now = Utc::now();
        let mut u = user();
        u.lockout_until_utc = Some(now + Duration::minutes(15));
        assert!(u.is_locked_out(now));
        assert!(!u.is_locked_out(now + Duration::minutes(16)));
    }
}
