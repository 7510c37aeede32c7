//! Single-use token model - shared by password reset, email verification and
//! registration completion.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Who a single-use token was issued for. Password reset and email
/// verification address a known user; registration tokens may predate the
/// user row and address an email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSubject {
    User(Uuid),
    Email(String),
}

impl TokenSubject {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            TokenSubject::User(id) => Some(*id),
            TokenSubject::Email(_) => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            TokenSubject::User(_) => None,
            TokenSubject::Email(email) => Some(email),
        }
    }
}

/// Single-use token entity, hash-at-rest.
#[derive(Debug, Clone, FromRow)]
pub struct SingleUseToken {
    pub token_id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub token_hash: String,
    pub expiry_utc: DateTime<Utc>,
    pub used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl SingleUseToken {
    pub fn new(
        subject: &TokenSubject,
        token_hash: String,
        created_utc: DateTime<Utc>,
        expiry_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            user_id: subject.user_id(),
            email: subject.email().map(str::to_string),
            token_hash,
            expiry_utc,
            used_utc: None,
            created_utc,
        }
    }

    pub fn subject(&self) -> TokenSubject {
        match self.user_id {
            Some(id) => TokenSubject::User(id),
            None => TokenSubject::Email(self.email.clone().unwrap_or_default()),
        }
    }

    pub fn is_used(&self) -> bool {
        self.used_utc.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }

    /// Outstanding means still consumable.
    pub fn is_outstanding(&self, now: DateTime<Utc>) -> bool {
        !self.is_used() && !self.is_expired(now)
    }
}
