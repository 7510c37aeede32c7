//! PostgreSQL adapters for the repository contracts.
//!
//! Every racing transition is one conditional UPDATE whose rows-affected
//! count decides the branch; two concurrent callers can never both observe
//! the active state.

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
use sqlx::PgPool;
use uuid::Uuid;

/// Map store errors, surfacing serialization failures as retryable
/// conflicts.
fn map_db_err(err: sqlx::Error) -> ServiceError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("40001") {
            return ServiceError::ConcurrencyConflict;
        }
    }
    ServiceError::Database(err)
}

#[derive(Clone)]
pub struct PgCredentialRepository {
    pool: PgPool,
}

impl PgCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    async fn get(&self, user_id: Uuid) -> Result<Option<Credential>, ServiceError> {
        let query = r"
            SELECT user_id, password_hash, updated_utc
            FROM credentials
            WHERE user_id = $1
        ";

        sqlx::query_as(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn upsert(&self, credential: &Credential) -> Result<(), ServiceError> {
        let query = r"
            INSERT INTO credentials (user_id, password_hash, updated_utc)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET password_hash = EXCLUDED.password_hash,
                          updated_utc = EXCLUDED.updated_utc
        ";

        sqlx::query(query)
            .bind(credential.user_id)
            .bind(&credential.password_hash)
            .bind(credential.updated_utc)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgRefreshTokenRepository {
    pool: PgPool,
}

impl PgRefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const REFRESH_TOKEN_COLUMNS: &str =
    "token_id, user_id, token_hash, family_id, issued_utc, expiry_utc, revoked_utc, client_ip";

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn insert(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        let query = r"
            INSERT INTO refresh_tokens
                (token_id, user_id, token_hash, family_id, issued_utc, expiry_utc, revoked_utc, client_ip)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";

        sqlx::query(query)
            .bind(token.token_id)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(token.family_id)
            .bind(token.issued_utc)
            .bind(token.expiry_utc)
            .bind(token.revoked_utc)
            .bind(&token.client_ip)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(())
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, ServiceError> {
        let query = format!(
            "SELECT {REFRESH_TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
        );

        sqlx::query_as(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn revoke_if_active(
        &self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_utc = $2
            WHERE token_id = $1 AND revoked_utc IS NULL
        ";

        let result = sqlx::query(query)
            .bind(token_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_utc = $2
            WHERE family_id = $1 AND revoked_utc IS NULL
        ";

        let result = sqlx::query(query)
            .bind(family_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(result.rows_affected())
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_utc = $2
            WHERE user_id = $1 AND revoked_utc IS NULL
        ";

        let result = sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(result.rows_affected())
    }

    async fn count_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        let query = r"
            SELECT COUNT(*)
            FROM refresh_tokens
            WHERE user_id = $1 AND revoked_utc IS NULL AND expiry_utc > $2
        ";

        sqlx::query_scalar(query)
            .bind(user_id)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn find_oldest_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, ServiceError> {
        let query = format!(
            "SELECT {REFRESH_TOKEN_COLUMNS}
             FROM refresh_tokens
             WHERE user_id = $1 AND revoked_utc IS NULL AND expiry_utc > $2
             ORDER BY issued_utc ASC
             LIMIT 1"
        );

        sqlx::query_as(&query)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)
    }
}

#[derive(Clone)]
pub struct PgMfaChallengeRepository {
    pool: PgPool,
}

impl PgMfaChallengeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MfaChallengeRepository for PgMfaChallengeRepository {
    async fn insert(&self, challenge: &MfaChallenge) -> Result<(), ServiceError> {
        let query = r"
            INSERT INTO mfa_challenges
                (challenge_token, user_id, code_hash, channel_code, expiry_utc,
                 attempt_count, verified_utc, last_sent_utc, client_ip, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ";

        sqlx::query(query)
            .bind(&challenge.challenge_token)
            .bind(challenge.user_id)
            .bind(&challenge.code_hash)
            .bind(&challenge.channel_code)
            .bind(challenge.expiry_utc)
            .bind(challenge.attempt_count)
            .bind(challenge.verified_utc)
            .bind(challenge.last_sent_utc)
            .bind(&challenge.client_ip)
            .bind(challenge.created_utc)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(())
    }

    async fn find(&self, challenge_token: &str) -> Result<Option<MfaChallenge>, ServiceError> {
        let query = r"
            SELECT challenge_token, user_id, code_hash, channel_code, expiry_utc,
                   attempt_count, verified_utc, last_sent_utc, client_ip, created_utc
            FROM mfa_challenges
            WHERE challenge_token = $1
        ";

        sqlx::query_as(query)
            .bind(challenge_token)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn increment_attempts(&self, challenge_token: &str) -> Result<i32, ServiceError> {
        let query = r"
            UPDATE mfa_challenges
            SET attempt_count = attempt_count + 1
            WHERE challenge_token = $1
            RETURNING attempt_count
        ";

        sqlx::query_scalar(query)
            .bind(challenge_token)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?
            .ok_or(ServiceError::InvalidCredential)
    }

    async fn mark_verified_if_pending(
        &self,
        challenge_token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let query = r"
            UPDATE mfa_challenges
            SET verified_utc = $2
            WHERE challenge_token = $1 AND verified_utc IS NULL
        ";

        let result = sqlx::query(query)
            .bind(challenge_token)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn replace_code(
        &self,
        challenge_token: &str,
        code_hash: &str,
        sent_utc: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let query = r"
            UPDATE mfa_challenges
            SET code_hash = $2, last_sent_utc = $3
            WHERE challenge_token = $1
        ";

        sqlx::query(query)
            .bind(challenge_token)
            .bind(code_hash)
            .bind(sent_utc)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(())
    }
}

/// One adapter serves the three single-use token tables; construct it with
/// the table the purpose binds to.
#[derive(Clone)]
pub struct PgSingleUseTokenStore {
    pool: PgPool,
    table: &'static str,
}

impl PgSingleUseTokenStore {
    pub fn password_reset(pool: PgPool) -> Self {
        Self {
            pool,
            table: "password_reset_tokens",
        }
    }

    pub fn email_verification(pool: PgPool) -> Self {
        Self {
            pool,
            table: "email_verification_tokens",
        }
    }

    pub fn registration(pool: PgPool) -> Self {
        Self {
            pool,
            table: "registration_tokens",
        }
    }
}

#[async_trait]
impl SingleUseTokenStore for PgSingleUseTokenStore {
    async fn insert(&self, token: &SingleUseToken) -> Result<(), ServiceError> {
        let query = format!(
            "INSERT INTO {} (token_id, user_id, email, token_hash, expiry_utc, used_utc, created_utc)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            self.table
        );

        sqlx::query(&query)
            .bind(token.token_id)
            .bind(token.user_id)
            .bind(&token.email)
            .bind(&token.token_hash)
            .bind(token.expiry_utc)
            .bind(token.used_utc)
            .bind(token.created_utc)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(())
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<SingleUseToken>, ServiceError> {
        let query = format!(
            "SELECT token_id, user_id, email, token_hash, expiry_utc, used_utc, created_utc
             FROM {} WHERE token_hash = $1",
            self.table
        );

        sqlx::query_as(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn mark_used_if_unused(
        &self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let query = format!(
            "UPDATE {} SET used_utc = $2 WHERE token_id = $1 AND used_utc IS NULL",
            self.table
        );

        let result = sqlx::query(&query)
            .bind(token_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn invalidate_outstanding(
        &self,
        subject: &TokenSubject,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let (column, bind): (&str, String) = match subject {
            TokenSubject::User(id) => ("user_id", id.to_string()),
            TokenSubject::Email(email) => ("email", email.clone()),
        };

        // Force-expire rather than delete: rows stay for audit, and a
        // superseded token can never be consumed.
        let query = format!(
            "UPDATE {} SET expiry_utc = $2
             WHERE {column}::text = $1 AND used_utc IS NULL AND expiry_utc > $2",
            self.table
        );

        let result = sqlx::query(&query)
            .bind(bind)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "user_id, email, is_active, is_deleted, email_verified, mfa_required, \
     roles, failed_login_count, lockout_until_utc, last_login_utc, last_login_ip, \
     requires_password_change";

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<AuthUser>, ServiceError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1");

        sqlx::query_as(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AuthUser>, ServiceError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");

        sqlx::query_as(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn increment_failed_logins(&self, user_id: Uuid) -> Result<i32, ServiceError> {
        let query = r"
            UPDATE users
            SET failed_login_count = failed_login_count + 1
            WHERE user_id = $1
            RETURNING failed_login_count
        ";

        sqlx::query_scalar(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?
            .ok_or(ServiceError::InvalidCredential)
    }

    async fn set_lockout(
        &self,
        user_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let query = "UPDATE users SET lockout_until_utc = $2 WHERE user_id = $1";

        sqlx::query(query)
            .bind(user_id)
            .bind(until)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(())
    }

    async fn record_login_success(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        client_ip: Option<&str>,
    ) -> Result<(), ServiceError> {
        let query = r"
            UPDATE users
            SET failed_login_count = 0,
                lockout_until_utc = NULL,
                last_login_utc = $2,
                last_login_ip = $3
            WHERE user_id = $1
        ";

        sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .bind(client_ip)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(())
    }

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let query = "UPDATE users SET email_verified = TRUE WHERE user_id = $1";

        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(())
    }

    async fn activate(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let query = "UPDATE users SET is_active = TRUE WHERE user_id = $1";

        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(())
    }

    async fn clear_password_change_requirement(
        &self,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        let query = "UPDATE users SET requires_password_change = FALSE WHERE user_id = $1";

        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(())
    }

    async fn list_external_logins(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ExternalLogin>, ServiceError> {
        let query = r"
            SELECT user_id, provider, subject_id, created_utc
            FROM external_logins
            WHERE user_id = $1
        ";

        sqlx::query_as(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
    }

    async fn remove_external_login(
        &self,
        user_id: Uuid,
        provider: &str,
    ) -> Result<bool, ServiceError> {
        let query = "DELETE FROM external_logins WHERE user_id = $1 AND provider = $2";

        let result = sqlx::query(query)
            .bind(user_id)
            .bind(provider)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(result.rows_affected() > 0)
    }
}
