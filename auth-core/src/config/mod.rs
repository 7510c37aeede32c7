//! Environment-driven configuration.
//!
//! Defaults apply in dev; production requires every security-relevant value
//! to be set explicitly.

use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub refresh: RefreshTokenConfig,
    pub mfa: MfaConfig,
    pub single_use: SingleUseTokenConfig,
    pub lockout: LockoutConfig,
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub private_key_path: String,
    pub public_key_path: String,
    pub access_token_expiry_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenConfig {
    /// Token lifetime for a plain login.
    pub ttl_days: i64,
    /// Token lifetime when the client asked to be remembered.
    pub remembered_ttl_days: i64,
    /// Active-session ceiling per account; the oldest session is evicted
    /// when a new login would exceed it.
    pub max_sessions_per_user: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MfaConfig {
    pub code_length: usize,
    pub ttl_minutes: i64,
    pub max_attempts: i32,
    pub resend_cooldown_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SingleUseTokenConfig {
    pub password_reset_ttl_hours: i64,
    pub email_verification_ttl_hours: i64,
    pub registration_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockoutConfig {
    pub max_failed_logins: i32,
    pub lockout_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub from_address: String,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str.parse().map_err(anyhow::Error::msg)?;
        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            environment,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            jwt: JwtConfig {
                private_key_path: get_env("JWT_PRIVATE_KEY_PATH", None, is_prod)?,
                public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "15",
                    is_prod,
                )?,
            },
            refresh: RefreshTokenConfig {
                ttl_days: parse_env("REFRESH_TOKEN_TTL_DAYS", "7", is_prod)?,
                remembered_ttl_days: parse_env("REFRESH_TOKEN_REMEMBERED_TTL_DAYS", "30", is_prod)?,
                max_sessions_per_user: parse_env("MAX_SESSIONS_PER_USER", "5", is_prod)?,
            },
            mfa: MfaConfig {
                code_length: parse_env("MFA_CODE_LENGTH", "6", is_prod)?,
                ttl_minutes: parse_env("MFA_TTL_MINUTES", "5", is_prod)?,
                max_attempts: parse_env("MFA_MAX_ATTEMPTS", "5", is_prod)?,
                resend_cooldown_seconds: parse_env("MFA_RESEND_COOLDOWN_SECONDS", "60", is_prod)?,
            },
            single_use: SingleUseTokenConfig {
                password_reset_ttl_hours: parse_env("PASSWORD_RESET_TTL_HOURS", "1", is_prod)?,
                email_verification_ttl_hours: parse_env(
                    "EMAIL_VERIFICATION_TTL_HOURS",
                    "24",
                    is_prod,
                )?,
                registration_ttl_hours: parse_env("REGISTRATION_TTL_HOURS", "72", is_prod)?,
            },
            lockout: LockoutConfig {
                max_failed_logins: parse_env("LOCKOUT_MAX_FAILED_LOGINS", "5", is_prod)?,
                lockout_minutes: parse_env("LOCKOUT_MINUTES", "15", is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                user: get_env("SMTP_USER", None, is_prod)?,
                password: get_env("SMTP_PASSWORD", None, is_prod)?,
                from_address: get_env("SMTP_FROM_ADDRESS", None, is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.jwt.access_token_expiry_minutes <= 0 {
            anyhow::bail!("JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive");
        }
        if self.refresh.ttl_days <= 0 || self.refresh.remembered_ttl_days <= 0 {
            anyhow::bail!("refresh token TTLs must be positive");
        }
        if self.refresh.remembered_ttl_days < self.refresh.ttl_days {
            anyhow::bail!("REFRESH_TOKEN_REMEMBERED_TTL_DAYS must be >= REFRESH_TOKEN_TTL_DAYS");
        }
        if self.refresh.max_sessions_per_user < 1 {
            anyhow::bail!("MAX_SESSIONS_PER_USER must be at least 1");
        }
        if self.mfa.code_length < 4 {
            anyhow::bail!("MFA_CODE_LENGTH must be at least 4");
        }
        if self.mfa.max_attempts < 1 {
            anyhow::bail!("MFA_MAX_ATTEMPTS must be at least 1");
        }
        if self.lockout.max_failed_logins < 1 {
            anyhow::bail!("LOCKOUT_MAX_FAILED_LOGINS must be at least 1");
        }
        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, anyhow::Error> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                anyhow::bail!("{key} is required in production but not set");
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                anyhow::bail!("{key} is required but not set");
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, anyhow::Error>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}"))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {s}")),
        }
    }
}
