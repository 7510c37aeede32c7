//! Authentication orchestrator.
//!
//! Composes the credential store, refresh token engine, MFA engine and
//! single-use token engines into the login, registration-completion and
//! password-reset flows. Owns no storage of its own; every write goes
//! through the engine that owns the entity.

use crate::clock::Clock;
use crate::config::LockoutConfig;
use crate::models::{AuthUser, MfaChannel, TokenSubject};
use crate::repository::UserRepository;
use crate::services::audit::{Actor, AuditEvent, AuditSink};
use crate::services::credential::CredentialService;
use crate::services::email::EmailProvider;
use crate::services::error::ServiceError;
use crate::services::jwt::JwtService;
use crate::services::mfa::MfaService;
use crate::services::refresh_token::RefreshTokenService;
use crate::services::single_use::SingleUseTokenService;
use crate::utils::Password;
use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

/// Token pair returned after a fully authenticated flow.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// What a login attempt produced: either tokens, or an MFA challenge that
/// must be completed first.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(TokenPair),
    MfaRequired { challenge_token: String },
}

/// Orchestrates the authentication flows.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    credentials: CredentialService,
    refresh_tokens: RefreshTokenService,
    mfa: MfaService,
    password_reset: SingleUseTokenService,
    email_verification: SingleUseTokenService,
    registration: SingleUseTokenService,
    jwt: JwtService,
    email: Arc<dyn EmailProvider>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    lockout: LockoutConfig,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserRepository>,
        credentials: CredentialService,
        refresh_tokens: RefreshTokenService,
        mfa: MfaService,
        password_reset: SingleUseTokenService,
        email_verification: SingleUseTokenService,
        registration: SingleUseTokenService,
        jwt: JwtService,
        email: Arc<dyn EmailProvider>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        lockout: LockoutConfig,
    ) -> Self {
        Self {
            users,
            credentials,
            refresh_tokens,
            mfa,
            password_reset,
            email_verification,
            registration,
            jwt,
            email,
            audit,
            clock,
            lockout,
        }
    }

    /// Password login. Locked accounts are reported as such; every other
    /// failure is `InvalidCredential`, whatever actually went wrong.
    pub async fn login(
        &self,
        email: &str,
        password: &Password,
        client_ip: Option<&str>,
        remember_me: bool,
    ) -> Result<LoginOutcome, ServiceError> {
        let now = self.clock.now();
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(ServiceError::InvalidCredential)?;

        if !user.can_authenticate() {
            return Err(ServiceError::InvalidCredential);
        }

        if let Some(until) = user.lockout_until_utc {
            if until > now {
                return Err(ServiceError::AccountLocked { until });
            }
        }

        if self
            .credentials
            .verify_password(user.user_id, password)
            .await
            .is_err()
        {
            return Err(self.handle_failed_login(&user, client_ip).await?);
        }

        let actor = Actor::User(user.user_id);

        if user.mfa_required {
            let challenge = self
                .mfa
                .create_challenge(user.user_id, MfaChannel::Email, client_ip)
                .await?;

            self.dispatch_mfa_code(&user.email, &challenge.code);
            self.audit
                .record(
                    AuditEvent::new("mfa_challenge_issued", actor, now)
                        .user(user.user_id)
                        .client_ip(client_ip),
                )
                .await;

            return Ok(LoginOutcome::MfaRequired {
                challenge_token: challenge.challenge_token,
            });
        }

        self.users
            .record_login_success(user.user_id, now, client_ip)
            .await?;

        let tokens = self
            .issue_token_pair(&user, client_ip, remember_me, &actor)
            .await?;

        self.audit
            .record(
                AuditEvent::new("login", actor, now)
                    .user(user.user_id)
                    .client_ip(client_ip),
            )
            .await;

        Ok(LoginOutcome::Authenticated(tokens))
    }

    /// Complete an MFA-gated login.
    pub async fn complete_mfa(
        &self,
        challenge_token: &str,
        code: &str,
        client_ip: Option<&str>,
        remember_me: bool,
    ) -> Result<TokenPair, ServiceError> {
        let now = self.clock.now();
        let user_id = self.mfa.verify_code(challenge_token, code).await?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .filter(AuthUser::can_authenticate)
            .ok_or(ServiceError::InvalidCredential)?;

        self.users
            .record_login_success(user.user_id, now, client_ip)
            .await?;

        let actor = Actor::User(user.user_id);
        let tokens = self
            .issue_token_pair(&user, client_ip, remember_me, &actor)
            .await?;

        self.audit
            .record(
                AuditEvent::new("login", actor, now)
                    .user(user.user_id)
                    .client_ip(client_ip)
                    .detail(serde_json::json!({ "mfa": true })),
            )
            .await;

        Ok(tokens)
    }

    /// Rotate a refresh token into a new pair (access + refresh).
    ///
    /// Rotation runs first so a replayed token always triggers the engine's
    /// family revocation, whatever else is wrong with the request.
    pub async fn refresh(
        &self,
        raw_refresh_token: &str,
        client_ip: Option<&str>,
    ) -> Result<TokenPair, ServiceError> {
        let rotated = self
            .refresh_tokens
            .rotate(raw_refresh_token, client_ip, &Actor::System)
            .await?;

        let user = match self
            .users
            .find_by_id(rotated.user_id)
            .await?
            .filter(AuthUser::can_authenticate)
        {
            Some(user) => user,
            None => {
                // The account went away between issue and rotation; the
                // freshly minted lineage must not survive it.
                self.refresh_tokens
                    .revoke_family(rotated.family_id, &Actor::System)
                    .await?;
                return Err(ServiceError::InvalidCredential);
            }
        };

        let access_token =
            self.jwt
                .generate_access_token(user.user_id, &user.roles, self.clock.now())?;

        Ok(TokenPair {
            access_token,
            refresh_token: rotated.raw_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }

    /// Request a password reset. Always succeeds so the caller can't probe
    /// which addresses exist.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), ServiceError> {
        let Some(user) = self.users.find_by_email(email).await? else {
            return Ok(());
        };
        if !user.can_authenticate() {
            return Ok(());
        }

        let raw_token = self
            .password_reset
            .issue(&TokenSubject::User(user.user_id))
            .await?;

        self.dispatch_password_reset(&user.email, &raw_token);
        // The requester is unauthenticated; nothing proves they are the
        // account holder, so the acting principal is the system.
        self.audit
            .record(
                AuditEvent::new("password_reset_requested", Actor::System, self.clock.now())
                    .user(user.user_id),
            )
            .await;

        Ok(())
    }

    /// Complete a password reset: consume the token, kill every existing
    /// session, set the new password, and log the user in.
    pub async fn complete_password_reset(
        &self,
        raw_token: &str,
        new_password: &Password,
        client_ip: Option<&str>,
    ) -> Result<TokenPair, ServiceError> {
        let now = self.clock.now();
        let subject = self.password_reset.consume(raw_token).await?;
        let user = self.resolve_subject(&subject).await?;
        let actor = Actor::User(user.user_id);

        // Completing a reset proves control of the mailbox, not of every
        // device holding a session; those sessions die first.
        self.refresh_tokens
            .revoke_all_for_user(user.user_id, &actor)
            .await?;

        self.credentials
            .set_password(user.user_id, new_password, &actor)
            .await?;
        self.users
            .clear_password_change_requirement(user.user_id)
            .await?;
        self.users
            .record_login_success(user.user_id, now, client_ip)
            .await?;

        let tokens = self.issue_token_pair(&user, client_ip, false, &actor).await?;

        self.audit
            .record(
                AuditEvent::new("password_reset_completed", actor, now)
                    .user(user.user_id)
                    .client_ip(client_ip),
            )
            .await;

        Ok(tokens)
    }

    /// Complete a registration: consume the token, activate the account,
    /// set the credential, and log the user in.
    pub async fn complete_registration(
        &self,
        raw_token: &str,
        password: &Password,
        client_ip: Option<&str>,
    ) -> Result<TokenPair, ServiceError> {
        let now = self.clock.now();
        let subject = self.registration.consume(raw_token).await?;
        let user = self.resolve_subject(&subject).await?;
        let actor = Actor::User(user.user_id);

        self.users.activate(user.user_id).await?;
        self.users.mark_email_verified(user.user_id).await?;
        self.credentials
            .set_password(user.user_id, password, &actor)
            .await?;
        self.refresh_tokens
            .revoke_all_for_user(user.user_id, &actor)
            .await?;
        self.users
            .record_login_success(user.user_id, now, client_ip)
            .await?;

        let tokens = self.issue_token_pair(&user, client_ip, false, &actor).await?;

        self.audit
            .record(
                AuditEvent::new("registration_completed", actor, now)
                    .user(user.user_id)
                    .client_ip(client_ip),
            )
            .await;

        Ok(tokens)
    }

    /// Consume an email-verification token and mark the address verified.
    pub async fn verify_email(&self, raw_token: &str) -> Result<(), ServiceError> {
        let subject = self.email_verification.consume(raw_token).await?;
        let user = self.resolve_subject(&subject).await?;

        self.users.mark_email_verified(user.user_id).await?;

        self.audit
            .record(
                AuditEvent::new("email_verified", Actor::User(user.user_id), self.clock.now())
                    .user(user.user_id),
            )
            .await;

        Ok(())
    }

    /// Logout: revoke the presented refresh token. Idempotent.
    pub async fn logout(&self, raw_refresh_token: &str) -> Result<bool, ServiceError> {
        let actor = match self.refresh_tokens.validate(raw_refresh_token).await {
            Ok(user_id) => Actor::User(user_id),
            Err(_) => Actor::System,
        };
        self.refresh_tokens.revoke(raw_refresh_token, &actor).await
    }

    /// Remove an external login, refusing when it is the user's last
    /// remaining way to authenticate.
    pub async fn unlink_external_login(
        &self,
        user_id: Uuid,
        provider: &str,
    ) -> Result<(), ServiceError> {
        let logins = self.users.list_external_logins(user_id).await?;
        if !logins.iter().any(|l| l.provider == provider) {
            return Err(ServiceError::Validation(format!(
                "no external login for provider {provider}"
            )));
        }

        let has_password = self.credentials.has_credential(user_id).await?;
        let other_logins = logins.iter().filter(|l| l.provider != provider).count();

        if !has_password && other_logins == 0 {
            return Err(ServiceError::LastAuthMethod);
        }

        self.users.remove_external_login(user_id, provider).await?;

        self.audit
            .record(
                AuditEvent::new("external_login_unlinked", Actor::User(user_id), self.clock.now())
                    .user(user_id)
                    .detail(serde_json::json!({ "provider": provider })),
            )
            .await;

        Ok(())
    }

    async fn handle_failed_login(
        &self,
        user: &AuthUser,
        client_ip: Option<&str>,
    ) -> Result<ServiceError, ServiceError> {
        let now = self.clock.now();
        let failures = self.users.increment_failed_logins(user.user_id).await?;

        if failures >= self.lockout.max_failed_logins {
            let until = now + Duration::minutes(self.lockout.lockout_minutes);
            self.users.set_lockout(user.user_id, until).await?;

            tracing::warn!(
                user_id = %user.user_id,
                failures,
                "Account locked after repeated failed logins"
            );
            self.audit
                .record(
                    AuditEvent::new("account_locked", Actor::System, now)
                        .user(user.user_id)
                        .client_ip(client_ip)
                        .detail(serde_json::json!({ "failures": failures })),
                )
                .await;
        }

        Ok(ServiceError::InvalidCredential)
    }

    async fn issue_token_pair(
        &self,
        user: &AuthUser,
        client_ip: Option<&str>,
        remember_me: bool,
        actor: &Actor,
    ) -> Result<TokenPair, ServiceError> {
        let refresh = self
            .refresh_tokens
            .issue(user.user_id, client_ip, remember_me, actor)
            .await?;
        let access_token =
            self.jwt
                .generate_access_token(user.user_id, &user.roles, self.clock.now())?;

        Ok(TokenPair {
            access_token,
            refresh_token: refresh.raw_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }

    async fn resolve_subject(&self, subject: &TokenSubject) -> Result<AuthUser, ServiceError> {
        let user = match subject {
            TokenSubject::User(id) => self.users.find_by_id(*id).await?,
            TokenSubject::Email(email) => self.users.find_by_email(email).await?,
        };

        user.filter(|u| !u.is_deleted)
            .ok_or(ServiceError::InvalidCredential)
    }

    /// Fire-and-forget delivery: an SMTP outage must not fail the login.
    fn dispatch_mfa_code(&self, to: &str, code: &str) {
        let email = self.email.clone();
        let to = to.to_string();
        let code = code.to_string();
        tokio::spawn(async move {
            if let Err(e) = email.send_mfa_code(&to, &code).await {
                tracing::warn!(error = %e, "MFA code delivery failed");
            }
        });
    }

    fn dispatch_password_reset(&self, to: &str, token: &str) {
        let email = self.email.clone();
        let to = to.to_string();
        let token = token.to_string();
        tokio::spawn(async move {
            if let Err(e) = email.send_password_reset_email(&to, &token).await {
                tracing::warn!(error = %e, "Password reset email delivery failed");
            }
        });
    }
}
