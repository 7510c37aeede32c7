//! Email dispatch for out-of-band secrets.
//!
//! Delivery failures are the dispatcher's problem: callers fire-and-forget
//! and log, they never block an auth decision on SMTP.

use crate::config::SmtpConfig;
use crate::services::error::ServiceError;
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use std::sync::Mutex;
use std::time::Duration;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_verification_email(&self, to: &str, token: &str) -> Result<(), ServiceError>;

    async fn send_password_reset_email(&self, to: &str, token: &str)
        -> Result<(), ServiceError>;

    async fn send_registration_email(&self, to: &str, token: &str) -> Result<(), ServiceError>;

    async fn send_mfa_code(&self, to: &str, code: &str) -> Result<(), ServiceError>;
}

/// SMTP-backed provider.
#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_address: String,
}

impl EmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, ServiceError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(587)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "Email service initialized");

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }

    async fn send(&self, to: &str, subject: &str, body: String) -> Result<(), ServiceError> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|e: lettre::address::AddressError| {
                        ServiceError::Internal(e.into())
                    })?,
            )
            .to(to
                .parse()
                .map_err(|e: lettre::address::AddressError| ServiceError::Internal(e.into()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| ServiceError::Internal(e.into()))?;

        // SmtpTransport is blocking; keep it off the async runtime.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to, subject = %subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to, "Failed to send email");
                Err(ServiceError::Internal(anyhow::anyhow!(e.to_string())))
            }
        }
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_verification_email(&self, to: &str, token: &str) -> Result<(), ServiceError> {
        self.send(
            to,
            "Verify your email address",
            format!("Use this code to verify your email address: {token}"),
        )
        .await
    }

    async fn send_password_reset_email(
        &self,
        to: &str,
        token: &str,
    ) -> Result<(), ServiceError> {
        self.send(
            to,
            "Password reset request",
            format!("Use this code to reset your password: {token}"),
        )
        .await
    }

    async fn send_registration_email(&self, to: &str, token: &str) -> Result<(), ServiceError> {
        self.send(
            to,
            "Complete your registration",
            format!("Use this code to finish setting up your account: {token}"),
        )
        .await
    }

    async fn send_mfa_code(&self, to: &str, code: &str) -> Result<(), ServiceError> {
        self.send(to, "Your sign-in code", format!("Your sign-in code is {code}"))
            .await
    }
}

/// A message captured by the mock provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub kind: &'static str,
    pub secret: String,
}

/// Test double that records every send.
#[derive(Default)]
pub struct MockEmailService {
    sent: Mutex<Vec<SentEmail>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().expect("mock email lock poisoned").clone()
    }

    fn push(&self, to: &str, kind: &'static str, secret: &str) {
        self.sent
            .lock()
            .expect("mock email lock poisoned")
            .push(SentEmail {
                to: to.to_string(),
                kind,
                secret: secret.to_string(),
            });
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_verification_email(&self, to: &str, token: &str) -> Result<(), ServiceError> {
        self.push(to, "verification", token);
        Ok(())
    }

    async fn send_password_reset_email(
        &self,
        to: &str,
        token: &str,
    ) -> Result<(), ServiceError> {
        self.push(to, "password_reset", token);
        Ok(())
    }

    async fn send_registration_email(&self, to: &str, token: &str) -> Result<(), ServiceError> {
        self.push(to, "registration", token);
        Ok(())
    }

    async fn send_mfa_code(&self, to: &str, code: &str) -> Result<(), ServiceError> {
        self.push(to, "mfa_code", code);
        Ok(())
    }
}
