//! Service layer: the engines and their collaborators.

pub mod audit;
pub mod auth;
pub mod credential;
pub mod email;
pub mod error;
pub mod jwt;
pub mod mfa;
pub mod refresh_token;
pub mod single_use;

pub use audit::{Actor, AuditEvent, AuditSink, NoopAuditSink, TracingAuditSink};
pub use auth::{AuthService, LoginOutcome, TokenPair};
pub use credential::CredentialService;
pub use email::{EmailProvider, EmailService, MockEmailService, SentEmail};
pub use error::ServiceError;
pub use jwt::{AccessTokenClaims, JwtService};
pub use mfa::{IssuedChallenge, MfaService};
pub use refresh_token::{IssuedRefreshToken, RefreshTokenService};
pub use single_use::SingleUseTokenService;
