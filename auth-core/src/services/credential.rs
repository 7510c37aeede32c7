//! Credential store engine - password hashes, isolated from profile data.

use crate::clock::Clock;
use crate::models::Credential;
use crate::repository::CredentialRepository;
use crate::services::audit::Actor;
use crate::services::error::ServiceError;
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};
use std::sync::Arc;
use uuid::Uuid;

/// Owns every write to the credentials table.
#[derive(Clone)]
pub struct CredentialService {
    repo: Arc<dyn CredentialRepository>,
    clock: Arc<dyn Clock>,
}

impl CredentialService {
    pub fn new(repo: Arc<dyn CredentialRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Hash and store a password, replacing any previous credential.
    pub async fn set_password(
        &self,
        user_id: Uuid,
        password: &Password,
        actor: &Actor,
    ) -> Result<(), ServiceError> {
        let hash = hash_password(password)?;
        let credential = Credential::new(user_id, hash.into_string(), self.clock.now());

        self.repo.upsert(&credential).await?;

        tracing::info!(user_id = %user_id, actor = %actor, "Credential updated");
        Ok(())
    }

    /// Verify a candidate password. A missing credential and a wrong
    /// password are indistinguishable to the caller.
    pub async fn verify_password(
        &self,
        user_id: Uuid,
        candidate: &Password,
    ) -> Result<(), ServiceError> {
        let credential = self
            .repo
            .get(user_id)
            .await?
            .ok_or(ServiceError::InvalidCredential)?;

        verify_password(
            candidate,
            &PasswordHashString::new(credential.password_hash),
        )
        .map_err(|_| ServiceError::InvalidCredential)
    }

    /// Whether the user has a password set at all (step-down guard).
    pub async fn has_credential(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.repo.get(user_id).await?.is_some())
    }
}
