//! Completion service collaborator trait.

use async_trait::async_trait;

use crate::credentials::CredentialLease;
use crate::error::ServiceResult;

/// The external language-completion service.
///
/// Implementations send one prompt with one leased credential and map
/// transport/service failures onto the `ServiceErrorKind` taxonomy; the
/// retry policy and credential pool branch on that classification.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Send a prompt to `model` using the leased credential.
    async fn send(
        &self,
        model: &str,
        prompt: &str,
        credential: &CredentialLease,
    ) -> ServiceResult<String>;
}
