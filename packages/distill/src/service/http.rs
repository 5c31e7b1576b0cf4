//! HTTP-backed completion service.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint. Transport and
//! status failures are mapped onto the `ServiceErrorKind` taxonomy so the
//! client's retry policy and the credential pool can react correctly.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::CredentialLease;
use crate::error::{ServiceError, ServiceResult};
use crate::traits::completion::CompletionService;

/// Completion service over an OpenAI-compatible HTTP API.
pub struct HttpCompletionService {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl HttpCompletionService {
    /// Create a service against the given API base URL (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ServiceError::server(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// Use a preconfigured `reqwest` client.
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl CompletionService for HttpCompletionService {
    async fn send(
        &self,
        model: &str,
        prompt: &str,
        credential: &CredentialLease,
    ) -> ServiceResult<String> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        debug!(%model, key_id = %credential.key_id, "sending completion request");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(credential.api_key())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::timeout(format!("request timed out: {e}"))
                } else {
                    ServiceError::server(format!("transport failure: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::server(format!("undecodable response body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ServiceError::server("response contained no choices"))
    }
}

/// Map an HTTP status onto the failure taxonomy.
fn classify_status(status: reqwest::StatusCode, body: &str) -> ServiceError {
    let detail = format!("{status}: {body}");
    match status.as_u16() {
        429 => ServiceError::rate_limit(detail),
        401 | 403 => ServiceError::auth(detail),
        400 | 422 => ServiceError::malformed(detail),
        408 => ServiceError::timeout(detail),
        _ => ServiceError::server(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceErrorKind;

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "").kind,
            ServiceErrorKind::RateLimit
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::UNAUTHORIZED, "").kind,
            ServiceErrorKind::Auth
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::FORBIDDEN, "").kind,
            ServiceErrorKind::Auth
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::UNPROCESSABLE_ENTITY, "").kind,
            ServiceErrorKind::Malformed
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "").kind,
            ServiceErrorKind::ServerError
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY, "").kind,
            ServiceErrorKind::ServerError
        );
    }
}
