//! Provider abstraction over LLM chat/completion HTTP APIs.
//!
//! Every backend adapts its wire format to the same [`Reviewer`] interface
//! and shares one retry policy (exponential backoff with full jitter) and
//! one HTTP status classification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

mod anthropic;
mod gemini;
mod ollama;
mod openai;
mod retry;

pub use anthropic::Anthropic;
pub use gemini::Gemini;
pub use ollama::Ollama;
pub use openai::OpenAi;
pub use retry::{ProviderError, RetryPolicy, retry_with_backoff};

/// Timeout for a single call to a hosted provider.
pub(crate) const CLOUD_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout for a single call to a local provider (Ollama, LM Studio).
pub(crate) const LOCAL_TIMEOUT: Duration = Duration::from_secs(300);
/// Applied when a request leaves `max_tokens` at 0.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

/// The data sent to an LLM for review.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// The raw response from an LLM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewResponse {
    pub content: String,
    pub tokens_used: u32,
}

/// The provider capability: one logical review call plus a stable name.
#[async_trait]
pub trait Reviewer: Send + Sync + std::fmt::Debug {
    async fn review(
        &self,
        ctx: &CancellationToken,
        req: &ReviewRequest,
    ) -> std::result::Result<ReviewResponse, ProviderError>;

    fn name(&self) -> &str;
}

/// Creates a provider by name. Credentials come from the environment; a
/// missing required key is a configuration error.
pub fn new_provider(provider: &str, model: &str) -> Result<Arc<dyn Reviewer>> {
    match provider {
        "anthropic" => Ok(Arc::new(Anthropic::new(model)?)),
        "openai" => Ok(Arc::new(OpenAi::new(model)?)),
        "gemini" | "google" => Ok(Arc::new(Gemini::new(model)?)),
        "ollama" | "lmstudio" => Ok(Arc::new(Ollama::new(model)?)),
        other => Err(Error::UnknownProvider(other.to_string())),
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("building http client: {e}")))
}

/// Sends a prepared request, aborting promptly on cancellation, and returns
/// the status code and body text.
pub(crate) async fn execute(
    ctx: &CancellationToken,
    request: reqwest::RequestBuilder,
) -> std::result::Result<(u16, String), ProviderError> {
    let response = tokio::select! {
        _ = ctx.cancelled() => return Err(ProviderError::Canceled),
        result = request.send() => {
            result.map_err(|e| ProviderError::Transport(format!("sending request: {e}")))?
        }
    };
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::Transport(format!("reading response: {e}")))?;
    Ok((status, body))
}

/// Classifies an HTTP status uniformly across providers and returns the body
/// on success.
pub(crate) fn check_status(status: u16, body: String) -> std::result::Result<String, ProviderError> {
    match status {
        200 => Ok(body),
        429 => Err(ProviderError::RateLimit),
        401 | 403 => Err(ProviderError::Auth(body)),
        s if s >= 500 => Err(ProviderError::Server { status: s, body }),
        s => Err(ProviderError::Other(format!("API error (status {s}): {body}"))),
    }
}

pub(crate) fn effective_max_tokens(req: &ReviewRequest) -> u32 {
    if req.max_tokens == 0 {
        DEFAULT_MAX_TOKENS
    } else {
        req.max_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_rejected() {
        let err = new_provider("cohere", "command-r").unwrap_err();
        assert!(err.to_string().contains("unknown provider: cohere"));
    }

    #[test]
    fn test_check_status_classification() {
        assert_eq!(check_status(200, "body".into()).unwrap(), "body");
        assert!(matches!(
            check_status(429, String::new()),
            Err(ProviderError::RateLimit)
        ));
        assert!(matches!(
            check_status(401, "denied".into()),
            Err(ProviderError::Auth(_))
        ));
        assert!(matches!(
            check_status(403, "denied".into()),
            Err(ProviderError::Auth(_))
        ));
        assert!(matches!(
            check_status(500, "oops".into()),
            Err(ProviderError::Server { status: 500, .. })
        ));
        assert!(matches!(
            check_status(503, String::new()),
            Err(ProviderError::Server { status: 503, .. })
        ));
        assert!(matches!(
            check_status(404, String::new()),
            Err(ProviderError::Other(_))
        ));
    }

    #[test]
    fn test_effective_max_tokens_default() {
        let mut req = ReviewRequest::default();
        assert_eq!(effective_max_tokens(&req), DEFAULT_MAX_TOKENS);
        req.max_tokens = 8192;
        assert_eq!(effective_max_tokens(&req), 8192);
    }
}
