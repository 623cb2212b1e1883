use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::openai::{build_chat_body, parse_chat_response};
use super::retry::{ProviderError, RetryPolicy, retry_with_backoff};
use super::{LOCAL_TIMEOUT, ReviewRequest, ReviewResponse, Reviewer};
use crate::error::Result;

const DEFAULT_HOST: &str = "http://localhost:11434";

/// Backend for Ollama and LM Studio, which speak the OpenAI-compatible
/// chat-completions protocol locally. No API key is required by default;
/// `PRISM_OLLAMA_API_KEY` is sent as a bearer token when present.
#[derive(Debug)]
pub struct Ollama {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl Ollama {
    pub fn new(model: &str) -> Result<Self> {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let api_key = std::env::var("PRISM_OLLAMA_API_KEY").unwrap_or_default();
        Ok(Self {
            api_key,
            model: model.to_string(),
            base_url: normalize_base_url(&host),
            client: super::http_client(LOCAL_TIMEOUT)?,
            retry: RetryPolicy::default(),
        })
    }

    async fn attempt(
        &self,
        ctx: &CancellationToken,
        payload: &super::openai::ChatRequest,
    ) -> std::result::Result<ReviewResponse, ProviderError> {
        let mut request = self
            .client
            .post(&self.base_url)
            .header("content-type", "application/json")
            .json(payload);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let (status, body) = super::execute(ctx, request).await?;
        let body = super::check_status(status, body)?;
        parse_chat_response(&body)
    }
}

#[async_trait]
impl Reviewer for Ollama {
    async fn review(
        &self,
        ctx: &CancellationToken,
        req: &ReviewRequest,
    ) -> std::result::Result<ReviewResponse, ProviderError> {
        let payload = build_chat_body(&self.model, req);
        retry_with_backoff(ctx, &self.retry, || self.attempt(ctx, &payload)).await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Normalizes a host URL to end in `/v1/chat/completions` exactly once,
/// whatever tail the user configured.
fn normalize_base_url(raw: &str) -> String {
    let mut base = raw.trim_end_matches('/');
    base = base.strip_suffix("/v1/chat/completions").unwrap_or(base);
    base = base.strip_suffix("/v1").unwrap_or(base);
    format!("{base}/v1/chat/completions")
}
