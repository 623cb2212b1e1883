use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::retry::{ProviderError, RetryPolicy, retry_with_backoff};
use super::{CLOUD_TIMEOUT, ReviewRequest, ReviewResponse, Reviewer};
use crate::error::{Error, Result};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// The OpenAI chat-completions backend. The endpoint is overridable via
/// `PRISM_OPENAI_BASE_URL` for proxies and self-hosted gateways.
#[derive(Debug)]
pub struct OpenAi {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl OpenAi {
    pub fn new(model: &str) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            Error::Config("OPENAI_API_KEY environment variable is not set".to_string())
        })?;
        let base_url = std::env::var("PRISM_OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Ok(Self {
            api_key,
            model: model.to_string(),
            base_url,
            client: super::http_client(CLOUD_TIMEOUT)?,
            retry: RetryPolicy::default(),
        })
    }

    async fn attempt(
        &self,
        ctx: &CancellationToken,
        payload: &ChatRequest,
    ) -> std::result::Result<ReviewResponse, ProviderError> {
        let request = self
            .client
            .post(&self.base_url)
            .header("content-type", "application/json")
            .bearer_auth(&self.api_key)
            .json(payload);
        let (status, body) = super::execute(ctx, request).await?;
        let body = super::check_status(status, body)?;
        parse_chat_response(&body)
    }
}

#[async_trait]
impl Reviewer for OpenAi {
    async fn review(
        &self,
        ctx: &CancellationToken,
        req: &ReviewRequest,
    ) -> std::result::Result<ReviewResponse, ProviderError> {
        let payload = build_chat_body(&self.model, req);
        retry_with_backoff(ctx, &self.retry, || self.attempt(ctx, &payload)).await
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Builds the chat-completions request shared by every OpenAI-compatible
/// backend: system + user messages, max_tokens, optional temperature.
pub(super) fn build_chat_body(model: &str, req: &ReviewRequest) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: req.system_prompt.clone(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: req.user_prompt.clone(),
            },
        ],
        max_tokens: super::effective_max_tokens(req),
        temperature: (req.temperature > 0.0).then_some(req.temperature),
    }
}

/// Extracts `choices[0].message.content`. Missing choices or empty content
/// is an empty-response error.
pub(super) fn parse_chat_response(
    body: &str,
) -> std::result::Result<ReviewResponse, ProviderError> {
    let result: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Other(format!("parsing response: {e}")))?;
    let Some(choice) = result.choices.first() else {
        return Err(ProviderError::Empty);
    };
    if choice.message.content.is_empty() {
        return Err(ProviderError::Empty);
    }
    Ok(ReviewResponse {
        content: choice.message.content.clone(),
        tokens_used: result.usage.total_tokens,
    })
}

#[derive(Debug, Serialize)]
pub(super) struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: ChatMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u32,
}
