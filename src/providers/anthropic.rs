use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::retry::{ProviderError, RetryPolicy, retry_with_backoff};
use super::{CLOUD_TIMEOUT, ReviewRequest, ReviewResponse, Reviewer};
use crate::error::{Error, Result};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// The Anthropic Messages API backend.
#[derive(Debug)]
pub struct Anthropic {
    api_key: String,
    model: String,
    client: Client,
    retry: RetryPolicy,
}

impl Anthropic {
    pub fn new(model: &str) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            Error::Config("ANTHROPIC_API_KEY environment variable is not set".to_string())
        })?;
        Ok(Self {
            api_key,
            model: model.to_string(),
            client: super::http_client(CLOUD_TIMEOUT)?,
            retry: RetryPolicy::default(),
        })
    }

    async fn attempt(
        &self,
        ctx: &CancellationToken,
        payload: &MessagesRequest,
    ) -> std::result::Result<ReviewResponse, ProviderError> {
        let request = self
            .client
            .post(API_URL)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(payload);
        let (status, body) = super::execute(ctx, request).await?;
        let body = super::check_status(status, body)?;
        parse_response(&body)
    }
}

#[async_trait]
impl Reviewer for Anthropic {
    async fn review(
        &self,
        ctx: &CancellationToken,
        req: &ReviewRequest,
    ) -> std::result::Result<ReviewResponse, ProviderError> {
        let payload = build_body(&self.model, req);
        retry_with_backoff(ctx, &self.retry, || self.attempt(ctx, &payload)).await
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

fn build_body(model: &str, req: &ReviewRequest) -> MessagesRequest {
    MessagesRequest {
        model: model.to_string(),
        max_tokens: super::effective_max_tokens(req),
        system: req.system_prompt.clone(),
        messages: vec![Message {
            role: "user".to_string(),
            content: req.user_prompt.clone(),
        }],
    }
}

/// Concatenates the text blocks and sums input and output tokens. A reply
/// with no text blocks counts as empty.
fn parse_response(body: &str) -> std::result::Result<ReviewResponse, ProviderError> {
    let result: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Other(format!("parsing response: {e}")))?;
    let content: String = result
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text.as_str())
        .collect();
    if content.is_empty() {
        return Err(ProviderError::Empty);
    }
    Ok(ReviewResponse {
        content,
        tokens_used: result.usage.input_tokens + result.usage.output_tokens,
    })
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}
