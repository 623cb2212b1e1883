use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::retry::{ProviderError, RetryPolicy, retry_with_backoff};
use super::{CLOUD_TIMEOUT, ReviewRequest, ReviewResponse, Reviewer};
use crate::error::{Error, Result};

const API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// The Google Gemini generateContent backend.
#[derive(Debug)]
pub struct Gemini {
    api_key: String,
    model: String,
    client: Client,
    retry: RetryPolicy,
}

impl Gemini {
    pub fn new(model: &str) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| {
                Error::Config(
                    "GEMINI_API_KEY (or GOOGLE_API_KEY) environment variable is not set"
                        .to_string(),
                )
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
        payload: &GenerateRequest,
    ) -> std::result::Result<ReviewResponse, ProviderError> {
        let url = format!(
            "{API_URL}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let request = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .json(payload);
        let (status, body) = super::execute(ctx, request).await?;
        let body = super::check_status(status, body)?;
        parse_response(&body)
    }
}

#[async_trait]
impl Reviewer for Gemini {
    async fn review(
        &self,
        ctx: &CancellationToken,
        req: &ReviewRequest,
    ) -> std::result::Result<ReviewResponse, ProviderError> {
        let payload = build_body(req);
        retry_with_backoff(ctx, &self.retry, || self.attempt(ctx, &payload)).await
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

fn build_body(req: &ReviewRequest) -> GenerateRequest {
    GenerateRequest {
        system_instruction: (!req.system_prompt.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: req.system_prompt.clone(),
            }],
        }),
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: req.user_prompt.clone(),
            }],
        }],
        generation_config: GenerationConfig {
            max_output_tokens: super::effective_max_tokens(req),
            temperature: (req.temperature > 0.0).then_some(req.temperature),
        },
    }
}

/// Concatenates the text parts of the first candidate. Missing candidates
/// or parts is an empty-response error.
fn parse_response(body: &str) -> std::result::Result<ReviewResponse, ProviderError> {
    let result: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Other(format!("parsing response: {e}")))?;
    let Some(candidate) = result.candidates.first() else {
        return Err(ProviderError::Empty);
    };
    if candidate.content.parts.is_empty() {
        return Err(ProviderError::Empty);
    }
    let content: String = candidate
        .content
        .parts
        .iter()
        .map(|part| part.text.as_str())
        .collect();
    Ok(ReviewResponse {
        content,
        tokens_used: result.usage_metadata.total_token_count,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: UsageMetadata,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: u32,
}
