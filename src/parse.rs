//! Turning raw provider text into findings, with a single repair pass when
//! the model's output is not a valid JSON array.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};
use crate::providers::{ReviewRequest, Reviewer};
use crate::types::{Finding, LineRange, Location, generate_finding_id};

/// Token budget for a review call and its repair pass.
pub(crate) const MAX_REVIEW_TOKENS: u32 = 8192;

/// The JSON structure the model is asked to return per finding.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFinding {
    severity: crate::types::Severity,
    category: crate::types::Category,
    #[serde(default)]
    title: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    suggestion: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    path: String,
    #[serde(default)]
    start_line: u32,
    #[serde(default)]
    end_line: u32,
    #[serde(default)]
    tags: Vec<String>,
}

/// Parses provider output into findings. Strips a surrounding markdown code
/// fence if present, then decodes a JSON array of findings.
pub fn parse_findings(content: &str) -> Result<Vec<Finding>> {
    let content = strip_code_fence(content.trim());
    let raw: Vec<RawFinding> =
        serde_json::from_str(&content).map_err(|e| Error::Parse(e.to_string()))?;
    Ok(raw.into_iter().map(materialize).collect())
}

fn materialize(raw: RawFinding) -> Finding {
    let mut finding = Finding {
        id: String::new(),
        severity: raw.severity,
        category: raw.category,
        title: raw.title,
        message: raw.message,
        suggestion: (!raw.suggestion.is_empty()).then_some(raw.suggestion),
        confidence: raw.confidence,
        locations: vec![Location {
            path: raw.path,
            hunk: None,
            lines: LineRange {
                start: raw.start_line,
                end: raw.end_line,
            },
            commit: None,
            snippet: None,
        }],
        tags: raw.tags,
        references: Vec::new(),
    };
    finding.id = generate_finding_id(&finding);
    finding
}

/// Removes a wrapping triple-backtick fence: the opening fence line (with
/// any language tag) and a trailing closing fence line.
fn strip_code_fence(content: &str) -> String {
    if !content.starts_with("```") {
        return content.to_string();
    }
    let lines: Vec<&str> = content.split('\n').collect();
    if lines.len() < 2 {
        return content.to_string();
    }
    let mut end = lines.len();
    if lines[end - 1].trim() == "```" {
        end -= 1;
    }
    lines[1..end].join("\n")
}

fn repair_prompt(parse_error: &Error, previous: &str) -> String {
    format!(
        "Your previous response was not valid JSON. The error was: {parse_error}\n\n\
         Please fix it and respond with ONLY a valid JSON array of findings.\n\n\
         Your previous response was:\n{previous}"
    )
}

/// One review call plus parsing, with exactly one repair pass: on a parse
/// failure the provider is re-invoked with the error and its previous
/// response, and asked for a pure JSON array. A failing repair pass
/// surfaces the original parse error; a second repair pass is never
/// attempted.
pub async fn review_findings(
    provider: &dyn Reviewer,
    ctx: &CancellationToken,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<Vec<Finding>> {
    let request = ReviewRequest {
        system_prompt: system_prompt.to_string(),
        user_prompt: user_prompt.to_string(),
        max_tokens: MAX_REVIEW_TOKENS,
        temperature: 0.0,
    };
    let response = provider.review(ctx, &request).await?;

    let parse_error = match parse_findings(&response.content) {
        Ok(findings) => return Ok(findings),
        Err(e) => e,
    };

    warn!(
        provider = provider.name(),
        error = %parse_error,
        "response was not a valid findings array, attempting repair"
    );
    let repair_request = ReviewRequest {
        system_prompt: system_prompt.to_string(),
        user_prompt: repair_prompt(&parse_error, &response.content),
        max_tokens: MAX_REVIEW_TOKENS,
        temperature: 0.0,
    };
    let repair_response = provider
        .review(ctx, &repair_request)
        .await
        .map_err(|e| Error::Repair {
            error: e.to_string(),
            original: parse_error.to_string(),
        })?;

    parse_findings(&repair_response.content)
        .map_err(|e| Error::RepairValidation(e.to_string()))
}
