use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::Threshold;

/// Review engine configuration. Built by the caller (CLI, config file layer)
/// and handed in per run; the engine never persists it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReviewConfig {
    /// Provider name (anthropic, openai, gemini, ollama, ...).
    pub provider: String,
    /// Model identifier passed through to the provider.
    pub model: String,
    /// Severity at or above which the caller's gating should fail.
    pub fail_on: Threshold,
    /// Maximum findings kept in the report. 0 disables the limit.
    pub max_findings: usize,
    /// Per-chunk byte budget when a large diff is split.
    pub max_diff_bytes: usize,
    /// Optional rules pack (JSON) applied to prompts and severities.
    pub rules_file: Option<PathBuf>,
    pub cache: CacheConfig,
    pub privacy: PrivacyConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Cache directory; empty means the platform default.
    pub dir: Option<PathBuf>,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrivacyConfig {
    pub redact_secrets: bool,
    /// Paths whose entire content is replaced before leaving the process.
    pub redact_paths: Vec<String>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            fail_on: Threshold::None,
            max_findings: 50,
            max_diff_bytes: 500_000,
            rules_file: None,
            cache: CacheConfig::default(),
            privacy: PrivacyConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            ttl_seconds: 86_400,
        }
    }
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            redact_secrets: true,
            redact_paths: vec!["**/.env".to_string(), "**/*secrets*".to_string()],
        }
    }
}

const KNOWN_PROVIDERS: &[&str] = &["anthropic", "openai", "gemini", "google", "ollama", "lmstudio"];

/// Parse a configuration from TOML text and validate it.
pub fn parse_config(content: &str) -> Result<ReviewConfig> {
    let config: ReviewConfig = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ReviewConfig) -> Result<()> {
    if !KNOWN_PROVIDERS.contains(&config.provider.as_str()) {
        return Err(Error::ConfigValidation(format!(
            "unknown provider: {} (expected: {})",
            config.provider,
            KNOWN_PROVIDERS.join(", ")
        )));
    }
    if config.model.is_empty() {
        return Err(Error::ConfigValidation("model must not be empty".to_string()));
    }
    if config.max_diff_bytes == 0 {
        return Err(Error::ConfigValidation(
            "max_diff_bytes must be > 0".to_string(),
        ));
    }
    Ok(())
}
