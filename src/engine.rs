//! Top-level review orchestration: redaction, cache lookup, dispatch
//! (single-shot or chunked), rule application, and report assembly.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{Cache, build_cache_key};
use crate::chunk::{ChunkOptions, needs_chunking, run_chunked, split_into_chunks};
use crate::compare::{CompareOptions, CompareResult, run_compare};
use crate::config::ReviewConfig;
use crate::error::Result;
use crate::parse::review_findings;
use crate::prompt::{build_user_prompt, system_prompt};
use crate::providers::{Reviewer, new_provider};
use crate::redact;
use crate::rules::{apply_severity_overrides, load_rules};
use crate::types::{
    Finding, InputInfo, Report, RepoInfo, Timing, compute_summary, generate_run_id,
};

pub const TOOL_NAME: &str = "prism";
const REPORT_VERSION: &str = "1.0";

/// A prepared diff handed in by the extraction layer. The engine reads the
/// diff text opaquely.
#[derive(Debug, Clone, Default)]
pub struct DiffInput {
    /// Unified-diff text with `diff --git` per-file sections.
    pub diff: String,
    /// Paths touched by the diff, relative to the repository root.
    pub files: Vec<String>,
    /// How the diff was collected (staged, unstaged, commit, range, ...).
    pub mode: String,
    /// Revision range, when `mode` involves one.
    pub range: String,
    pub repo: RepoInfo,
}

/// Creates providers for the engine. The default implementation builds real
/// HTTP backends; tests substitute mocks.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, provider: &str, model: &str) -> Result<Arc<dyn Reviewer>>;
}

/// Factory backed by [`new_provider`].
#[derive(Debug, Default)]
pub struct DefaultProviderFactory;

impl ProviderFactory for DefaultProviderFactory {
    fn create(&self, provider: &str, model: &str) -> Result<Arc<dyn Reviewer>> {
        new_provider(provider, model)
    }
}

/// Executes a review for the prepared diff.
pub async fn run(ctx: &CancellationToken, diff: &DiffInput, cfg: &ReviewConfig) -> Result<Report> {
    run_with_factory(ctx, diff, cfg, &DefaultProviderFactory).await
}

/// [`run`] with an injected provider factory.
pub async fn run_with_factory(
    ctx: &CancellationToken,
    diff: &DiffInput,
    cfg: &ReviewConfig,
    factory: &dyn ProviderFactory,
) -> Result<Report> {
    let started = Instant::now();

    let redacted = if cfg.privacy.redact_secrets {
        redact::secrets(&diff.diff)
    } else {
        diff.diff.clone()
    };

    if redacted.trim().is_empty() {
        info!("diff is empty, skipping review");
        return Ok(build_report(diff, Vec::new(), 0, elapsed_ms(started)));
    }

    // Cache failures downgrade to an uncached run, never to an error.
    let cache = Cache::new(cfg.cache.enabled, cfg.cache.dir.as_deref(), cfg.cache.ttl_seconds)
        .unwrap_or_else(|e| {
            warn!(error = %e, "cache unavailable, continuing without it");
            Cache::disabled()
        });
    let cache_key = build_cache_key(&cfg.provider, &cfg.model, &redacted);

    let mut findings: Option<Vec<Finding>> = None;
    if let Some(cached) = cache.get(&cache_key) {
        match serde_json::from_str::<Vec<Finding>>(&cached) {
            Ok(parsed) => {
                debug!(findings = parsed.len(), "cache hit");
                findings = Some(parsed);
            }
            Err(e) => debug!(error = %e, "cached entry is corrupt, ignoring"),
        }
    }

    let rules = load_rules(cfg.rules_file.as_deref())?;

    let mut llm_ms = 0u64;
    if findings.is_none() {
        let provider = factory.create(&cfg.provider, &cfg.model)?;

        let reviewed = if needs_chunking(&redacted) {
            let chunks = split_into_chunks(&redacted, cfg.max_diff_bytes);
            info!(
                chunks = chunks.len(),
                bytes = redacted.len(),
                "diff exceeds chunk threshold, reviewing in parallel"
            );
            let (outcome, chunk_ms) = run_chunked(
                ctx,
                chunks,
                provider,
                cfg,
                rules.as_ref(),
                ChunkOptions::default(),
            )
            .await;
            llm_ms = chunk_ms;
            outcome?
        } else {
            let user_prompt = build_user_prompt(
                &redacted,
                &diff.files,
                cfg.max_findings,
                cfg.fail_on,
                rules.as_ref(),
            );
            let llm_start = Instant::now();
            let reviewed =
                review_findings(provider.as_ref(), ctx, system_prompt(), &user_prompt).await?;
            llm_ms = elapsed_ms(llm_start);
            reviewed
        };

        if let Ok(json) = serde_json::to_string(&reviewed) {
            if let Err(e) = cache.put(&cache_key, &json) {
                debug!(error = %e, "cache write failed");
            }
        }
        findings = Some(reviewed);
    }

    let mut findings = apply_severity_overrides(findings.unwrap_or_default(), rules.as_ref());
    if cfg.max_findings > 0 && findings.len() > cfg.max_findings {
        findings.truncate(cfg.max_findings);
    }

    Ok(build_report(diff, findings, llm_ms, elapsed_ms(started)))
}

/// Runs compare mode for the prepared diff: every `provider:model` spec
/// reviews the diff independently and the merged findings become the report.
/// The cache is not consulted.
pub async fn run_compare_mode(
    ctx: &CancellationToken,
    diff: &DiffInput,
    models: &[String],
    cfg: &ReviewConfig,
) -> Result<(Report, CompareResult)> {
    run_compare_mode_with_factory(ctx, diff, models, cfg, &DefaultProviderFactory).await
}

/// [`run_compare_mode`] with an injected provider factory.
pub async fn run_compare_mode_with_factory(
    ctx: &CancellationToken,
    diff: &DiffInput,
    models: &[String],
    cfg: &ReviewConfig,
    factory: &dyn ProviderFactory,
) -> Result<(Report, CompareResult)> {
    let started = Instant::now();
    let rules = load_rules(cfg.rules_file.as_deref())?;

    let result = run_compare(
        ctx,
        &diff.diff,
        &diff.files,
        models,
        cfg,
        rules.as_ref(),
        CompareOptions::default(),
        factory,
    )
    .await?;

    let mut findings = result.all.clone();
    if cfg.max_findings > 0 && findings.len() > cfg.max_findings {
        findings.truncate(cfg.max_findings);
    }

    let report = build_report(diff, findings, result.llm_ms, elapsed_ms(started));
    Ok((report, result))
}

/// Assembles the canonical report around a finding list.
pub fn build_report(diff: &DiffInput, findings: Vec<Finding>, llm_ms: u64, total_ms: u64) -> Report {
    Report {
        tool: TOOL_NAME.to_string(),
        version: REPORT_VERSION.to_string(),
        run_id: generate_run_id(),
        repo: diff.repo.clone(),
        inputs: InputInfo {
            mode: diff.mode.clone(),
            range: diff.range.clone(),
            ..Default::default()
        },
        summary: compute_summary(&findings),
        findings,
        timing: Timing {
            git_ms: 0,
            llm_ms,
            total_ms,
        },
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
