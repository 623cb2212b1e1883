//! Compare mode: the same diff reviewed by several provider:model pairs in
//! parallel, with findings classified as consensus or model-unique via
//! fuzzy matching.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chunk::PromptBuilder;
use crate::config::ReviewConfig;
use crate::engine::ProviderFactory;
use crate::error::{Error, Result};
use crate::parse::{MAX_REVIEW_TOKENS, parse_findings};
use crate::prompt::{build_user_prompt, system_prompt};
use crate::providers::{ReviewRequest, Reviewer};
use crate::redact;
use crate::rules::Rules;
use crate::types::{Category, Finding};

/// Results from a multi-model comparison.
#[derive(Debug, Default)]
pub struct CompareResult {
    /// Findings matched by at least one other model, deduplicated by
    /// `(path, startLine, category)`.
    pub consensus: Vec<Finding>,
    /// Findings only one model reported, keyed by its `provider:model` label.
    pub unique: HashMap<String, Vec<Finding>>,
    /// Consensus entries (once each) plus every unique entry.
    pub all: Vec<Finding>,
    /// Accumulated provider wall-time in milliseconds.
    pub llm_ms: u64,
}

/// Controls how compare-mode prompts are built.
#[derive(Default, Clone)]
pub struct CompareOptions {
    pub builder: Option<Arc<PromptBuilder>>,
}

/// Splits a `provider:model` spec. An empty half is a usage error.
pub fn parse_model_spec(spec: &str) -> Result<(String, String)> {
    match spec.split_once(':') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider.to_string(), model.to_string()))
        }
        _ => Err(Error::ModelSpec {
            spec: spec.to_string(),
        }),
    }
}

/// Runs the diff against every model spec independently and merges the
/// findings. Any spec failing — bad spec, provider construction, review
/// call, or response parse — fails the whole compare with no partial result.
pub async fn run_compare(
    ctx: &CancellationToken,
    diff: &str,
    files: &[String],
    models: &[String],
    cfg: &ReviewConfig,
    rules: Option<&Rules>,
    options: CompareOptions,
    factory: &dyn ProviderFactory,
) -> Result<CompareResult> {
    // Resolve every spec up front so a usage or configuration error surfaces
    // before any provider call is issued.
    let mut providers: Vec<(String, Arc<dyn Reviewer>)> = Vec::with_capacity(models.len());
    for spec in models {
        let (provider_name, model_name) = parse_model_spec(spec)?;
        let provider = factory
            .create(&provider_name, &model_name)
            .map_err(|e| Error::Compare {
                label: spec.clone(),
                source: Box::new(e),
            })?;
        providers.push((spec.clone(), provider));
    }

    info!(models = providers.len(), "running compare-mode review");

    let total_llm_ms = Arc::new(Mutex::new(0u64));
    let mut join_set = JoinSet::new();

    for (index, (label, provider)) in providers.into_iter().enumerate() {
        let diff = diff.to_string();
        let files = files.to_vec();
        let cfg = cfg.clone();
        let rules = rules.cloned();
        let builder = options.builder.clone();
        let total_llm_ms = Arc::clone(&total_llm_ms);
        let ctx = ctx.clone();

        join_set.spawn(async move {
            let redacted = if cfg.privacy.redact_secrets {
                redact::secrets(&diff)
            } else {
                diff
            };
            let (system, user) = match &builder {
                Some(builder) => builder.as_ref()(&redacted, &files, &cfg, rules.as_ref()),
                None => (
                    system_prompt().to_string(),
                    build_user_prompt(
                        &redacted,
                        &files,
                        cfg.max_findings,
                        cfg.fail_on,
                        rules.as_ref(),
                    ),
                ),
            };
            let request = ReviewRequest {
                system_prompt: system,
                user_prompt: user,
                max_tokens: MAX_REVIEW_TOKENS,
                temperature: 0.0,
            };

            let started = Instant::now();
            let response = provider.review(&ctx, &request).await;
            let elapsed = started.elapsed().as_millis() as u64;
            *total_llm_ms.lock().await += elapsed;

            let findings = match response {
                Ok(response) => parse_findings(&response.content).map_err(|e| Error::Compare {
                    label: label.clone(),
                    source: Box::new(e),
                }),
                Err(e) => Err(Error::Compare {
                    label: label.clone(),
                    source: Box::new(Error::Provider(e)),
                }),
            };
            (index, label, findings)
        });
    }

    let mut slots: Vec<Option<(String, Result<Vec<Finding>>)>> =
        std::iter::repeat_with(|| None).take(models.len()).collect();
    while let Some(joined) = join_set.join_next().await {
        let (index, label, findings) = joined.map_err(|e| Error::Task(e.to_string()))?;
        slots[index] = Some((label, findings));
    }

    let mut results = Vec::with_capacity(slots.len());
    for slot in slots {
        let (label, findings) = slot.ok_or_else(|| Error::Task("missing model result".to_string()))?;
        results.push(ModelFindings {
            label,
            findings: findings?,
        });
    }

    let llm_ms = *total_llm_ms.lock().await;
    Ok(merge_results(&results, llm_ms))
}

struct ModelFindings {
    label: String,
    findings: Vec<Finding>,
}

/// Classifies findings across models. A finding is consensus when it fuzzy-
/// matches at least one finding from any other model; otherwise it is unique
/// under its model's label. Consensus entries keep the first model's version
/// in spec order.
fn merge_results(results: &[ModelFindings], llm_ms: u64) -> CompareResult {
    let mut merged = CompareResult {
        llm_ms,
        ..Default::default()
    };
    if results.is_empty() {
        return merged;
    }

    let mut matched: HashSet<(usize, usize)> = HashSet::new();
    for i in 0..results.len() {
        for (fi, f) in results[i].findings.iter().enumerate() {
            for (j, other) in results.iter().enumerate().skip(i + 1) {
                for (gj, g) in other.findings.iter().enumerate() {
                    if fuzzy_match(f, g) {
                        matched.insert((i, fi));
                        matched.insert((j, gj));
                        break;
                    }
                }
            }
        }
    }

    let mut consensus_seen: HashSet<(String, u32, Category)> = HashSet::new();
    for (i, result) in results.iter().enumerate() {
        for (fi, finding) in result.findings.iter().enumerate() {
            if matched.contains(&(i, fi)) {
                let key = (
                    finding.path().to_string(),
                    finding.start_line(),
                    finding.category,
                );
                if consensus_seen.insert(key) {
                    merged.consensus.push(finding.clone());
                    merged.all.push(finding.clone());
                }
            } else {
                merged
                    .unique
                    .entry(result.label.clone())
                    .or_default()
                    .push(finding.clone());
                merged.all.push(finding.clone());
            }
        }
    }

    merged
}

/// Two findings from different models describe the same issue when they
/// share a file, their line ranges overlap, and their titles are similar —
/// or their categories match with at least one shared title word.
fn fuzzy_match(a: &Finding, b: &Finding) -> bool {
    if a.path() != b.path() {
        return false;
    }
    if !lines_overlap(a, b) {
        return false;
    }
    if title_similar(&a.title, &b.title) {
        return true;
    }
    a.category == b.category && any_title_word_overlap(&a.title, &b.title)
}

fn lines_overlap(a: &Finding, b: &Finding) -> bool {
    let la = a.lines();
    let lb = b.lines();
    la.start <= lb.end && lb.start <= la.end
}

/// Titles are similar when they are equal after lowercase+trim, one
/// contains the other, or more than half the words of the shorter title
/// appear in the longer one. Whitespace word splitting, no stemming.
fn title_similar(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    if a == b {
        return true;
    }
    if a.contains(&b) || b.contains(&a) {
        return true;
    }

    let words_a: Vec<&str> = a.split_whitespace().collect();
    let words_b: Vec<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return false;
    }
    let set_b: HashSet<&str> = words_b.iter().copied().collect();
    let overlap = words_a.iter().filter(|w| set_b.contains(*w)).count();
    let min_len = words_a.len().min(words_b.len());
    overlap as f64 / min_len as f64 > 0.5
}

fn any_title_word_overlap(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    if words_a.is_empty() {
        return false;
    }
    b.split_whitespace().any(|w| words_a.contains(w))
}
