//! Splitting large diffs into per-file chunks and reviewing them in
//! parallel with bounded concurrency.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ReviewConfig;
use crate::error::{Error, Result};
use crate::parse::review_findings;
use crate::prompt::{build_user_prompt, system_prompt};
use crate::providers::Reviewer;
use crate::rules::Rules;
use crate::types::{Finding, dedupe_findings, sort_findings};

/// Byte size above which a diff is reviewed in chunks.
pub const CHUNK_THRESHOLD: usize = 100_000;

/// Maximum concurrent provider calls per chunked review.
const MAX_CONCURRENCY: usize = 4;

/// A portion of a diff reviewed independently: one or more complete
/// per-file sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub diff: String,
    pub files: Vec<String>,
}

/// True when the diff is large enough to benefit from chunked review.
pub fn needs_chunking(diff: &str) -> bool {
    diff.len() > CHUNK_THRESHOLD
}

/// Splits a diff into chunks of complete per-file sections, packing greedily
/// up to `max_bytes` per chunk. A section is never split, even when it alone
/// exceeds the budget.
pub fn split_into_chunks(diff: &str, max_bytes: usize) -> Vec<Chunk> {
    let sections = split_sections(diff);
    if sections.is_empty() {
        return Vec::new();
    }

    let max_bytes = if max_bytes == 0 { CHUNK_THRESHOLD } else { max_bytes };

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_files = Vec::new();
    let mut index = 0;

    for section in sections {
        if !current.is_empty() && current.len() + section.len() > max_bytes {
            chunks.push(Chunk {
                index,
                diff: std::mem::take(&mut current),
                files: std::mem::take(&mut current_files),
            });
            index += 1;
        }
        if let Some(path) = path_from_section(&section) {
            current_files.push(path);
        }
        current.push_str(&section);
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            index,
            diff: current,
            files: current_files,
        });
    }

    chunks
}

/// Builds the `(system, user)` prompt pair for one chunk.
pub type PromptBuilder =
    dyn Fn(&str, &[String], &ReviewConfig, Option<&Rules>) -> (String, String) + Send + Sync;

/// Controls how chunked review is performed.
#[derive(Default, Clone)]
pub struct ChunkOptions {
    /// Overrides the standard diff-review prompts. Used by codebase review.
    pub builder: Option<Arc<PromptBuilder>>,
}

fn default_prompt_builder(
    chunk_diff: &str,
    files: &[String],
    cfg: &ReviewConfig,
    rules: Option<&Rules>,
) -> (String, String) {
    (
        system_prompt().to_string(),
        build_user_prompt(chunk_diff, files, cfg.max_findings, cfg.fail_on, rules),
    )
}

/// Reviews chunks in parallel (at most four in flight) and merges findings
/// in ascending chunk order, deduplicated by id and sorted by severity,
/// path, and line.
///
/// Any chunk failure fails the whole review; partial results are discarded.
/// The second element of the returned pair is the accumulated provider
/// wall-time in milliseconds, valid even when the review failed.
pub async fn run_chunked(
    ctx: &CancellationToken,
    chunks: Vec<Chunk>,
    provider: Arc<dyn Reviewer>,
    cfg: &ReviewConfig,
    rules: Option<&Rules>,
    options: ChunkOptions,
) -> (Result<Vec<Finding>>, u64) {
    let count = chunks.len();
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENCY));
    let total_llm_ms = Arc::new(Mutex::new(0u64));
    let mut join_set = JoinSet::new();

    for chunk in chunks {
        let (system, user) = match &options.builder {
            Some(builder) => builder.as_ref()(&chunk.diff, &chunk.files, cfg, rules),
            None => default_prompt_builder(&chunk.diff, &chunk.files, cfg, rules),
        };
        let provider = Arc::clone(&provider);
        let semaphore = Arc::clone(&semaphore);
        let total_llm_ms = Arc::clone(&total_llm_ms);
        let ctx = ctx.clone();
        let index = chunk.index;

        join_set.spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("concurrency semaphore closed unexpectedly");
            if ctx.is_cancelled() {
                return (index, Err(Error::Provider(
                    crate::providers::ProviderError::Canceled,
                )));
            }

            debug!(chunk = index, "reviewing chunk");
            let started = Instant::now();
            let result = review_findings(provider.as_ref(), &ctx, &system, &user).await;
            let elapsed = started.elapsed().as_millis() as u64;
            *total_llm_ms.lock().await += elapsed;

            (index, result)
        });
    }

    let mut slots: Vec<Option<Result<Vec<Finding>>>> = std::iter::repeat_with(|| None)
        .take(count)
        .collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => {
                let total = *total_llm_ms.lock().await;
                return (Err(Error::Task(e.to_string())), total);
            }
        }
    }

    let total = *total_llm_ms.lock().await;

    // Merge in ascending chunk order; the first failing chunk fails the run.
    let mut merged = Vec::new();
    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(Ok(findings)) => merged.extend(findings),
            Some(Err(e)) => {
                return (
                    Err(Error::Chunk {
                        index,
                        source: Box::new(e),
                    }),
                    total,
                );
            }
            None => return (Err(Error::Task("missing chunk result".to_string())), total),
        }
    }

    let mut merged = dedupe_findings(merged);
    sort_findings(&mut merged);
    (Ok(merged), total)
}

fn split_sections(diff: &str) -> Vec<String> {
    if diff.trim().is_empty() {
        return Vec::new();
    }
    let mut sections = Vec::new();
    let mut current = String::new();
    for line in diff.split('\n') {
        if line.starts_with("diff --git") && !current.is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }
    sections
}

fn path_from_section(section: &str) -> Option<String> {
    section
        .lines()
        .find_map(|line| line.strip_prefix("+++ b/"))
        .map(str::to_string)
}
