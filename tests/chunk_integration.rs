//! Chunked-review behavior: parallel dispatch, per-chunk repair, merge
//! ordering, and failure semantics.

mod common;

use std::sync::Arc;

use common::{MockFactory, MockReviewer, finding_json};
use prism::chunk::{ChunkOptions, run_chunked, split_into_chunks};
use prism::config::ReviewConfig;
use prism::engine::{DiffInput, run_with_factory};
use prism::providers::{ProviderError, ReviewResponse, Reviewer};
use prism::types::Severity;
use tokio_util::sync::CancellationToken;

/// A per-file section padded to roughly `bytes` bytes.
fn big_section(path: &str, bytes: usize) -> String {
    let header =
        format!("diff --git a/{path} b/{path}\n--- a/{path}\n+++ b/{path}\n@@ -1,2 +1,40 @@\n");
    let mut body = String::with_capacity(bytes);
    while header.len() + body.len() < bytes {
        body.push_str("+fn touched() { let value = compute_all_the_things(); }\n");
    }
    format!("{header}{body}")
}

fn chunk_config() -> ReviewConfig {
    ReviewConfig {
        provider: "mock".to_string(),
        model: "mock-model".to_string(),
        max_diff_bytes: 60_000,
        cache: prism::config::CacheConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_chunked_review_with_repair_pass() {
    // Three ~50KB sections with a 60KB budget produce three chunks. Chunk 0
    // returns invalid JSON once and valid JSON on its repair pass; chunks 1
    // and 2 respond normally: exactly four provider calls in total.
    let diff = format!(
        "{}{}{}",
        big_section("file0.rs", 50_000),
        big_section("file1.rs", 50_000),
        big_section("file2.rs", 50_000)
    );
    assert!(diff.len() > 100_000);

    let reviewer = MockReviewer::new("mock", |req| {
        let prompt = &req.user_prompt;
        let content = if prompt.contains("not valid JSON") {
            "[]".to_string()
        } else if prompt.contains("file0.rs") {
            "I think everything is fine?".to_string()
        } else if prompt.contains("file1.rs") {
            finding_json("high", "file1.rs", 12, "Unchecked error")
        } else if prompt.contains("file2.rs") {
            finding_json("low", "file2.rs", 30, "Naming nit")
        } else {
            panic!("unexpected prompt");
        };
        Ok(ReviewResponse {
            content,
            tokens_used: 50,
        })
    });
    let factory = MockFactory::with([("mock", reviewer.clone())]);

    let ctx = CancellationToken::new();
    let input = DiffInput {
        diff,
        files: vec![
            "file0.rs".to_string(),
            "file1.rs".to_string(),
            "file2.rs".to_string(),
        ],
        mode: "unstaged".to_string(),
        range: String::new(),
        repo: Default::default(),
    };
    let report = run_with_factory(&ctx, &input, &chunk_config(), &factory)
        .await
        .unwrap();

    assert_eq!(reviewer.call_count(), 4);
    assert_eq!(report.findings.len(), 2);
    // Sorted by severity: the high-severity finding first.
    assert_eq!(report.findings[0].severity, Severity::High);
    assert_eq!(report.findings[0].path(), "file1.rs");
    assert_eq!(report.findings[1].path(), "file2.rs");
}

#[tokio::test]
async fn test_chunk_failure_discards_partial_results() {
    let diff = format!(
        "{}{}",
        big_section("ok.rs", 40_000),
        big_section("bad.rs", 40_000)
    );
    let chunks = split_into_chunks(&diff, 40_000);
    assert_eq!(chunks.len(), 2);

    let reviewer = MockReviewer::new("mock", |req| {
        if req.user_prompt.contains("bad.rs") {
            Err(ProviderError::Transport("connection reset".to_string()))
        } else {
            Ok(ReviewResponse {
                content: finding_json("high", "ok.rs", 1, "Found"),
                tokens_used: 10,
            })
        }
    });

    let ctx = CancellationToken::new();
    let cfg = chunk_config();
    let (outcome, _llm_ms) = run_chunked(
        &ctx,
        chunks,
        reviewer.clone() as Arc<dyn Reviewer>,
        &cfg,
        None,
        ChunkOptions::default(),
    )
    .await;

    let err = outcome.unwrap_err();
    assert!(err.to_string().starts_with("chunk 1:"));
    assert!(err.to_string().contains("connection reset"));
}

#[tokio::test]
async fn test_chunk_merge_dedupes_overlapping_findings() {
    // Both chunks report the same (path, title, startLine) triple; the
    // shared id collapses them to one.
    let diff = format!(
        "{}{}",
        big_section("a.rs", 40_000),
        big_section("b.rs", 40_000)
    );
    let chunks = split_into_chunks(&diff, 40_000);
    assert_eq!(chunks.len(), 2);

    let reviewer = MockReviewer::new("mock", |_| {
        Ok(ReviewResponse {
            content: finding_json("medium", "shared.rs", 7, "Duplicate issue"),
            tokens_used: 10,
        })
    });

    let ctx = CancellationToken::new();
    let cfg = chunk_config();
    let (outcome, _) = run_chunked(
        &ctx,
        chunks,
        reviewer as Arc<dyn Reviewer>,
        &cfg,
        None,
        ChunkOptions::default(),
    )
    .await;

    let findings = outcome.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].path(), "shared.rs");
}

#[tokio::test]
async fn test_chunked_merge_sorts_across_chunks() {
    let diff = format!(
        "{}{}",
        big_section("z.rs", 40_000),
        big_section("a.rs", 40_000)
    );
    let chunks = split_into_chunks(&diff, 40_000);

    let reviewer = MockReviewer::new("mock", |req| {
        let content = if req.user_prompt.contains("z.rs") {
            finding_json("medium", "z.rs", 1, "In z")
        } else {
            finding_json("medium", "a.rs", 1, "In a")
        };
        Ok(ReviewResponse {
            content,
            tokens_used: 10,
        })
    });

    let ctx = CancellationToken::new();
    let cfg = chunk_config();
    let (outcome, _) = run_chunked(
        &ctx,
        chunks,
        reviewer as Arc<dyn Reviewer>,
        &cfg,
        None,
        ChunkOptions::default(),
    )
    .await;

    let findings = outcome.unwrap();
    // Equal severity: path order decides.
    assert_eq!(findings[0].path(), "a.rs");
    assert_eq!(findings[1].path(), "z.rs");
}

#[tokio::test]
async fn test_custom_prompt_builder_overrides_default() {
    let diff = big_section("lib.rs", 40_000);
    let chunks = split_into_chunks(&diff, 40_000);

    let reviewer = MockReviewer::returning("mock", "[]");
    let ctx = CancellationToken::new();
    let cfg = chunk_config();
    let options = ChunkOptions {
        builder: Some(Arc::new(|chunk_diff: &str, files: &[String], _cfg, _rules| {
            (
                "custom system".to_string(),
                format!("custom prompt over {} files:\n{chunk_diff}", files.len()),
            )
        })),
    };

    let (outcome, _) = run_chunked(
        &ctx,
        chunks,
        reviewer.clone() as Arc<dyn Reviewer>,
        &cfg,
        None,
        options,
    )
    .await;

    outcome.unwrap();
    let requests = reviewer.recorded_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].system_prompt, "custom system");
    assert!(requests[0].user_prompt.starts_with("custom prompt over 1 files:"));
}

#[tokio::test]
async fn test_cancellation_stops_pending_chunks() {
    let diff = format!(
        "{}{}",
        big_section("a.rs", 40_000),
        big_section("b.rs", 40_000)
    );
    let chunks = split_into_chunks(&diff, 40_000);

    let reviewer = MockReviewer::returning("mock", "[]");
    let ctx = CancellationToken::new();
    ctx.cancel();

    let cfg = chunk_config();
    let (outcome, llm_ms) = run_chunked(
        &ctx,
        chunks,
        reviewer.clone() as Arc<dyn Reviewer>,
        &cfg,
        None,
        ChunkOptions::default(),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(reviewer.call_count(), 0);
    assert_eq!(llm_ms, 0);
}

#[tokio::test]
async fn test_wall_time_reported_on_failure() {
    let diff = big_section("only.rs", 40_000);
    let chunks = split_into_chunks(&diff, 40_000);

    let reviewer = MockReviewer::new("mock", |_| {
        Err(ProviderError::Transport("boom".to_string()))
    });

    let ctx = CancellationToken::new();
    let cfg = chunk_config();
    let (outcome, _llm_ms) = run_chunked(
        &ctx,
        chunks,
        reviewer.clone() as Arc<dyn Reviewer>,
        &cfg,
        None,
        ChunkOptions::default(),
    )
    .await;

    // The call was issued and timed even though the review failed.
    assert!(outcome.is_err());
    assert_eq!(reviewer.call_count(), 1);
}
