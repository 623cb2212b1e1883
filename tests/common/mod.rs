//! Shared mock providers for integration tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use prism::engine::ProviderFactory;
use prism::error::{Error, Result};
use prism::providers::{ProviderError, ReviewRequest, ReviewResponse, Reviewer};
use tokio_util::sync::CancellationToken;

pub type Responder =
    dyn Fn(&ReviewRequest) -> std::result::Result<ReviewResponse, ProviderError> + Send + Sync;

/// A scripted reviewer: every call is recorded and answered by the
/// responder closure.
pub struct MockReviewer {
    name: String,
    responder: Box<Responder>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<ReviewRequest>>,
}

impl std::fmt::Debug for MockReviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockReviewer").field("name", &self.name).finish()
    }
}

impl MockReviewer {
    pub fn new<F>(name: &str, responder: F) -> Arc<Self>
    where
        F: Fn(&ReviewRequest) -> std::result::Result<ReviewResponse, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A reviewer that always returns the same content.
    pub fn returning(name: &str, content: &str) -> Arc<Self> {
        let content = content.to_string();
        Self::new(name, move |_| {
            Ok(ReviewResponse {
                content: content.clone(),
                tokens_used: 100,
            })
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded_requests(&self) -> Vec<ReviewRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reviewer for MockReviewer {
    async fn review(
        &self,
        ctx: &CancellationToken,
        req: &ReviewRequest,
    ) -> std::result::Result<ReviewResponse, ProviderError> {
        if ctx.is_cancelled() {
            return Err(ProviderError::Canceled);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req.clone());
        (self.responder)(req)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A factory that hands out pre-registered mock reviewers by provider name.
#[derive(Default)]
pub struct MockFactory {
    providers: Mutex<HashMap<String, Arc<MockReviewer>>>,
}

impl MockFactory {
    pub fn with(providers: impl IntoIterator<Item = (&'static str, Arc<MockReviewer>)>) -> Self {
        Self {
            providers: Mutex::new(
                providers
                    .into_iter()
                    .map(|(name, reviewer)| (name.to_string(), reviewer))
                    .collect(),
            ),
        }
    }
}

impl ProviderFactory for MockFactory {
    fn create(&self, provider: &str, _model: &str) -> Result<Arc<dyn Reviewer>> {
        self.providers
            .lock()
            .unwrap()
            .get(provider)
            .cloned()
            .map(|reviewer| reviewer as Arc<dyn Reviewer>)
            .ok_or_else(|| Error::UnknownProvider(provider.to_string()))
    }
}

/// A small diff with one per-file section.
pub fn sample_diff(path: &str) -> String {
    format!(
        "diff --git a/{path} b/{path}\n--- a/{path}\n+++ b/{path}\n@@ -1,2 +1,3 @@\n+let y = 2;\n"
    )
}

/// A findings array with one entry at the given location.
pub fn finding_json(severity: &str, path: &str, start: u32, title: &str) -> String {
    format!(
        r#"[{{"severity":"{severity}","category":"bug","title":"{title}","message":"something is wrong","suggestion":"fix it","confidence":0.9,"path":"{path}","startLine":{start},"endLine":{end},"tags":[]}}]"#,
        end = start + 3
    )
}
