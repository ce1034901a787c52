use crate::error::{AnalysisError, AnalysisResult};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline and cancellation scope shared by every task of one request.
///
/// Child scopes see the parent's cancellation and deadline; cancelling a child
/// never reaches the parent or its siblings.
#[derive(Debug, Clone)]
pub struct RequestContext {
    id: String,
    deadline: Instant,
    budget: Duration,
    cancel: Arc<watch::Sender<bool>>,
    ancestors: Vec<watch::Receiver<bool>>,
    corpus_nanos: Arc<AtomicU64>,
}

impl RequestContext {
    pub fn new(id: impl Into<String>, budget: Duration) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            id: id.into(),
            deadline: Instant::now() + budget,
            budget,
            cancel: Arc::new(cancel),
            ancestors: Vec::new(),
            corpus_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn child(&self) -> Self {
        let (cancel, _) = watch::channel(false);
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.cancel.subscribe());
        Self {
            id: self.id.clone(),
            deadline: self.deadline,
            budget: self.budget,
            cancel: Arc::new(cancel),
            ancestors,
            corpus_nanos: Arc::clone(&self.corpus_nanos),
        }
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.ancestors.iter().any(|scope| *scope.borrow())
    }

    /// Resolves once this scope or one of its ancestors is cancelled.
    async fn cancelled(&self) {
        let mut scopes = self.ancestors.clone();
        scopes.push(self.cancel.subscribe());
        let waits = scopes.into_iter().map(|mut scope| {
            Box::pin(async move {
                let cancelled = scope.wait_for(|flag| *flag).await.is_ok();
                if !cancelled {
                    // scope dropped without being cancelled
                    std::future::pending::<()>().await;
                }
            })
        });
        futures_util::future::select_all(waits).await;
    }

    /// Adds to the time this request spent reading the domain corpus.
    pub fn record_corpus_time(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.corpus_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn corpus_time(&self) -> Duration {
        Duration::from_nanos(self.corpus_nanos.load(Ordering::Relaxed))
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Drives `fut` until it finishes, the scope is cancelled, or the deadline passes.
    pub async fn run<F, T>(&self, fut: F) -> AnalysisResult<T>
    where
        F: Future<Output = AnalysisResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(AnalysisError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(AnalysisError::Timeout(self.budget)),
            result = fut => result,
        }
    }

    /// Like [`run`](Self::run) with an extra, tighter per-call limit.
    pub async fn run_with_limit<F, T>(&self, limit: Duration, fut: F) -> AnalysisResult<T>
    where
        F: Future<Output = AnalysisResult<T>>,
    {
        self.run(async move {
            tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| AnalysisError::Timeout(limit))?
        })
        .await
    }
}
