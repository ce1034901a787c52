//! Link extraction, redirect resolution and reputation lookup.

pub mod extract;
pub mod urlscan;
pub mod verdict;

use crate::context::RequestContext;
use crate::error::AnalysisError;
use crate::events::{AnalysisEvent, EventSender};
use crate::scoring;
use crate::url_resolver::LinkResolver;
use extract::UrlExtractor;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use urlscan::{lookup_verdict, ScanIndex};
use verdict::Verdict;

pub const STATUS_CLEAN: &str = "Clean";
pub const STATUS_MALICIOUS: &str = "MaliciousURLsDetected";
pub const STATUS_DISABLED: &str = "Disabled";
pub const STATUS_ERROR: &str = "Error";

/// Payload of the `urlScanStarted` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlScanStarted {
    pub total: usize,
}

/// Payload of the `urlScanResult` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlScanUpdate {
    pub url: String,
    pub final_decision: bool,
    pub report: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of the `urlAnalysis` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlAnalysisResult {
    pub status: String,
    pub message: String,
    pub malicious_count: usize,
    pub score_impact: i32,
    pub url_verdicts: Vec<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UrlAnalysisResult {
    pub fn disabled() -> Self {
        Self {
            status: STATUS_DISABLED.to_string(),
            message: "URL scanning is disabled.".to_string(),
            malicious_count: 0,
            score_impact: scoring::impact(scoring::MALICIOUS_URL_FOUND),
            url_verdicts: Vec::new(),
            error: None,
        }
    }

    pub fn failed(error: &AnalysisError) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            message: "URL analysis could not be completed.".to_string(),
            malicious_count: 0,
            score_impact: 0,
            url_verdicts: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UrlPipelineSettings {
    pub scanning_enabled: bool,
    pub redirect_timeout: Duration,
    pub poll_interval: Duration,
    pub max_urls: usize,
}

impl Default for UrlPipelineSettings {
    fn default() -> Self {
        Self {
            scanning_enabled: true,
            redirect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            max_urls: 50,
        }
    }
}

pub struct UrlPipeline {
    extractor: UrlExtractor,
    resolver: Arc<dyn LinkResolver>,
    index: Arc<dyn ScanIndex>,
    settings: UrlPipelineSettings,
}

impl UrlPipeline {
    pub fn new(
        resolver: Arc<dyn LinkResolver>,
        index: Arc<dyn ScanIndex>,
        settings: UrlPipelineSettings,
    ) -> Self {
        Self {
            extractor: UrlExtractor::new(),
            resolver,
            index,
            settings,
        }
    }

    pub async fn analyze(
        &self,
        ctx: &RequestContext,
        text: &str,
        html: &str,
        events: &EventSender,
    ) -> UrlAnalysisResult {
        if !self.settings.scanning_enabled {
            return UrlAnalysisResult::disabled();
        }

        let mut candidates = self.extractor.extract(text, html);
        if candidates.len() > self.settings.max_urls {
            log::warn!(
                "[{}] {} URLs found, scanning the first {}",
                ctx.id(),
                candidates.len(),
                self.settings.max_urls
            );
            candidates = candidates.into_iter().take(self.settings.max_urls).collect();
        }
        log::debug!("[{}] {} candidate URLs", ctx.id(), candidates.len());

        let resolved = self.resolve_all(ctx, candidates).await;
        let _ = events.send(AnalysisEvent::UrlScanStarted(UrlScanStarted {
            total: resolved.len(),
        }));

        let total = resolved.len();
        let (verdicts, failures) = self.scan_all(ctx, resolved, events).await;
        aggregate(total, verdicts, failures)
    }

    /// Final destinations of the candidates; links that fail to resolve are dropped.
    pub async fn resolve_all(
        &self,
        ctx: &RequestContext,
        candidates: BTreeSet<String>,
    ) -> BTreeSet<String> {
        let mut set = JoinSet::new();
        for url in candidates {
            let resolver = Arc::clone(&self.resolver);
            let ctx = ctx.child();
            let limit = self.settings.redirect_timeout;
            set.spawn(async move {
                let outcome = ctx.run_with_limit(limit, resolver.resolve(&url)).await;
                (url, outcome)
            });
        }

        let mut resolved = BTreeSet::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(final_url))) => match extract::normalize_url(&final_url) {
                    Some(normalized) if !extract::is_low_value(&normalized) => {
                        resolved.insert(normalized);
                    }
                    _ => {}
                },
                Ok((url, Err(e))) => log::debug!("[{}] Dropping {url}: {e}", ctx.id()),
                Err(e) => log::warn!("[{}] Resolver task failed: {e}", ctx.id()),
            }
        }
        resolved
    }

    /// Looks every URL up concurrently, reporting each as it completes.
    /// Returns the collected verdicts and the number of lookups that failed.
    pub async fn scan_all(
        &self,
        ctx: &RequestContext,
        urls: BTreeSet<String>,
        events: &EventSender,
    ) -> (Vec<Verdict>, usize) {
        let mut set = JoinSet::new();
        for url in urls {
            let index = Arc::clone(&self.index);
            let ctx = ctx.child();
            let events = events.clone();
            let poll_interval = self.settings.poll_interval;
            set.spawn(async move {
                let outcome = ctx
                    .run(lookup_verdict(index.as_ref(), &url, poll_interval))
                    .await;
                let update = match &outcome {
                    Ok(verdict) => UrlScanUpdate {
                        url: url.clone(),
                        final_decision: verdict.final_decision,
                        report: verdict.report_reference.clone(),
                        error: None,
                    },
                    Err(e) => UrlScanUpdate {
                        url: url.clone(),
                        final_decision: false,
                        report: String::new(),
                        error: Some(e.to_string()),
                    },
                };
                let _ = events.send(AnalysisEvent::UrlScanResult(update));
                (url, outcome)
            });
        }

        let mut verdicts = Vec::new();
        let mut failures = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(verdict))) => verdicts.push(verdict),
                Ok((url, Err(e))) => {
                    log::debug!("[{}] Scan of {url} failed: {e}", ctx.id());
                    failures += 1;
                }
                Err(e) => {
                    log::warn!("[{}] Scan task failed: {e}", ctx.id());
                    failures += 1;
                }
            }
        }
        verdicts.sort_by(|a, b| a.url.cmp(&b.url));
        (verdicts, failures)
    }
}

/// Folds per-URL verdicts into the category result.
///
/// One condemned URL zeroes the category. When every lookup failed there is
/// nothing to vouch for and the category earns nothing either.
pub fn aggregate(total: usize, verdicts: Vec<Verdict>, failures: usize) -> UrlAnalysisResult {
    let malicious_count = verdicts.iter().filter(|v| v.final_decision).count();
    let error = (failures > 0).then(|| format!("{failures} of {total} URL lookups failed"));

    if malicious_count > 0 {
        return UrlAnalysisResult {
            status: STATUS_MALICIOUS.to_string(),
            message: format!("{malicious_count} malicious URL(s) detected."),
            malicious_count,
            score_impact: 0,
            url_verdicts: verdicts,
            error,
        };
    }
    if total > 0 && verdicts.is_empty() {
        return UrlAnalysisResult {
            status: STATUS_ERROR.to_string(),
            message: "No URL could be scanned.".to_string(),
            malicious_count: 0,
            score_impact: 0,
            url_verdicts: verdicts,
            error,
        };
    }

    let message = if total == 0 {
        "No URLs found.".to_string()
    } else {
        format!("{} URL(s) scanned, none malicious.", verdicts.len())
    };
    UrlAnalysisResult {
        status: STATUS_CLEAN.to_string(),
        message,
        malicious_count: 0,
        score_impact: scoring::impact(scoring::MALICIOUS_URL_FOUND),
        url_verdicts: verdicts,
        error,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::AnalysisResult;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use urlscan::ScanPoll;
    use verdict::ScanReport;

    /// Resolves every link to itself, except for the configured redirects and dead links.
    #[derive(Default)]
    pub(crate) struct FakeResolver {
        pub redirects: HashMap<String, String>,
        pub dead: Vec<String>,
    }

    #[async_trait]
    impl LinkResolver for FakeResolver {
        async fn resolve(&self, url: &str) -> AnalysisResult<String> {
            if self.dead.iter().any(|d| d == url) {
                return Err(AnalysisError::ExternalService("connection refused".into()));
            }
            Ok(self.redirects.get(url).cloned().unwrap_or_else(|| url.to_string()))
        }
    }

    /// Scan index that knows nothing recent, and reports URLs containing
    /// "evil" as malicious after one pending poll. `stall` blocks the polling
    /// thread and then answers clean, so that poll cannot be interrupted once
    /// it has started.
    #[derive(Default)]
    pub(crate) struct FakeScanIndex {
        pub hang: bool,
        pub stall: Option<Duration>,
        pub polls: Mutex<HashMap<String, usize>>,
    }

    #[async_trait]
    impl ScanIndex for FakeScanIndex {
        async fn find_recent(&self, _url: &str) -> AnalysisResult<Option<String>> {
            Ok(None)
        }

        async fn submit(&self, url: &str) -> AnalysisResult<String> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(url.to_string())
        }

        async fn fetch_result(&self, scan_id: &str) -> AnalysisResult<ScanPoll> {
            if let Some(stall) = self.stall {
                std::thread::sleep(stall);
                return Ok(ScanPoll::Ready(ScanReport::default()));
            }
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(scan_id.to_string()).or_default();
            *count += 1;
            if *count == 1 {
                return Ok(ScanPoll::Pending);
            }
            Ok(ScanPoll::Ready(ScanReport {
                malicious: scan_id.contains("evil"),
                report_url: format!("https://scanner.test/{scan_id}"),
                ..Default::default()
            }))
        }
    }

    fn pipeline(resolver: FakeResolver, index: FakeScanIndex) -> UrlPipeline {
        UrlPipeline::new(
            Arc::new(resolver),
            Arc::new(index),
            UrlPipelineSettings {
                poll_interval: Duration::from_millis(5),
                ..Default::default()
            },
        )
    }

    fn verdict(url: &str, final_decision: bool) -> Verdict {
        Verdict {
            url: url.to_string(),
            score: 0,
            categories: Vec::new(),
            report_reference: String::new(),
            platform_malicious: final_decision,
            final_decision,
        }
    }

    #[test]
    fn test_aggregate_outcomes() {
        let clean = aggregate(2, vec![verdict("a", false), verdict("b", false)], 0);
        assert_eq!(clean.status, STATUS_CLEAN);
        assert_eq!(clean.score_impact, 10);

        let bad = aggregate(2, vec![verdict("a", true), verdict("b", false)], 0);
        assert_eq!(bad.status, STATUS_MALICIOUS);
        assert_eq!(bad.malicious_count, 1);
        assert_eq!(bad.score_impact, 0);

        let none = aggregate(0, Vec::new(), 0);
        assert_eq!(none.status, STATUS_CLEAN);
        assert_eq!(none.score_impact, 10);

        let unscanned = aggregate(3, Vec::new(), 3);
        assert_eq!(unscanned.status, STATUS_ERROR);
        assert_eq!(unscanned.score_impact, 0);
    }

    #[tokio::test]
    async fn test_five_urls_one_malicious() {
        let text = "https://one.test/ https://two.test/ https://three.test/ \
                    https://four.test/ https://evil.test/login";
        let pipeline = pipeline(FakeResolver::default(), FakeScanIndex::default());
        let ctx = RequestContext::new("t", Duration::from_secs(30));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = pipeline.analyze(&ctx, text, "", &tx).await;
        assert_eq!(result.status, STATUS_MALICIOUS);
        assert_eq!(result.malicious_count, 1);
        assert_eq!(result.score_impact, 0);
        assert_eq!(result.url_verdicts.len(), 5);

        drop(tx);
        let mut started = None;
        let mut updates = 0;
        while let Some(event) = rx.recv().await {
            match event {
                AnalysisEvent::UrlScanStarted(s) => {
                    assert_eq!(updates, 0);
                    started = Some(s.total);
                }
                AnalysisEvent::UrlScanResult(_) => updates += 1,
                other => panic!("unexpected event {}", other.name()),
            }
        }
        assert_eq!(started, Some(5));
        assert_eq!(updates, 5);
    }

    #[tokio::test]
    async fn test_redirects_collapse_and_dead_links_drop() {
        let mut resolver = FakeResolver::default();
        resolver
            .redirects
            .insert("https://short.test/x".into(), "https://landing.test/".into());
        resolver
            .redirects
            .insert("https://short.test/y".into(), "https://landing.test/".into());
        resolver.dead.push("https://gone.test/".into());
        let pipeline = pipeline(resolver, FakeScanIndex::default());
        let ctx = RequestContext::new("t", Duration::from_secs(30));

        let candidates = ["https://short.test/x", "https://short.test/y", "https://gone.test/"]
            .into_iter()
            .map(String::from)
            .collect();
        let resolved = pipeline.resolve_all(&ctx, candidates).await;
        assert_eq!(resolved.into_iter().collect::<Vec<_>>(), vec!["https://landing.test/"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_polling() {
        let pipeline = pipeline(
            FakeResolver::default(),
            FakeScanIndex {
                hang: true,
                ..Default::default()
            },
        );
        let ctx = RequestContext::new("t", Duration::from_secs(3));
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = pipeline.analyze(&ctx, "https://slow.test/", "", &tx).await;
        assert_eq!(result.status, STATUS_ERROR);
        assert_eq!(result.score_impact, 0);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_disabled_scanning_awards_impact() {
        let pipeline = UrlPipeline::new(
            Arc::new(FakeResolver::default()),
            Arc::new(FakeScanIndex::default()),
            UrlPipelineSettings {
                scanning_enabled: false,
                ..Default::default()
            },
        );
        let ctx = RequestContext::new("t", Duration::from_secs(30));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = pipeline.analyze(&ctx, "https://a.test/", "", &tx).await;
        assert_eq!(result.status, STATUS_DISABLED);
        assert_eq!(result.score_impact, 10);
    }
}
