//! Per-request task orchestration and event multiplexing.
//!
//! A request is prepared (sandbox, decoding, parsing, corpus check) before
//! anything is streamed, so fatal problems surface as a plain error. Running
//! it launches one task per enabled category under a shared deadline; every
//! task reports through one results channel, the orchestrator relays each
//! report to the stream writer as it arrives and folds it into the scores,
//! and `finalScores` is sent once every launched task has reported.

use crate::attachment_analyzer::{AttachmentAnalyzer, ExecutableAnalysisResult};
use crate::config::Config;
use crate::content::judge::GeminiJudge;
use crate::content::render::{BrowserRenderer, TesseractOcr};
use crate::content::search::GoogleSearch;
use crate::content::{ContentAnalysisResult, ContentAnalyzer, ContentSettings};
use crate::context::RequestContext;
use crate::corpus::{DomainCorpus, SqliteCorpus};
use crate::domain_reputation::{DomainAnalysisResult, DomainMatcher};
use crate::error::{AnalysisError, AnalysisResult};
use crate::events::{AnalysisEvent, EventSender, MaxScore};
use crate::message::{Envelope, EnvelopeParser};
use crate::sandbox::Sandbox;
use crate::scoring::{max_achievable_score, Category, EnabledChecks, FinalScores, ScoreAccumulator};
use crate::url_reputation::urlscan::UrlscanClient;
use crate::url_reputation::{UrlAnalysisResult, UrlPipeline, UrlPipelineSettings};
use crate::url_resolver::UrlResolver;
use crate::writer::{spawn_writer, EventSink};
use base64::prelude::*;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

const SERVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// Long-lived collaborators shared by every request.
pub struct Services {
    pub corpus: Arc<dyn DomainCorpus>,
    pub domains: Arc<DomainMatcher>,
    pub urls: Arc<UrlPipeline>,
    pub content: Arc<ContentAnalyzer>,
    pub parser: Arc<EnvelopeParser>,
}

impl Services {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let corpus: Arc<dyn DomainCorpus> =
            Arc::new(SqliteCorpus::new(&config.corpus.database_path));

        let resolver = UrlResolver::new(config.redirect_timeout(), config.limits.max_redirects)?;
        let scanner = UrlscanClient::new(
            &config.url_scan.api_base,
            &config.url_scan.api_key,
            &config.url_scan.visibility,
            config.url_scan.recent_window_days,
            SERVICE_TIMEOUT,
        )?;
        let urls = UrlPipeline::new(
            Arc::new(resolver),
            Arc::new(scanner),
            UrlPipelineSettings {
                scanning_enabled: config.url_scan.enabled,
                redirect_timeout: config.redirect_timeout(),
                poll_interval: config.poll_interval(),
                max_urls: config.limits.max_urls,
            },
        );

        let judge = GeminiJudge::new(
            &config.content.api_base,
            &config.content.model,
            &config.content.api_key,
            config.request_timeout(),
        )?;
        let search = GoogleSearch::new(
            &config.search.api_base,
            &config.search.api_key,
            &config.search.cx,
            &config.search.country,
            SERVICE_TIMEOUT,
        )?;
        let content = ContentAnalyzer::new(
            Arc::new(judge),
            Arc::new(BrowserRenderer::new(
                &config.render.browser_command,
                config.render.window_width,
                config.render.window_height,
            )),
            Arc::new(TesseractOcr::new(&config.render.ocr_command)),
            Arc::new(search),
            Arc::clone(&corpus),
            ContentSettings {
                prompt: config.content.prompt.clone(),
                payload_limit_bytes: config.limits.judge_payload_limit_bytes,
                country: config.search.country.clone(),
                render_timeout: config.render_timeout(),
            },
        );

        Ok(Self {
            corpus,
            domains: Arc::new(DomainMatcher::new(
                config.corpus.free_mail_providers.iter().cloned(),
            )),
            urls: Arc::new(urls),
            content: Arc::new(content),
            parser: Arc::new(EnvelopeParser::new()),
        })
    }
}

/// One analysis request as received from a caller.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub raw: Vec<u8>,
    pub enabled: EnabledChecks,
}

impl AnalysisRequest {
    pub fn new(raw: Vec<u8>, enabled: EnabledChecks) -> Self {
        Self { raw, enabled }
    }

    /// Decodes a base64 message, tolerating line breaks in the encoding.
    pub fn from_base64(encoded: &str, enabled: EnabledChecks) -> AnalysisResult<Self> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let raw = BASE64_STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| AnalysisError::InvalidInput(format!("email is not valid base64: {e}")))?;
        Ok(Self::new(raw, enabled))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Domain,
    Urls,
    Attachments,
    Text,
    Rendered,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Domain,
        TaskKind::Urls,
        TaskKind::Attachments,
        TaskKind::Text,
        TaskKind::Rendered,
    ];

    pub fn category(self) -> Category {
        match self {
            TaskKind::Domain => Category::Domain,
            TaskKind::Urls => Category::Urls,
            TaskKind::Attachments => Category::Attachments,
            TaskKind::Text => Category::TextAnalysis,
            TaskKind::Rendered => Category::RenderedAnalysis,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Domain => "domain",
            TaskKind::Urls => "urls",
            TaskKind::Attachments => "attachments",
            TaskKind::Text => "text",
            TaskKind::Rendered => "rendered",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Created,
    TasksLaunched,
    AllTasksDone,
    Aggregated,
    Closed,
}

struct TaskReport {
    kind: TaskKind,
    event: AnalysisEvent,
    elapsed: Duration,
    degraded: bool,
}

/// Folds one task result into the running scores.
pub fn fold_event(scores: &mut ScoreAccumulator, event: &AnalysisEvent) {
    match event {
        AnalysisEvent::DomainAnalysis(p) => scores.record_domain(p.score_impact),
        AnalysisEvent::UrlAnalysis(p) => scores.record_urls(p.score_impact),
        AnalysisEvent::ExecutableAnalysis(p) => scores.record_attachments(p.score_impact),
        AnalysisEvent::TextAnalysis(p) => scores.record_text(p.impacts()),
        AnalysisEvent::RenderedAnalysis(p) => scores.record_rendered(p.impacts()),
        AnalysisEvent::MaxScore(_)
        | AnalysisEvent::UrlScanStarted(_)
        | AnalysisEvent::UrlScanResult(_)
        | AnalysisEvent::FinalScores(_) => {}
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    services: Arc<Services>,
    request_timeout: Duration,
    sandbox_parent: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(services: Arc<Services>, request_timeout: Duration) -> Self {
        Self {
            services,
            request_timeout,
            sandbox_parent: None,
        }
    }

    /// Creates sandboxes under `parent` instead of the system temp directory.
    pub fn with_sandbox_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.sandbox_parent = Some(parent.into());
        self
    }

    /// Everything that must succeed before the stream opens.
    pub fn prepare(&self, request: AnalysisRequest) -> AnalysisResult<PreparedRequest> {
        let sandbox = match &self.sandbox_parent {
            Some(parent) => Sandbox::create_in(parent)?,
            None => Sandbox::create()?,
        };
        std::fs::write(sandbox.raw_message_path(), &request.raw)?;
        let envelope = self.services.parser.parse(request.raw, &sandbox)?;
        self.services.corpus.check_available()?;

        let ctx = RequestContext::new(sandbox.id(), self.request_timeout);
        log::info!(
            "[{}] Prepared request from {} ({})",
            ctx.id(),
            envelope.sender_address,
            envelope.subject
        );
        Ok(PreparedRequest {
            services: Arc::clone(&self.services),
            sandbox,
            envelope: Arc::new(envelope),
            enabled: request.enabled,
            ctx,
            state: RequestState::Created,
        })
    }
}

/// A parsed request holding its sandbox, ready to stream.
pub struct PreparedRequest {
    services: Arc<Services>,
    sandbox: Sandbox,
    envelope: Arc<Envelope>,
    enabled: EnabledChecks,
    ctx: RequestContext,
    state: RequestState,
}

impl PreparedRequest {
    pub fn id(&self) -> &str {
        self.ctx.id()
    }

    /// Cancelling this context aborts the request's outstanding work.
    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    pub fn sandbox_root(&self) -> PathBuf {
        self.sandbox.root().to_path_buf()
    }

    /// Streams the whole analysis to `sink` and returns the final scores.
    ///
    /// The sandbox is removed before this returns, whatever happened to the
    /// stream or the individual tasks.
    pub async fn run<S>(self, sink: S) -> FinalScores
    where
        S: EventSink + 'static,
    {
        let PreparedRequest {
            services,
            sandbox,
            envelope,
            enabled,
            ctx,
            mut state,
        } = self;
        let started = Instant::now();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let writer = spawn_writer(sink, event_rx, ctx.clone());

        let max_score = max_achievable_score(&enabled);
        let _ = event_tx.send(AnalysisEvent::MaxScore(MaxScore { max_score }));

        let sandbox = Arc::new(sandbox);
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<TaskReport>();
        let mut tasks = JoinSet::new();
        for kind in TaskKind::ALL {
            if !enabled.is_enabled(kind.category()) {
                continue;
            }
            let task = TaskInputs {
                kind,
                ctx: ctx.child(),
                services: Arc::clone(&services),
                envelope: Arc::clone(&envelope),
                sandbox: Arc::clone(&sandbox),
                events: event_tx.clone(),
            };
            let reports = report_tx.clone();
            tasks.spawn(async move {
                let report = task.run().await;
                let _ = reports.send(report);
            });
        }
        drop(report_tx);
        log::info!(
            "[{}] Launched {} task(s), {:?} until the deadline",
            ctx.id(),
            tasks.len(),
            ctx.remaining()
        );
        transition(&ctx, &mut state, RequestState::TasksLaunched);

        let mut scores = ScoreAccumulator::new();
        while let Some(report) = report_rx.recv().await {
            log::info!(
                "[{}] Task {} {} in {:?}",
                ctx.id(),
                report.kind,
                if report.degraded { "failed" } else { "completed" },
                report.elapsed
            );
            debug_assert!(report.event.is_task_result());
            fold_event(&mut scores, &report.event);
            let _ = event_tx.send(report.event);
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("[{}] Task aborted without a result: {e}", ctx.id());
            }
        }
        transition(&ctx, &mut state, RequestState::AllTasksDone);

        let final_scores = scores.finish(max_score);
        transition(&ctx, &mut state, RequestState::Aggregated);
        let _ = event_tx.send(AnalysisEvent::FinalScores(final_scores.clone()));
        drop(event_tx);

        let delivered = writer.await.unwrap_or_else(|e| {
            log::error!("[{}] Stream writer failed: {e}", ctx.id());
            0
        });
        ctx.cancel();
        match Arc::try_unwrap(sandbox) {
            Ok(mut sandbox) => sandbox.destroy(),
            Err(_) => log::warn!("[{}] Sandbox still referenced at close", ctx.id()),
        }
        transition(&ctx, &mut state, RequestState::Closed);
        log::info!(
            "[{}] Closed after {:?}: {delivered} event(s), text {:.1}%, rendered {:.1}%, corpus read {:?}",
            ctx.id(),
            started.elapsed(),
            final_scores.text_percentage,
            final_scores.rendered_percentage,
            ctx.corpus_time()
        );
        final_scores
    }
}

fn transition(ctx: &RequestContext, state: &mut RequestState, to: RequestState) {
    log::debug!("[{}] {:?} -> {:?}", ctx.id(), state, to);
    *state = to;
}

struct TaskInputs {
    kind: TaskKind,
    ctx: RequestContext,
    services: Arc<Services>,
    envelope: Arc<Envelope>,
    sandbox: Arc<Sandbox>,
    events: EventSender,
}

impl TaskInputs {
    async fn run(self) -> TaskReport {
        let started = Instant::now();
        let outcome = self.ctx.run(async { Ok(self.execute().await) }).await;
        let (event, degraded) = match outcome {
            Ok(event) => {
                let degraded = event_has_error(&event);
                (event, degraded)
            }
            Err(e) => (self.degraded(&e), true),
        };
        TaskReport {
            kind: self.kind,
            event,
            elapsed: started.elapsed(),
            degraded,
        }
    }

    async fn execute(&self) -> AnalysisEvent {
        let envelope = self.envelope.as_ref();
        match self.kind {
            TaskKind::Domain => {
                if envelope.domain.is_empty() {
                    let e = AnalysisError::InvalidInput("message has no sender domain".into());
                    return AnalysisEvent::DomainAnalysis(DomainAnalysisResult::failed(
                        &envelope.sub_domain,
                        &e,
                    ));
                }
                let (result, corpus_time) = Arc::clone(&self.services.domains)
                    .analyze(
                        Arc::clone(&self.services.corpus),
                        envelope.domain.clone(),
                        envelope.sub_domain.clone(),
                    )
                    .await;
                self.ctx.record_corpus_time(corpus_time);
                AnalysisEvent::DomainAnalysis(result)
            }
            TaskKind::Urls => AnalysisEvent::UrlAnalysis(
                self.services
                    .urls
                    .analyze(&self.ctx, &envelope.text, &envelope.html, &self.events)
                    .await,
            ),
            TaskKind::Attachments => {
                AnalysisEvent::ExecutableAnalysis(AttachmentAnalyzer::analyze(&envelope.attachments))
            }
            TaskKind::Text => AnalysisEvent::TextAnalysis(
                self.services.content.analyze_text(&self.ctx, envelope).await,
            ),
            TaskKind::Rendered => AnalysisEvent::RenderedAnalysis(
                self.services
                    .content
                    .analyze_rendered(&self.ctx, envelope, &self.sandbox)
                    .await,
            ),
        }
    }

    /// Error payload for a task that ran out of time or was cancelled.
    fn degraded(&self, error: &AnalysisError) -> AnalysisEvent {
        if error.is_interruption() {
            log::warn!("[{}] Task {} did not finish: {error}", self.ctx.id(), self.kind);
        } else {
            log::error!("[{}] Task {} failed: {error}", self.ctx.id(), self.kind);
        }
        match self.kind {
            TaskKind::Domain => AnalysisEvent::DomainAnalysis(DomainAnalysisResult::failed(
                &self.envelope.sub_domain,
                error,
            )),
            TaskKind::Urls => AnalysisEvent::UrlAnalysis(UrlAnalysisResult::failed(error)),
            TaskKind::Attachments => {
                AnalysisEvent::ExecutableAnalysis(ExecutableAnalysisResult::failed(error))
            }
            TaskKind::Text => {
                AnalysisEvent::TextAnalysis(ContentAnalysisResult::failed(error.to_string()))
            }
            TaskKind::Rendered => {
                AnalysisEvent::RenderedAnalysis(ContentAnalysisResult::failed(error.to_string()))
            }
        }
    }
}

fn event_has_error(event: &AnalysisEvent) -> bool {
    match event {
        AnalysisEvent::DomainAnalysis(p) => p.error.is_some(),
        AnalysisEvent::UrlAnalysis(p) => p.error.is_some(),
        AnalysisEvent::ExecutableAnalysis(p) => p.error.is_some(),
        AnalysisEvent::TextAnalysis(p) | AnalysisEvent::RenderedAnalysis(p) => p.error.is_some(),
        _ => false,
    }
}
