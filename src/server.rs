//! HTTP surface: one streaming analysis endpoint answered as Server-Sent Events.

use crate::error::{AnalysisError, AnalysisResult};
use crate::events::AnalysisEvent;
use crate::orchestrator::{AnalysisRequest, Orchestrator};
use crate::scoring::EnabledChecks;
use crate::writer::EventSink;
use anyhow::Context;
use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

const MAX_BODY_BYTES: usize = 64 << 20;
const STREAM_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamRequest {
    email: String,
    #[serde(default)]
    enabled_checks: EnabledChecks,
}

pub fn router(orchestrator: Orchestrator) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/process-eml-stream", post(process_eml_stream))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(orchestrator)
}

/// Serves until Ctrl-C, then lets in-flight streams finish.
pub async fn serve(listen: &str, orchestrator: Orchestrator) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;
    log::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {e}");
        return;
    }
    log::info!("Shutdown requested");
}

async fn health() -> &'static str {
    "ok"
}

async fn process_eml_stream(
    State(orchestrator): State<Orchestrator>,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    let request = match parse_body(&body, &params) {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };

    let prepared = match tokio::task::spawn_blocking(move || orchestrator.prepare(request)).await {
        Ok(Ok(prepared)) => prepared,
        Ok(Err(e)) => return error_response(&e),
        Err(e) => {
            log::error!("Request preparation aborted: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
        }
    };

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(prepared.run(SseSink { tx }));

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    });
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// Accepts either the JSON envelope or a bare base64 body with the enabled
/// checks in the query string.
fn parse_body(body: &str, params: &HashMap<String, String>) -> AnalysisResult<AnalysisRequest> {
    let body = body.trim();
    if body.starts_with('{') {
        let parsed: StreamRequest = serde_json::from_str(body)
            .map_err(|e| AnalysisError::InvalidInput(format!("malformed request body: {e}")))?;
        return AnalysisRequest::from_base64(&parsed.email, parsed.enabled_checks);
    }
    let body = body.trim_matches('"');
    if body.is_empty() {
        return Err(AnalysisError::InvalidInput("request body is empty".into()));
    }
    AnalysisRequest::from_base64(body, enabled_from_query(params))
}

fn enabled_from_query(params: &HashMap<String, String>) -> EnabledChecks {
    EnabledChecks::from_map(
        params
            .iter()
            .filter(|(key, _)| key.starts_with("check"))
            .map(|(key, value)| {
                let enabled = !matches!(value.to_lowercase().as_str(), "false" | "0" | "no" | "off");
                (key.clone(), enabled)
            })
            .collect(),
    )
}

fn error_response(error: &AnalysisError) -> Response {
    let status = match error {
        AnalysisError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    log::warn!("Rejected request ({status}): {error}");
    (status, Json(serde_json::json!({ "error": error.to_string() }))).into_response()
}

/// Forwards events to the open SSE response; fails once the client is gone.
struct SseSink {
    tx: mpsc::Sender<Event>,
}

#[async_trait]
impl EventSink for SseSink {
    async fn send(&mut self, event: &AnalysisEvent) -> AnalysisResult<()> {
        let sse = Event::default().event(event.name()).data(event.payload_json()?);
        self.tx.send(sse).await.map_err(|_| AnalysisError::Cancelled)
    }

    async fn closed(&mut self) {
        self.tx.closed().await
    }
}
