//! Client for a urlscan.io-style scan index.

use super::verdict::{ScanReport, Verdict};
use crate::error::{AnalysisError, AnalysisResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

pub enum ScanPoll {
    Pending,
    Ready(ScanReport),
}

/// External URL scanning platform.
#[async_trait]
pub trait ScanIndex: Send + Sync {
    /// Id of a scan of exactly this URL inside the recent window, if any.
    async fn find_recent(&self, url: &str) -> AnalysisResult<Option<String>>;

    /// Queues a new scan and returns its id.
    async fn submit(&self, url: &str) -> AnalysisResult<String>;

    async fn fetch_result(&self, scan_id: &str) -> AnalysisResult<ScanPoll>;
}

/// Reuses a recent scan or submits a new one, then polls until the result is ready.
///
/// Polling never ends on its own; callers bound it with the request deadline.
pub async fn lookup_verdict(
    index: &dyn ScanIndex,
    url: &str,
    poll_interval: Duration,
) -> AnalysisResult<Verdict> {
    let scan_id = match index.find_recent(url).await? {
        Some(id) => {
            log::debug!("Reusing recent scan {id} for {url}");
            id
        }
        None => {
            let id = index.submit(url).await?;
            log::debug!("Submitted scan {id} for {url}");
            id
        }
    };

    loop {
        match index.fetch_result(&scan_id).await? {
            ScanPoll::Ready(report) => return Ok(Verdict::from_report(url, report)),
            ScanPoll::Pending => tokio::time::sleep(poll_interval).await,
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    task: SearchTask,
}

#[derive(Deserialize)]
struct SearchTask {
    uuid: String,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    uuid: String,
}

#[derive(Deserialize)]
struct ResultResponse {
    #[serde(default)]
    task: ResultTask,
    #[serde(default)]
    verdicts: ResultVerdicts,
}

#[derive(Deserialize, Default)]
struct ResultTask {
    #[serde(rename = "reportURL", default)]
    report_url: String,
}

#[derive(Deserialize, Default)]
struct ResultVerdicts {
    #[serde(default)]
    overall: OverallVerdict,
}

#[derive(Deserialize, Default)]
struct OverallVerdict {
    #[serde(default)]
    score: i32,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    malicious: bool,
}

pub struct UrlscanClient {
    client: Client,
    api_base: String,
    api_key: String,
    visibility: String,
    recent_window: chrono::Duration,
}

impl UrlscanClient {
    pub fn new(
        api_base: &str,
        api_key: &str,
        visibility: &str,
        recent_window_days: i64,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            visibility: visibility.to_string(),
            recent_window: chrono::Duration::days(recent_window_days),
        })
    }

    fn is_recent(&self, time: Option<DateTime<Utc>>) -> bool {
        match time {
            Some(t) => Utc::now() - t <= self.recent_window,
            // the search query already restricts the window
            None => true,
        }
    }
}

fn status_error(what: &str, status: StatusCode) -> AnalysisError {
    AnalysisError::ExternalService(format!("scan index {what} returned {status}"))
}

#[async_trait]
impl ScanIndex for UrlscanClient {
    async fn find_recent(&self, url: &str) -> AnalysisResult<Option<String>> {
        let query = format!(
            "page.url:\"{}\" AND date:>now-{}d",
            url,
            self.recent_window.num_days()
        );
        let response = self
            .client
            .get(format!("{}/search/", self.api_base))
            .header("API-Key", &self.api_key)
            .query(&[("q", query.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error("search", response.status()));
        }
        let body: SearchResponse = response.json().await?;
        Ok(body
            .results
            .into_iter()
            .find(|hit| self.is_recent(hit.task.time))
            .map(|hit| hit.task.uuid))
    }

    async fn submit(&self, url: &str) -> AnalysisResult<String> {
        let response = self
            .client
            .post(format!("{}/scan/", self.api_base))
            .header("API-Key", &self.api_key)
            .json(&serde_json::json!({ "url": url, "visibility": self.visibility }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error("submit", response.status()));
        }
        let body: SubmitResponse = response.json().await?;
        Ok(body.uuid)
    }

    async fn fetch_result(&self, scan_id: &str) -> AnalysisResult<ScanPoll> {
        let response = self
            .client
            .get(format!("{}/result/{}/", self.api_base, scan_id))
            .header("API-Key", &self.api_key)
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(ScanPoll::Pending),
            status if status.is_success() => {
                let body: ResultResponse = response.json().await?;
                Ok(ScanPoll::Ready(ScanReport {
                    score: body.verdicts.overall.score,
                    categories: body.verdicts.overall.categories,
                    malicious: body.verdicts.overall.malicious,
                    report_url: body.task.report_url,
                }))
            }
            status => Err(status_error("result", status)),
        }
    }
}
