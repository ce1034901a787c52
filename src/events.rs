use crate::attachment_analyzer::ExecutableAnalysisResult;
use crate::content::ContentAnalysisResult;
use crate::domain_reputation::DomainAnalysisResult;
use crate::scoring::FinalScores;
use crate::url_reputation::{UrlAnalysisResult, UrlScanStarted, UrlScanUpdate};
use serde::Serialize;
use tokio::sync::mpsc;

/// Producer side of the channel feeding the stream writer.
pub type EventSender = mpsc::UnboundedSender<AnalysisEvent>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxScore {
    pub max_score: i32,
}

/// Every event a request can stream, tagged with its wire name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum AnalysisEvent {
    MaxScore(MaxScore),
    DomainAnalysis(DomainAnalysisResult),
    UrlScanStarted(UrlScanStarted),
    UrlScanResult(UrlScanUpdate),
    UrlAnalysis(UrlAnalysisResult),
    ExecutableAnalysis(ExecutableAnalysisResult),
    TextAnalysis(ContentAnalysisResult),
    RenderedAnalysis(ContentAnalysisResult),
    FinalScores(FinalScores),
}

impl AnalysisEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisEvent::MaxScore(_) => "maxScore",
            AnalysisEvent::DomainAnalysis(_) => "domainAnalysis",
            AnalysisEvent::UrlScanStarted(_) => "urlScanStarted",
            AnalysisEvent::UrlScanResult(_) => "urlScanResult",
            AnalysisEvent::UrlAnalysis(_) => "urlAnalysis",
            AnalysisEvent::ExecutableAnalysis(_) => "executableAnalysis",
            AnalysisEvent::TextAnalysis(_) => "textAnalysis",
            AnalysisEvent::RenderedAnalysis(_) => "renderedAnalysis",
            AnalysisEvent::FinalScores(_) => "finalScores",
        }
    }

    /// The event's payload as a JSON document.
    pub fn payload_json(&self) -> serde_json::Result<String> {
        match self {
            AnalysisEvent::MaxScore(p) => serde_json::to_string(p),
            AnalysisEvent::DomainAnalysis(p) => serde_json::to_string(p),
            AnalysisEvent::UrlScanStarted(p) => serde_json::to_string(p),
            AnalysisEvent::UrlScanResult(p) => serde_json::to_string(p),
            AnalysisEvent::UrlAnalysis(p) => serde_json::to_string(p),
            AnalysisEvent::ExecutableAnalysis(p) => serde_json::to_string(p),
            AnalysisEvent::TextAnalysis(p) | AnalysisEvent::RenderedAnalysis(p) => {
                serde_json::to_string(p)
            }
            AnalysisEvent::FinalScores(p) => serde_json::to_string(p),
        }
    }

    /// Whether this event concludes one of the five analysis tasks.
    pub fn is_task_result(&self) -> bool {
        !matches!(
            self,
            AnalysisEvent::MaxScore(_)
                | AnalysisEvent::UrlScanStarted(_)
                | AnalysisEvent::UrlScanResult(_)
                | AnalysisEvent::FinalScores(_)
        )
    }
}
