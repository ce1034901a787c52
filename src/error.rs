use std::time::Duration;

/// Failure taxonomy shared by every analysis component.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Data source error: {0}")]
    DataSource(String),
    #[error("External service error: {0}")]
    ExternalService(String),
    #[error("Deadline exceeded after {0:?}")]
    Timeout(Duration),
    #[error("Request cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AnalysisError {
    /// Whether the work was stopped from outside (deadline or cancellation)
    /// rather than failing on its own.
    pub fn is_interruption(&self) -> bool {
        matches!(self, AnalysisError::Timeout(_) | AnalysisError::Cancelled)
    }
}

impl From<rusqlite::Error> for AnalysisError {
    fn from(e: rusqlite::Error) -> Self {
        AnalysisError::DataSource(e.to_string())
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AnalysisError::ExternalService(format!("request timed out: {e}"))
        } else {
            AnalysisError::ExternalService(e.to_string())
        }
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(e: serde_json::Error) -> Self {
        AnalysisError::ExternalService(format!("malformed response: {e}"))
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interruptions() {
        assert!(AnalysisError::Timeout(Duration::from_secs(1)).is_interruption());
        assert!(AnalysisError::Cancelled.is_interruption());
        assert!(!AnalysisError::DataSource("corpus unavailable".into()).is_interruption());
        assert!(!AnalysisError::ExternalService("502".into()).is_interruption());
        assert!(!AnalysisError::InvalidInput("bad base64".into()).is_interruption());
    }
}
