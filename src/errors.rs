// Error types and error handling module
// This file defines the error taxonomy shared by configuration loading,
// upstream fetchers, log tailing and metric rendering
//
// Numan Thabit 2025 Nov

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("config error: {0}")]
    Config(String),
    #[error("invalid pattern for {field}: {source}")]
    Pattern {
        field: String,
        #[source]
        source: regex::Error,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream rejected request to {url}: http {status}")]
    Rejected {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("file error on {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("fetch task failed: {0}")]
    Task(String),
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ExporterError {
    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    /// Short class of the failure, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Pattern { .. } => "config",
            Self::Transport(_) | Self::Rejected { .. } | Self::Decode(_) => "upstream",
            Self::File { .. } => "file",
            Self::Timeout(_) => "timeout",
            Self::Task(_) => "task",
            Self::Metrics(_) => "metrics",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_group_upstream_failures() {
        let rejected = ExporterError::Rejected {
            url: "http://example.invalid".to_string(),
            status: reqwest::StatusCode::NOT_FOUND,
        };
        assert_eq!(rejected.kind(), "upstream");
        assert_eq!(ExporterError::Decode("bad".into()).kind(), "upstream");
        assert_eq!(
            ExporterError::Timeout(Duration::from_secs(3)).kind(),
            "timeout"
        );
        assert!(rejected.to_string().contains("404"));
    }
}
