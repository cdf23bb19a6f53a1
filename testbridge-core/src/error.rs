//! Error types for ingestion, remote calls and submission.

use std::path::PathBuf;
use std::time::Duration;

/// Why a single file could not be turned into a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    /// Neither the structured nor the XML parser recognised the content.
    #[error("unsupported format")]
    UnsupportedFormat,
    /// The content was recognised but is syntactically broken.
    #[error("malformed content")]
    Malformed,
    /// A structured document has the wrong shape or misses required fields.
    #[error("validation error")]
    Validation,
    #[error("i/o error")]
    Io,
}

/// Per-file parse failure. Fatal for that file only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}{}: {kind}: {message}", .path.display(), location(.line, .offset))]
pub struct ParseError {
    pub path: PathBuf,
    pub kind: ParseErrorKind,
    pub line: Option<usize>,
    pub offset: Option<u64>,
    pub message: String,
}

/// `:line (byte offset)` suffix, each part only when known.
fn location(line: &Option<usize>, offset: &Option<u64>) -> String {
    let mut out = String::new();
    if let Some(line) = line {
        out.push_str(&format!(":{line}"));
    }
    if let Some(offset) = offset {
        out.push_str(&format!(" (byte {offset})"));
    }
    out
}

impl ParseError {
    pub fn new(path: impl Into<PathBuf>, kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            line: None,
            offset: None,
            message: message.into(),
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn at_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Fatal ingestion errors. Individual file failures are collected instead.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("no files matched {pattern}")]
    NoFilesMatched { pattern: String },

    #[error("invalid glob pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("none of the {} matched file(s) could be parsed", .failures.len())]
    NothingParsed { failures: Vec<ParseError> },
}

/// Failure reported by the remote test-management service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// Network failure, timeout or 5xx answer.
    #[error("transient remote failure: {message}")]
    Transient { message: String },

    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Validation failure or any other 4xx answer. Never retried.
    #[error("rejected by remote: {message}")]
    Rejected { status: Option<u16>, message: String },
}

impl RemoteError {
    /// Classifies an HTTP status code the way transports should report it.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => RemoteError::RateLimited { retry_after: None },
            408 | 500..=599 => RemoteError::Transient {
                message: format!("HTTP {status}: {message}"),
            },
            _ => RemoteError::Rejected {
                status: Some(status),
                message,
            },
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        RemoteError::Transient {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        RemoteError::Rejected {
            status: None,
            message: message.into(),
        }
    }

    /// Whether the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Transient { .. } | RemoteError::RateLimited { .. }
        )
    }
}

/// Fatal submission errors. Anything else ends up in the outcome.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("failed to create run {name}: {source}")]
    RunCreation { name: String, source: RemoteError },

    #[error("strict mode: case {case_external_id} failed in run {run_id}: {source}")]
    Strict {
        run_id: String,
        case_external_id: String,
        source: RemoteError,
    },

    #[error("submission exceeded timeout of {timeout:?}")]
    TimeoutExceeded {
        timeout: Duration,
        run_id: Option<String>,
    },

    #[error("submission cancelled")]
    Cancelled { run_id: Option<String> },
}

impl SubmissionError {
    /// Id of the run left behind on the remote side, if one was created.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            SubmissionError::RunCreation { .. } => None,
            SubmissionError::Strict { run_id, .. } => Some(run_id),
            SubmissionError::TimeoutExceeded { run_id, .. }
            | SubmissionError::Cancelled { run_id } => run_id.as_deref(),
        }
    }
}

/// Errors of the end-to-end pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(RemoteError::from_status(503, "down").is_retryable());
        assert!(RemoteError::from_status(408, "slow").is_retryable());
        assert!(RemoteError::from_status(429, "").is_retryable());
        assert!(!RemoteError::from_status(422, "bad field").is_retryable());
        assert_eq!(
            RemoteError::from_status(404, "no project"),
            RemoteError::Rejected {
                status: Some(404),
                message: "no project".into()
            }
        );
    }

    #[test]
    fn parse_error_display_without_location() {
        let err = ParseError::new("a.json", ParseErrorKind::Validation, "case without name");
        assert_eq!(err.to_string(), "a.json: validation error: case without name");
        let err = err.at_offset(3);
        assert_eq!(err.to_string(), "a.json (byte 3): validation error: case without name");
    }

    #[test]
    fn parse_error_display_includes_location() {
        let err = ParseError::new("reports/a.xml", ParseErrorKind::Malformed, "unexpected eof")
            .at_line(7)
            .at_offset(120);
        assert_eq!(
            err.to_string(),
            "reports/a.xml:7 (byte 120): malformed content: unexpected eof"
        );
    }
}
