// src/error.rs
//! Error taxonomy shared by every stage of a run.
//!
//! External boundaries (feeds, summarizer, tracker) report [`ExternalError`],
//! split into transient and permanent classes so retry policies can decide
//! without string matching. The persistence boundary reports [`StoreError`],
//! which the orchestrator escalates to [`RunError::PersistenceUnavailable`].

use std::path::PathBuf;

use reqwest::StatusCode;

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExternalError {
    /// Network error, timeout, rate limit or server error. Worth retrying.
    #[error("transient: {0}")]
    Transient(String),
    /// Malformed input, rejected content or a client error. Never retried.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ExternalError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify a non-success HTTP status.
    /// 408, 425, 429 and every 5xx are transient; other statuses are permanent.
    pub fn from_status(status: StatusCode, context: &str) -> Self {
        let msg = format!(
            "{context}: HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        );
        let transient = status.is_server_error()
            || matches!(status.as_u16(), 408 | 425 | 429);
        if transient {
            Self::Transient(msg.trim_end().to_string())
        } else {
            Self::Permanent(msg.trim_end().to_string())
        }
    }

    /// Classify a `reqwest` error. Transport-level problems are transient,
    /// body decoding and request building problems are permanent.
    pub fn from_reqwest(err: &reqwest::Error, context: &str) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status, context);
        }
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::Transient(format!("{context}: {err}"))
        } else {
            Self::Permanent(format!("{context}: {err}"))
        }
    }
}

/// Failure of the persistence layer. Any of these makes the run fatal.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state i/o failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt state record in {path} (line {line}): {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("state backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// The only error a pipeline run returns. Everything else lands in the report.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("persistence unavailable, run aborted: {0}")]
    PersistenceUnavailable(#[from] StoreError),
}
