//! Transfer error taxonomy.
//!
//! [`FetchError::is_transient`] is the classification table: a transient
//! error leaves the datalogger in the active set and, when partial downloads
//! are allowed, preserves the temp file for a later resume. Everything else
//! is fatal for the attempt, logged with full detail, and the temp file is
//! discarded.

use std::time::Duration;

use thiserror::Error;

use filefetcher_core::TemplateError;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timed out")]
    Timeout,

    #[error("request initialization failed: {0}")]
    Init(String),

    #[error("remote file not found: {0}")]
    RemoteNotFound(String),

    #[error("throughput below {limit} B/s over {window:?}")]
    LowSpeed { limit: u64, window: Duration },

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("bad template")]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("HTTP transport error: {0}")]
    Http(String),
}

impl FetchError {
    /// The transient set: errors that are expected in normal operation
    /// against flaky field hardware and do not end the day's pursuit.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::ConnectionFailed(_)
                | FetchError::Timeout
                | FetchError::Init(_)
                | FetchError::RemoteNotFound(_)
                | FetchError::LowSpeed { .. }
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            FetchError::ConnectionFailed(e.to_string())
        } else if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_builder() || e.is_request() {
            FetchError::Init(e.to_string())
        } else if let Some(status) = e.status() {
            if status == reqwest::StatusCode::NOT_FOUND {
                FetchError::RemoteNotFound(e.to_string())
            } else {
                FetchError::HttpStatus(status.as_u16())
            }
        } else {
            FetchError::Http(e.to_string())
        }
    }
}
