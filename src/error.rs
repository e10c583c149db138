//! Error types for feed ingestion and querying.
//!
//! Everything raised inside the refresh loop is a [`FeedError`]: it is
//! logged, counted and dropped at cycle scope. [`QueryError`] is the only
//! error a reader ever sees.

use std::time::Duration;

/// Failure talking to, or interpreting data from, an upstream collaborator.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Network failure talking to the feed or the directory.
    #[error("transport error for '{uri}': {message}")]
    Transport { uri: String, message: String },

    /// Outbound call exceeded its timeout.
    #[error("timed out after {timeout:?} fetching '{uri}'")]
    Timeout { uri: String, timeout: Duration },

    /// Upstream bytes could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Directory service answered with something unusable.
    #[error("directory error: {0}")]
    Directory(String),

    /// Local file source could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeedError {
    /// Builds a transport error from a `reqwest` failure, mapping timeouts.
    pub fn from_reqwest(uri: &str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Timeout {
                uri: uri.to_string(),
                timeout,
            }
        } else {
            FeedError::Transport {
                uri: uri.to_string(),
                message: err.to_string(),
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FeedError::Timeout { .. })
    }

    /// Short label used as the `kind` of a load-error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::Transport { .. } | FeedError::Io(_) => "transport",
            FeedError::Timeout { .. } => "timeout",
            FeedError::Decode(_) => "decode",
            FeedError::Directory(_) => "directory",
        }
    }
}

impl From<prost::DecodeError> for FeedError {
    fn from(err: prost::DecodeError) -> Self {
        FeedError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Decode(err.to_string())
    }
}

/// Error returned synchronously to a query caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The store has never been populated (or was reset by a directory reload).
    #[error("no data loaded")]
    NoDataLoaded,

    /// Filter parameters could not be parsed or are inconsistent.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}
