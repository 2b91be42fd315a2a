//! Transport abstraction
//!
//! The coordinator never speaks HTTP itself. It drives a [`Transport`] that
//! can start, suspend, resume and cancel transfers, and it receives the
//! transport's notifications through the [`TransportDelegate`] seam.
//!
//! Call chain:
//!
//! TransferCoordinator
//! ↓ create_task / resume
//! Transport → TransportTask (worker threads)
//! ↓ will_redirect / did_write_data / did_finish_staging / did_complete
//! EventRouter (the delegate)

pub mod http;

pub use http::{HttpTransport, HttpTransportError};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Weak};
use thiserror::Error;
use url::Url;

use crate::core::TransferState;

/// Identifier assigned by the transport when a task is created
///
/// Unique among live tasks of one transport; the transport may reuse an id
/// once the task has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request for a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl TransferRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    /// Parse `url` and build a request for it
    pub fn parse(url: &str) -> std::result::Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    /// Add a header sent with the request
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// What the transport learned from the response headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    /// URL that produced this response (after any followed redirects)
    pub url: Url,
    pub status: u16,
    pub expected_content_length: Option<u64>,
    /// File name proposed by the server or derived from the URL
    pub suggested_filename: Option<String>,
}

impl ResponseInfo {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

/// Opaque blob from which a transport can continue a cancelled transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeData(Vec<u8>);

impl ResumeData {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Answer of the delegate to an offered redirect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectDecision {
    /// Request the redirect target instead
    Follow,
    /// Keep the redirect response as the final response
    Refuse,
}

/// Failures originating in the transport layer
///
/// These are passed through to observers unmodified, wrapped in
/// [`crate::TransferError::Transport`].
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Transfer was cancelled")]
    Cancelled,

    #[error("Request to '{url}' timed out")]
    TimedOut {
        url: Url,
        #[source]
        source: Arc<reqwest::Error>,
    },

    #[error("Could not connect to '{url}'")]
    Connection {
        url: Url,
        #[source]
        source: Arc<reqwest::Error>,
    },

    #[error("HTTP request to '{url}' failed")]
    Request {
        url: Url,
        #[source]
        source: Arc<reqwest::Error>,
    },

    #[error("Stopped after {limit} redirects while requesting '{url}'")]
    TooManyRedirects { url: Url, limit: usize },

    #[error("Redirect from '{url}' points to an invalid location '{location}'")]
    InvalidRedirect { url: Url, location: String },

    #[error("Resume data could not be decoded: {reason}")]
    InvalidResumeData { reason: String },

    #[error("Failed writing staged file '{}'", .path.display())]
    Staging {
        path: std::path::PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl TransportError {
    /// Classify a reqwest failure for the request that was sent to `url`
    pub fn from_reqwest(url: &Url, error: reqwest::Error) -> Self {
        let url = error.url().cloned().unwrap_or_else(|| url.clone());
        if error.is_timeout() {
            TransportError::TimedOut { url, source: Arc::new(error) }
        } else if error.is_connect() {
            TransportError::Connection { url, source: Arc::new(error) }
        } else {
            TransportError::Request { url, source: Arc::new(error) }
        }
    }

    pub(crate) fn staging(path: &Path, source: std::io::Error) -> Self {
        TransportError::Staging {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::TimedOut { .. }
                | TransportError::Connection { .. }
                | TransportError::Request { .. }
        )
    }

    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Cancelled => "cancelled",
            TransportError::TimedOut { .. } => "network_timeout",
            TransportError::Connection { .. } => "connection",
            TransportError::Request { .. } => "http_request",
            TransportError::TooManyRedirects { .. } => "too_many_redirects",
            TransportError::InvalidRedirect { .. } => "invalid_redirect",
            TransportError::InvalidResumeData { .. } => "invalid_resume_data",
            TransportError::Staging { .. } => "staging",
        }
    }
}

/// Callback receiving resume data after `cancel_producing_resume_data`
pub type ResumeDataCallback = Box<dyn FnOnce(Option<ResumeData>) + Send>;

/// One transfer as seen by the transport
pub trait TransportTask: Send + Sync {
    fn id(&self) -> TransferId;

    fn state(&self) -> TransferState;

    /// Start a created task or continue a suspended one
    fn resume(&self);

    /// Pause delivery of a running task
    fn suspend(&self);

    /// Abort without recovery data; the task still completes through the delegate
    fn cancel(&self);

    /// Abort and hand back resume data (or `None`) to `on_data`
    fn cancel_producing_resume_data(&self, on_data: ResumeDataCallback);

    fn original_request(&self) -> Option<TransferRequest>;

    /// Response headers, once they have been received
    fn response(&self) -> Option<ResponseInfo>;
}

/// Factory for transport tasks
///
/// Tasks start in [`TransferState::Created`] and emit nothing before their
/// first `resume()`.
pub trait Transport: Send + Sync {
    fn create_task(
        &self,
        request: TransferRequest,
        delegate: Weak<dyn TransportDelegate>,
    ) -> Arc<dyn TransportTask>;

    fn create_task_with_resume_data(
        &self,
        data: ResumeData,
        delegate: Weak<dyn TransportDelegate>,
    ) -> Arc<dyn TransportTask>;
}

/// Receiver of transport notifications
///
/// Called synchronously from transport worker threads. For one task the
/// notifications arrive in order: redirects, progress, staging, completion.
pub trait TransportDelegate: Send + Sync {
    fn will_redirect(&self, id: TransferId, response: &ResponseInfo, target: &Url) -> RedirectDecision;

    /// Cumulative byte count written to the staged file
    fn did_write_data(&self, id: TransferId, total_bytes_written: u64, total_bytes_expected: Option<u64>);

    /// The body is complete in `staged_path`; the file is deleted after this returns
    fn did_finish_staging(&self, id: TransferId, staged_path: &Path);

    fn did_complete(&self, id: TransferId, error: Option<TransportError>);
}
