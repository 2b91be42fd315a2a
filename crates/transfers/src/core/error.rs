//! Unified error taxonomy reported to transfer observers
//!
//! Every failure a transfer can end with is one of three kinds: an HTTP
//! status outside 200-299, a filesystem failure while placing the downloaded
//! file, or a pass-through failure of the underlying transport.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::transport::TransportError;

/// Terminal error of a transfer
///
/// Errors are cheap to clone: the same value is kept on the transfer as
/// `last_error` and handed to every registered observer.
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    /// The server answered with a status outside the accepted 200-299 range
    #[error("Server responded with HTTP status {status_code} for '{}'", display_url(.failing_url))]
    HttpStatus {
        status_code: u16,
        failing_url: Option<Url>,
    },

    /// The downloaded file could not be placed at its destination
    #[error("Could not place download from '{}'", display_url(.failing_url))]
    Filesystem {
        #[source]
        reason: FilesystemError,
        failing_url: Option<Url>,
    },

    /// The transport gave up on the transfer (reset, timeout, DNS, TLS, cancel)
    #[error("Transfer of '{}' failed", display_url(.failing_url))]
    Transport {
        #[source]
        underlying: TransportError,
        failing_url: Option<Url>,
    },
}

/// Kind tag of a [`TransferError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferErrorKind {
    HttpStatus,
    Filesystem,
    Transport,
}

impl std::fmt::Display for TransferErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferErrorKind::HttpStatus => write!(f, "http-status"),
            TransferErrorKind::Filesystem => write!(f, "filesystem"),
            TransferErrorKind::Transport => write!(f, "transport"),
        }
    }
}

/// Placement failures, wrapped into [`TransferError::Filesystem`]
#[derive(Error, Debug, Clone)]
pub enum FilesystemError {
    #[error("'{}' exists but is not a directory", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("No file name could be determined for the download")]
    MissingFileName,

    #[error("The transport finished without staging a downloaded file")]
    NothingStaged,

    #[error("Failed {operation} '{}'", .path.display())]
    Io {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl FilesystemError {
    pub(crate) fn io(path: impl Into<PathBuf>, operation: FileOperation, source: std::io::Error) -> Self {
        FilesystemError::Io {
            path: path.into(),
            operation,
            source: Arc::new(source),
        }
    }
}

/// Types of file operations for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Read,
    Write,
    Create,
    Delete,
    Move,
    Replace,
    Metadata,
    CreateDir,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Read => write!(f, "reading"),
            FileOperation::Write => write!(f, "writing"),
            FileOperation::Create => write!(f, "creating"),
            FileOperation::Delete => write!(f, "deleting"),
            FileOperation::Move => write!(f, "moving"),
            FileOperation::Replace => write!(f, "replacing"),
            FileOperation::Metadata => write!(f, "reading metadata of"),
            FileOperation::CreateDir => write!(f, "creating directory"),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;

fn display_url(url: &Option<Url>) -> &str {
    url.as_ref().map(Url::as_str).unwrap_or("<unknown>")
}

impl TransferError {
    pub fn http_status(status_code: u16, failing_url: Option<Url>) -> Self {
        TransferError::HttpStatus { status_code, failing_url }
    }

    pub fn filesystem(reason: FilesystemError, failing_url: Option<Url>) -> Self {
        TransferError::Filesystem { reason, failing_url }
    }

    pub fn transport(underlying: TransportError, failing_url: Option<Url>) -> Self {
        TransferError::Transport { underlying, failing_url }
    }

    pub fn kind(&self) -> TransferErrorKind {
        match self {
            TransferError::HttpStatus { .. } => TransferErrorKind::HttpStatus,
            TransferError::Filesystem { .. } => TransferErrorKind::Filesystem,
            TransferError::Transport { .. } => TransferErrorKind::Transport,
        }
    }

    /// URL of the request that failed, when it is known
    pub fn failing_url(&self) -> Option<&Url> {
        match self {
            TransferError::HttpStatus { failing_url, .. }
            | TransferError::Filesystem { failing_url, .. }
            | TransferError::Transport { failing_url, .. } => failing_url.as_ref(),
        }
    }

    /// Numeric status code, only for [`TransferErrorKind::HttpStatus`]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransferError::HttpStatus { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Whether the transfer ended because it was cancelled
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            TransferError::Transport { underlying: TransportError::Cancelled, .. }
        )
    }

    /// Check if starting the transfer again could plausibly succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransferError::HttpStatus { status_code, .. } => {
                // Only server errors and throttling, never client errors (4xx)
                *status_code >= 500 || *status_code == 429
            }
            TransferError::Filesystem { reason, .. } => match reason {
                FilesystemError::Io { source, .. } => matches!(
                    source.kind(),
                    std::io::ErrorKind::Interrupted
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                ),
                _ => false,
            },
            TransferError::Transport { underlying, .. } => underlying.is_recoverable(),
        }
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            TransferError::HttpStatus { .. } => "http_status",
            TransferError::Filesystem { reason, .. } => match reason {
                FilesystemError::NotADirectory { .. } => "not_a_directory",
                FilesystemError::MissingFileName => "missing_file_name",
                FilesystemError::NothingStaged => "nothing_staged",
                FilesystemError::Io { .. } => "file_system",
            },
            TransferError::Transport { underlying, .. } => underlying.category(),
        }
    }
}
