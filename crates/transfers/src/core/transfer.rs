//! The transfer entity: one managed download from request to outcome

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use super::error::{FilesystemError, TransferError};
use super::observer::Observers;
use crate::transport::{ResponseInfo, ResumeData, TransferId, TransportTask};

/// Progress value reported while the total size is unknown
pub const UNKNOWN_PROGRESS: f32 = -1.0;

/// Shared handle to a transfer
pub type TransferHandle = Arc<Transfer>;

/// Lifecycle state, mirrored from the transport task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Created,
    Running,
    Suspended,
    Canceling,
    Completed,
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferState::Created => write!(f, "created"),
            TransferState::Running => write!(f, "running"),
            TransferState::Suspended => write!(f, "suspended"),
            TransferState::Canceling => write!(f, "canceling"),
            TransferState::Completed => write!(f, "completed"),
        }
    }
}

/// Mutable part of a transfer, written by the event router
#[derive(Debug)]
pub(crate) struct TransferStatus {
    pub progress: f32,
    pub bytes_written: u64,
    pub bytes_expected: Option<u64>,
    pub resulting_path: Option<PathBuf>,
    pub last_error: Option<TransferError>,
    /// Set by `cancel()`; later progress is not delivered
    pub cancel_requested: bool,
    /// Set once the terminal notification has been queued
    pub finished: bool,
}

impl Default for TransferStatus {
    fn default() -> Self {
        Self {
            progress: 0.0,
            bytes_written: 0,
            bytes_expected: None,
            resulting_path: None,
            last_error: None,
            cancel_requested: false,
            finished: false,
        }
    }
}

/// One download managed by a [`crate::TransferCoordinator`]
///
/// The entity stays valid after it has been evicted from the coordinator's
/// registry, so callers can inspect the outcome after completion.
pub struct Transfer {
    task: Arc<dyn TransportTask>,
    directory: Option<PathBuf>,
    preferred_file_name: Option<String>,
    pub(crate) observers: Observers,
    pub(crate) status: Mutex<TransferStatus>,
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("directory", &self.directory)
            .field("preferred_file_name", &self.preferred_file_name)
            .field("status", &*self.status.lock())
            .finish()
    }
}

impl Transfer {
    pub(crate) fn new(
        task: Arc<dyn TransportTask>,
        directory: Option<PathBuf>,
        preferred_file_name: Option<String>,
        observers: Observers,
    ) -> Self {
        Self {
            task,
            directory,
            preferred_file_name,
            observers,
            status: Mutex::new(TransferStatus::default()),
        }
    }

    pub fn id(&self) -> TransferId {
        self.task.id()
    }

    pub fn state(&self) -> TransferState {
        self.task.state()
    }

    pub fn is_suspended(&self) -> bool {
        self.state() == TransferState::Suspended
    }

    /// Fraction in `[0.0, 1.0]`, or [`UNKNOWN_PROGRESS`] when the size is unknown
    pub fn progress(&self) -> f32 {
        self.status.lock().progress
    }

    pub fn bytes_written(&self) -> u64 {
        self.status.lock().bytes_written
    }

    pub fn bytes_expected(&self) -> Option<u64> {
        self.status.lock().bytes_expected
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn preferred_file_name(&self) -> Option<&str> {
        self.preferred_file_name.as_deref()
    }

    /// File name of the destination
    ///
    /// Not cached: without a preferred name this asks the transport for the
    /// server's suggestion, which is unavailable until the response arrives.
    pub fn file_name(&self) -> Option<String> {
        self.preferred_file_name
            .clone()
            .or_else(|| self.task.response().and_then(|response| response.suggested_filename))
    }

    /// Where the downloaded file will be placed
    pub fn destination_path(&self) -> std::result::Result<PathBuf, FilesystemError> {
        let file_name = self.file_name().ok_or(FilesystemError::MissingFileName)?;
        let directory = self.directory.clone().unwrap_or_else(std::env::temp_dir);
        Ok(directory.join(file_name))
    }

    /// Final location of the file, set only after a successful placement
    pub fn resulting_path(&self) -> Option<PathBuf> {
        self.status.lock().resulting_path.clone()
    }

    pub fn last_error(&self) -> Option<TransferError> {
        self.status.lock().last_error.clone()
    }

    pub fn request_url(&self) -> Option<Url> {
        self.task.original_request().map(|request| request.url)
    }

    pub fn response(&self) -> Option<ResponseInfo> {
        self.task.response()
    }

    pub fn resume(&self) {
        self.task.resume();
    }

    pub fn suspend(&self) {
        self.task.suspend();
    }

    /// Cancel without recovery data
    ///
    /// No progress is reported after this call; the terminal notification
    /// follows once the transport has stopped.
    pub fn cancel(&self) {
        self.status.lock().cancel_requested = true;
        self.task.cancel();
    }

    /// Cancel and receive data to continue the transfer later
    ///
    /// `on_data` receives `None` when the transfer cannot be resumed. The
    /// terminal notification is still delivered to the observers.
    pub fn cancel_producing_resume_data<F>(&self, on_data: F)
    where
        F: FnOnce(Option<ResumeData>) + Send + 'static,
    {
        self.status.lock().cancel_requested = true;
        self.task.cancel_producing_resume_data(Box::new(on_data));
    }
}
