//! Observer capabilities of a transfer
//!
//! A transfer can report to a listener object, a progress callback and a
//! completion callback at the same time. All registered sinks are notified;
//! none of them replaces another.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use super::error::TransferError;
use super::transfer::Transfer;

/// Progress callback: `(progress, bytes_written, bytes_expected)`
pub type ProgressCallback = Arc<dyn Fn(f32, u64, Option<u64>) + Send + Sync>;

/// One-shot completion callback: `(error, resulting_path)`
pub type CompletionCallback = Box<dyn FnOnce(Option<TransferError>, Option<PathBuf>) + Send>;

/// Listener object notified about a transfer
///
/// Transfers hold listeners weakly; a listener that has been dropped is
/// silently skipped.
pub trait TransferListener: Send + Sync {
    fn on_progress(&self, _transfer: &Transfer, _progress: f32, _bytes_written: u64, _bytes_expected: Option<u64>) {}

    fn on_completion(&self, transfer: &Transfer, error: Option<&TransferError>, resulting_path: Option<&Path>);
}

/// The set of notification sinks registered for one transfer
#[derive(Default)]
pub struct Observers {
    listener: Option<Weak<dyn TransferListener>>,
    progress: Option<ProgressCallback>,
    completion: Mutex<Option<CompletionCallback>>,
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("listener", &self.listener.is_some())
            .field("progress", &self.progress.is_some())
            .field("completion", &self.completion.lock().is_some())
            .finish()
    }
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener without taking ownership of it
    pub fn with_listener<L: TransferListener + 'static>(mut self, listener: &Arc<L>) -> Self {
        let listener: Arc<dyn TransferListener> = listener.clone();
        self.listener = Some(Arc::downgrade(&listener));
        self
    }

    /// Add a closure called on every progress update
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(f32, u64, Option<u64>) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Add a closure called once with the outcome
    pub fn with_completion<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Option<TransferError>, Option<PathBuf>) + Send + 'static,
    {
        self.completion = Mutex::new(Some(Box::new(callback)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.listener.is_none() && self.progress.is_none() && self.completion.lock().is_none()
    }

    pub(crate) fn notify_progress(&self, transfer: &Transfer, progress: f32, bytes_written: u64, bytes_expected: Option<u64>) {
        if let Some(listener) = self.listener.as_ref().and_then(Weak::upgrade) {
            listener.on_progress(transfer, progress, bytes_written, bytes_expected);
        }
        if let Some(callback) = &self.progress {
            callback(progress, bytes_written, bytes_expected);
        }
    }

    pub(crate) fn notify_completion(&self, transfer: &Transfer, error: Option<TransferError>, resulting_path: Option<PathBuf>) {
        if let Some(listener) = self.listener.as_ref().and_then(Weak::upgrade) {
            listener.on_completion(transfer, error.as_ref(), resulting_path.as_deref());
        }
        // Taken so the callback can never run twice
        let completion = self.completion.lock().take();
        if let Some(callback) = completion {
            callback(error, resulting_path);
        }
    }
}
