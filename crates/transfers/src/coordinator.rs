//! Main entry point for managed transfers
//!
//! Call chain:
//!
//! User Code
//! ↓
//! TransferCoordinator (this file)
//! ↓ create_task / create_task_with_resume_data
//! Transport (transport/*)
//! ↓ notifications
//! EventRouter (router.rs)
//! ↓ placement / error resolution
//! Observers on the callback queue (callback_queue.rs)

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::callback_queue::{CallbackExecutor, SerialQueue};
use crate::config::TransferConfig;
use crate::core::{
    Observers, Transfer, TransferError, TransferHandle, TransferListener, TransferMetrics, TransferState,
};
use crate::router::EventRouter;
use crate::transport::{ResumeData, TransferRequest, Transport, TransportDelegate, TransportTask};

/// Destination and observers for a new transfer
#[derive(Debug, Default)]
pub struct TransferOptions {
    directory: Option<PathBuf>,
    file_name: Option<String>,
    observers: Observers,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory to place the file in (defaults to the system temp dir)
    pub fn directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// File name to use instead of the server's suggestion
    pub fn file_name<S: Into<String>>(mut self, file_name: S) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Notify `listener`; the transfer only keeps a weak reference
    pub fn listener<L: TransferListener + 'static>(mut self, listener: &Arc<L>) -> Self {
        self.observers = self.observers.with_listener(listener);
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(f32, u64, Option<u64>) + Send + Sync + 'static,
    {
        self.observers = self.observers.with_progress(callback);
        self
    }

    pub fn on_completion<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Option<TransferError>, Option<PathBuf>) + Send + 'static,
    {
        self.observers = self.observers.with_completion(callback);
        self
    }

    pub fn observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }
}

/// Creates transfers and owns their registry
///
/// Construct one per process (or per independent group of transfers) and share
/// it by reference or `Arc`; there is no implicit global instance. Dropping
/// the coordinator stops event routing for transfers that are still running.
pub struct TransferCoordinator {
    transport: Arc<dyn Transport>,
    router: Arc<EventRouter>,
}

impl std::fmt::Debug for TransferCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferCoordinator")
            .field("router", &self.router)
            .finish()
    }
}

impl TransferCoordinator {
    /// Create a coordinator notifying observers on a dedicated [`SerialQueue`]
    pub fn new(config: TransferConfig, transport: Arc<dyn Transport>) -> std::io::Result<Self> {
        let queue = SerialQueue::new(config.callback_queue_name.clone())?;
        Ok(Self::with_executor(config, transport, Arc::new(queue)))
    }

    /// Create a coordinator notifying observers on a custom executor
    pub fn with_executor(
        config: TransferConfig,
        transport: Arc<dyn Transport>,
        executor: Arc<dyn CallbackExecutor>,
    ) -> Self {
        let router = Arc::new(EventRouter::new(config, executor));
        Self { transport, router }
    }

    pub fn config(&self) -> &TransferConfig {
        self.router.config()
    }

    pub fn metrics(&self) -> &TransferMetrics {
        self.router.metrics()
    }

    /// Start downloading `request`
    ///
    /// Never fails here; every failure is reported to the observers as the
    /// terminal notification.
    pub fn create(&self, request: TransferRequest, options: TransferOptions) -> TransferHandle {
        debug!("Creating transfer for {}", request.url);
        let task = self.transport.create_task(request, self.delegate());
        self.adopt(task, options)
    }

    /// Continue a transfer from data produced by `cancel_producing_resume_data`
    pub fn resume(&self, resume_data: ResumeData, options: TransferOptions) -> TransferHandle {
        debug!("Creating transfer from {} bytes of resume data", resume_data.as_bytes().len());
        let task = self.transport.create_task_with_resume_data(resume_data, self.delegate());
        self.adopt(task, options)
    }

    /// Snapshot of the registered transfers, in no particular order
    pub fn current_transfers(&self, state: Option<TransferState>) -> Vec<TransferHandle> {
        self.router.transfers(state)
    }

    fn delegate(&self) -> Weak<dyn TransportDelegate> {
        let router: Arc<dyn TransportDelegate> = self.router.clone();
        Arc::downgrade(&router)
    }

    fn adopt(&self, task: Arc<dyn TransportTask>, options: TransferOptions) -> TransferHandle {
        let TransferOptions { directory, file_name, observers } = options;
        let transfer = Arc::new(Transfer::new(task, directory, file_name, observers));

        // Registered before starting so no event can miss the registry
        self.router.register(transfer.clone());
        self.router.metrics().record_created();

        if self.router.config().start_immediately {
            transfer.resume();
        }
        transfer
    }
}
