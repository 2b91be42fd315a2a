//! Event routing between the transport and the transfers
//!
//! The router owns the registry of live transfers. Every transport
//! notification is looked up by transfer id, applied to the transfer's state,
//! and turned into observer notifications on the callback executor. Events for
//! ids that are not registered (already evicted, or never known) are dropped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::callback_queue::CallbackExecutor;
use crate::config::TransferConfig;
use crate::core::{
    FilesystemError, TransferError, TransferHandle, TransferMetrics, TransferState, UNKNOWN_PROGRESS,
};
use crate::placement;
use crate::transport::{
    RedirectDecision, ResponseInfo, TransferId, TransportDelegate, TransportError,
};

pub struct EventRouter {
    registry: Mutex<HashMap<TransferId, TransferHandle>>,
    config: TransferConfig,
    callbacks: Arc<dyn CallbackExecutor>,
    metrics: TransferMetrics,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("registered", &self.registry.lock().len())
            .field("config", &self.config)
            .finish()
    }
}

impl EventRouter {
    pub fn new(config: TransferConfig, callbacks: Arc<dyn CallbackExecutor>) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            config,
            callbacks,
            metrics: TransferMetrics::default(),
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn metrics(&self) -> &TransferMetrics {
        &self.metrics
    }

    pub(crate) fn register(&self, transfer: TransferHandle) {
        let id = transfer.id();
        if self.registry.lock().insert(id, transfer).is_some() {
            warn!("Transfer id {} was still registered, replacing the stale entry", id);
        }
        trace!("Registered transfer {}", id);
    }

    pub(crate) fn lookup(&self, id: TransferId) -> Option<TransferHandle> {
        self.registry.lock().get(&id).cloned()
    }

    fn evict(&self, id: TransferId) -> Option<TransferHandle> {
        let evicted = self.registry.lock().remove(&id);
        if evicted.is_some() {
            trace!("Evicted transfer {}", id);
        }
        evicted
    }

    /// Registered transfers, optionally only those in `state`
    pub fn transfers(&self, state: Option<TransferState>) -> Vec<TransferHandle> {
        let registered: Vec<TransferHandle> = self.registry.lock().values().cloned().collect();
        match state {
            Some(state) => registered
                .into_iter()
                .filter(|transfer| transfer.state() == state)
                .collect(),
            None => registered,
        }
    }
}

impl TransportDelegate for EventRouter {
    fn will_redirect(&self, id: TransferId, response: &ResponseInfo, target: &Url) -> RedirectDecision {
        if self.config.allow_redirection {
            debug!("Transfer {}: following HTTP {} redirect to {}", id, response.status, target);
            RedirectDecision::Follow
        } else {
            debug!("Transfer {}: refusing HTTP {} redirect to {}", id, response.status, target);
            self.metrics.record_redirect_refused();
            RedirectDecision::Refuse
        }
    }

    fn did_write_data(&self, id: TransferId, total_bytes_written: u64, total_bytes_expected: Option<u64>) {
        let Some(transfer) = self.lookup(id) else {
            trace!("Dropping progress for unregistered transfer {}", id);
            return;
        };

        let mut status = transfer.status.lock();
        if status.finished || status.cancel_requested {
            trace!("Dropping progress for finished or cancelled transfer {}", id);
            return;
        }
        if total_bytes_written < status.bytes_written {
            trace!(
                "Dropping stale progress for transfer {} ({} < {})",
                id, total_bytes_written, status.bytes_written
            );
            return;
        }

        let (progress, bytes_expected) = progress_fraction(total_bytes_written, total_bytes_expected);
        status.progress = progress;
        status.bytes_written = total_bytes_written;
        status.bytes_expected = bytes_expected;

        // Enqueued under the lock so queue order follows update order
        let notified = transfer.clone();
        self.callbacks.execute(Box::new(move || {
            notified
                .observers
                .notify_progress(&notified, progress, total_bytes_written, bytes_expected);
        }));
    }

    fn did_finish_staging(&self, id: TransferId, staged_path: &Path) {
        let Some(transfer) = self.lookup(id) else {
            warn!("Staged file for unregistered transfer {}, deleting {}", id, staged_path.display());
            self.metrics.record_orphaned_file();
            if let Err(e) = fs::remove_file(staged_path) {
                debug!("Could not delete orphaned file {}: {}", staged_path.display(), e);
            }
            return;
        };

        if let Some(response) = transfer.response() {
            if !response.is_success() {
                debug!(
                    "Transfer {}: not placing body of HTTP {} response",
                    id, response.status
                );
                return;
            }
        }

        let outcome = transfer
            .destination_path()
            .and_then(|destination| placement::place(staged_path, &destination));

        let mut status = transfer.status.lock();
        match outcome {
            Ok(path) => {
                info!("Transfer {}: placed download at {}", id, path.display());
                status.resulting_path = Some(path);
                status.last_error = None;
            }
            Err(reason) => {
                warn!("Transfer {}: placement failed: {}", id, reason);
                status.last_error = Some(TransferError::filesystem(reason, transfer.request_url()));
            }
        }
    }

    fn did_complete(&self, id: TransferId, error: Option<TransportError>) {
        let Some(transfer) = self.evict(id) else {
            trace!("Dropping completion for unregistered transfer {}", id);
            return;
        };

        let failing_url = transfer.request_url();
        let response = transfer.response();

        let mut status = transfer.status.lock();
        let resolved = resolve_error(error, status.last_error.take(), response.as_ref(), failing_url.clone())
            .or_else(|| {
                status.resulting_path.is_none().then(|| {
                    TransferError::filesystem(FilesystemError::NothingStaged, failing_url.clone())
                })
            });

        match &resolved {
            Some(error) => {
                debug!("Transfer {} failed: {}", id, error);
                if error.is_cancellation() {
                    self.metrics.record_cancelled();
                }
                self.metrics.record_failed();
                status.resulting_path = None;
                status.last_error = Some(error.clone());
            }
            None => {
                debug!("Transfer {} completed", id);
                self.metrics.record_succeeded(status.bytes_written);
            }
        }
        status.finished = true;

        let resulting_path = status.resulting_path.clone();
        let notified = transfer.clone();
        self.callbacks.execute(Box::new(move || {
            notified
                .observers
                .notify_completion(&notified, resolved, resulting_path);
        }));
    }
}

/// Progress fraction and the expected size it was computed against
///
/// A byte count beyond the announced size makes the size unknown.
pub(crate) fn progress_fraction(bytes_written: u64, bytes_expected: Option<u64>) -> (f32, Option<u64>) {
    match bytes_expected {
        Some(0) if bytes_written == 0 => (1.0, Some(0)),
        Some(expected) if expected > 0 && bytes_written <= expected => {
            ((bytes_written as f64 / expected as f64) as f32, Some(expected))
        }
        _ => (UNKNOWN_PROGRESS, None),
    }
}

/// Pick the terminal error: transport, then placement, then HTTP status
fn resolve_error(
    transport: Option<TransportError>,
    placement: Option<TransferError>,
    response: Option<&ResponseInfo>,
    failing_url: Option<Url>,
) -> Option<TransferError> {
    if let Some(underlying) = transport {
        return Some(TransferError::transport(underlying, failing_url));
    }
    if placement.is_some() {
        return placement;
    }
    response
        .filter(|response| !response.is_success())
        .map(|response| TransferError::http_status(response.status, failing_url))
}
