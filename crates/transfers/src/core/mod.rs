//! Core types used throughout the transfer system
//!
//! Everything here is a leaf: the router and the coordinator depend on these
//! types, never the other way around.

pub mod error;
pub mod metrics;
pub mod observer;
pub mod transfer;

pub use error::{FileOperation, FilesystemError, Result, TransferError, TransferErrorKind};
pub use metrics::{TransferMetrics, TransferMetricsSnapshot};
pub use observer::{CompletionCallback, Observers, ProgressCallback, TransferListener};
pub use transfer::{Transfer, TransferHandle, TransferState, UNKNOWN_PROGRESS};
