//! Transfers Library
//!
//! This library manages concurrent HTTP downloads on behalf of an
//! application. Each download can be suspended, resumed and cancelled, and a
//! cancelled download can hand back resume data to continue it later.
//! Finished downloads are moved from the staging area to their destination,
//! and every observer hears about progress and the outcome on one dedicated
//! callback thread.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transfers::{
//!     HttpTransport, HttpTransportConfig, TransferConfig, TransferCoordinator,
//!     TransferOptions, TransferRequest,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::new(HttpTransportConfig::default())?);
//! let coordinator = TransferCoordinator::new(TransferConfig::default(), transport)?;
//!
//! let request = TransferRequest::parse("https://example.com/file.zip")?;
//! let options = TransferOptions::new()
//!     .directory("/path/to/downloads")
//!     .on_progress(|progress, written, expected| {
//!         if progress >= 0.0 {
//!             println!("Progress: {:.1}% ({} of {:?} bytes)", progress * 100.0, written, expected);
//!         } else {
//!             println!("Downloaded {} bytes", written);
//!         }
//!     })
//!     .on_completion(|error, path| match error {
//!         Some(error) => eprintln!("Download failed: {}", error),
//!         None => println!("Saved to {:?}", path),
//!     });
//!
//! let transfer = coordinator.create(request, options);
//! println!("Started transfer {}", transfer.id());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Concurrent transfers**: any number of downloads tracked by one coordinator
//! - **Lifecycle control**: suspend, resume and cancel each transfer
//! - **Resume data**: continue a cancelled download with HTTP range requests
//! - **Atomic placement**: destinations are replaced in one rename
//! - **Redirect policy**: redirects are refused unless explicitly allowed
//! - **Serialized callbacks**: all observers run on one named thread, in order

pub mod callback_queue;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod placement;
pub mod router;
pub mod transport;

// Re-export commonly used types for convenience
pub use callback_queue::{CallbackExecutor, SerialQueue};
pub use config::{ConfigError, HttpTransportConfig, TransferConfig};
pub use coordinator::{TransferCoordinator, TransferOptions};
pub use crate::core::{
    FileOperation, FilesystemError, Observers, Result, Transfer, TransferError, TransferErrorKind,
    TransferHandle, TransferListener, TransferMetrics, TransferMetricsSnapshot, TransferState,
    UNKNOWN_PROGRESS,
};
pub use router::EventRouter;
pub use transport::{
    HttpTransport, HttpTransportError, RedirectDecision, ResponseInfo, ResumeData, TransferId, TransferRequest,
    Transport, TransportDelegate, TransportError, TransportTask,
};
