//! The designated execution context for observer notifications
//!
//! Transport workers never call observers directly. The router hands every
//! notification to a [`CallbackExecutor`], which runs the jobs away from the
//! worker threads and in the order they were submitted.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// A queued observer notification
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Serialized execution context for observer notifications
///
/// Implementations must run jobs in submission order and must never run a job
/// on the submitting thread: the router submits while holding the
/// transfer's state lock.
pub trait CallbackExecutor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs jobs one at a time on a dedicated named thread
///
/// The thread drains the remaining jobs and exits once the queue is dropped.
/// A panicking job is logged and skipped; later jobs still run.
pub struct SerialQueue {
    name: String,
    sender: mpsc::UnboundedSender<Job>,
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue").field("name", &self.name).finish()
    }
}

impl SerialQueue {
    pub fn new<S: Into<String>>(name: S) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let thread_name = name.clone();
        thread::Builder::new().name(name.clone()).spawn(move || {
            while let Some(job) = receiver.blocking_recv() {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!(
                        "Observer panicked on callback queue '{}': {}",
                        thread_name,
                        panic_message(payload.as_ref())
                    );
                }
            }
            debug!("Callback queue drained, exiting");
        })?;

        Ok(Self { name, sender })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the caller is running on this queue's thread
    pub fn is_current(&self) -> bool {
        thread::current().name() == Some(self.name.as_str())
    }
}

impl CallbackExecutor for SerialQueue {
    fn execute(&self, job: Job) {
        if self.sender.send(job).is_err() {
            warn!("Callback queue '{}' has stopped, dropping notification", self.name);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
