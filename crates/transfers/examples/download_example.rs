//! Example demonstrating how to use the transfer coordinator
//!
//! Downloads a file, then starts a second download, cancels it with resume
//! data and continues it from where it stopped.
//!
//! Run this example with:
//! ```
//! cargo run --example download_example
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::oneshot;
use transfers::{
    HttpTransport, HttpTransportConfig, Transfer, TransferConfig, TransferCoordinator, TransferError,
    TransferListener, TransferOptions, TransferRequest,
};

/// Prints every notification, including the thread it arrived on
struct ConsoleListener;

impl TransferListener for ConsoleListener {
    fn on_progress(&self, transfer: &Transfer, progress: f32, written: u64, expected: Option<u64>) {
        match expected {
            Some(total) => println!(
                "   [{}] Progress: {:.1}% ({} / {} bytes)",
                transfer.id(),
                progress * 100.0,
                written,
                total
            ),
            None => println!("   [{}] Downloaded: {} bytes", transfer.id(), written),
        }
    }

    fn on_completion(&self, transfer: &Transfer, error: Option<&TransferError>, path: Option<&Path>) {
        let thread = std::thread::current();
        match (error, path) {
            (Some(error), _) => println!("❌ [{}] Failed ({}): {}", transfer.id(), error.category(), error),
            (None, Some(path)) => println!("✅ [{}] Saved to {}", transfer.id(), path.display()),
            (None, None) => println!("⚠️  [{}] Finished without a file", transfer.id()),
        }
        println!("   (notified on thread {:?})", thread.name());
    }
}

fn with_completion(options: TransferOptions) -> (TransferOptions, oneshot::Receiver<Option<PathBuf>>) {
    let (done_tx, done_rx) = oneshot::channel();
    let options = options.on_completion(move |_error, path| {
        let _ = done_tx.send(path);
    });
    (options, done_rx)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    println!("🚀 Starting transfer example");

    let temp_dir = tempdir()?;
    println!("📁 Download directory: {}", temp_dir.path().display());

    let transport_config = HttpTransportConfig::from_env()?
        .with_staging_dir(temp_dir.path().join("staging"))
        .with_read_timeout(Duration::from_secs(60));
    let transport = Arc::new(HttpTransport::new(transport_config)?);
    let config = TransferConfig::from_env()?.with_allow_redirection(true);
    let coordinator = TransferCoordinator::new(config, transport)?;
    let listener = Arc::new(ConsoleListener);

    // A plain download
    let request = TransferRequest::parse("https://httpbin.org/bytes/1024")?;
    let (options, done) = with_completion(
        TransferOptions::new()
            .directory(temp_dir.path())
            .file_name("test_file.bin")
            .listener(&listener),
    );
    println!("🔄 Starting download...");
    coordinator.create(request, options);
    done.await?;

    // A download that is interrupted and picked up again
    let request = TransferRequest::parse("https://httpbin.org/range/1048576?chunk_size=4096&duration=4")?;
    let (options, _first_done) = with_completion(TransferOptions::new().listener(&listener));
    let transfer = coordinator.create(request, options);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let (data_tx, data_rx) = oneshot::channel();
    println!("⏸️  Cancelling transfer {} after {} bytes", transfer.id(), transfer.bytes_written());
    transfer.cancel_producing_resume_data(move |data| {
        let _ = data_tx.send(data);
    });

    match data_rx.await? {
        Some(data) => {
            println!("🔄 Resuming from {} bytes of resume data", data.as_bytes().len());
            let (options, done) = with_completion(
                TransferOptions::new()
                    .directory(temp_dir.path())
                    .file_name("resumed.bin")
                    .listener(&listener),
            );
            coordinator.resume(data, options);
            done.await?;
        }
        None => println!("⚠️  Server does not support resuming this transfer"),
    }

    let metrics = coordinator.metrics().snapshot();
    println!("📊 Metrics: {:?}", metrics);
    println!("   Success rate: {:.0}%", metrics.success_rate() * 100.0);

    Ok(())
}
