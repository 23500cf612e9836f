//! Example demonstrating a dataset download into a local directory
//!
//! Run this example with:
//! ```
//! LEROBOT_HUB_TOKEN=... cargo run --example download_dataset -- <dataset-id> ./out
//! ```

use lerobot_transfer::{ApiClient, ClientConfig, DatasetClient, ProgressEvent, StaticToken, TransferConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> lerobot_transfer::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(dataset_id) = args.next() else {
        eprintln!("usage: download_dataset <dataset-id> [output-dir]");
        std::process::exit(2);
    };
    let output = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(&dataset_id));
    let token = std::env::var("LEROBOT_HUB_TOKEN").unwrap_or_default();

    let api = ApiClient::new(&ClientConfig::from_env())?.with_credentials(Arc::new(StaticToken::new(token)));
    let config = TransferConfig::builder().with_max_workers(8).build()?;

    // Set up progress tracking
    let progress = Arc::new(|event: ProgressEvent| match event {
        ProgressEvent::PhaseStarted { phase, units, .. } => {
            println!("Phase {}: {} file(s)", phase, units);
        }
        ProgressEvent::UnitCompleted { path, bytes } => {
            println!("  {} ({} bytes)", path, bytes);
        }
        ProgressEvent::RetryAttempt { path, attempt, max_attempts, .. } => {
            println!("  retry {} of {} for {}", attempt, max_attempts, path);
        }
        ProgressEvent::UnitFailed { path, reason } => {
            eprintln!("  failed {}: {}", path, reason);
        }
        _ => {}
    });

    let client = DatasetClient::new(api, config)?.with_progress(progress);
    let report = client.download_dataset(&dataset_id, &output).await?;

    println!(
        "Download {}: {}/{} files, {} skipped, {} bytes in {} ms",
        report.status,
        report.succeeded,
        report.total_units,
        report.skipped,
        report.bytes_transferred,
        report.elapsed_ms
    );
    println!("Saved to {}", output.display());
    Ok(())
}
