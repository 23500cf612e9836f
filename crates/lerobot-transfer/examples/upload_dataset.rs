//! Example demonstrating a full dataset upload
//!
//! Run this example with:
//! ```
//! LEROBOT_HUB_EMAIL=me@lab.org LEROBOT_HUB_PASSWORD=secret \
//!     cargo run --example upload_dataset -- ./my_dataset "My Dataset"
//! ```

use lerobot_transfer::transfer::{ConsoleProgressReporter, IntoProgressCallback};
use lerobot_transfer::{
    ApiClient, AuthSession, ClientConfig, DatasetClient, TransferConfig, TransferError, UploadRequest,
};
use std::sync::Arc;

fn required_env(name: &str) -> lerobot_transfer::Result<String> {
    std::env::var(name).map_err(|_| TransferError::Configuration {
        message: format!("{} is not set", name),
        field: Some(name.to_string()),
        suggestion: None,
    })
}

#[tokio::main]
async fn main() -> lerobot_transfer::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let (Some(path), Some(name)) = (args.next(), args.next()) else {
        eprintln!("usage: upload_dataset <path> <name> [description] [task-category]");
        std::process::exit(2);
    };

    let client_config = ClientConfig::from_env();
    println!("Connecting to {}...", client_config.api_url);
    let api = ApiClient::new(&client_config)?;
    let session = AuthSession::login(api.clone(), &required_env("LEROBOT_HUB_EMAIL")?, &required_env("LEROBOT_HUB_PASSWORD")?).await?;
    println!("Authenticated successfully!");

    let config = TransferConfig::builder().with_max_workers(4).build()?;
    let client = DatasetClient::new(api.with_credentials(Arc::new(session)), config)?
        .with_progress(ConsoleProgressReporter::new(false).into_callback());

    let mut request = UploadRequest::new(path, name);
    request.description = args.next();
    request.task_category = args.next();

    let outcome = client.upload_dataset(request).await?;
    let dataset = &outcome.dataset;

    println!("\n{}", "=".repeat(50));
    println!("Upload Summary:");
    println!("{}", "=".repeat(50));
    println!("  Dataset ID:    {}", dataset.id);
    println!("  Name:          {}", dataset.name);
    match dataset.episode_count {
        Some(count) => println!("  Episodes:      {}", count),
        None => println!("  Episodes:      N/A"),
    }
    match dataset.total_frames {
        Some(frames) => println!("  Total Frames:  {}", frames),
        None => println!("  Total Frames:  N/A"),
    }
    match dataset.fps {
        Some(fps) => println!("  FPS:           {}", fps),
        None => println!("  FPS:           N/A"),
    }
    println!("  Robot Type:    {}", dataset.robot_type.as_deref().unwrap_or("N/A"));
    println!("  Status:        {}", dataset.upload_status);
    println!("  Organization:  {}", dataset.organization_name.as_deref().unwrap_or("N/A"));
    println!("  Transfer:      {} ({}/{} files)", outcome.report.status, outcome.report.succeeded, outcome.report.total_units);
    println!("{}", "=".repeat(50));

    for failed in &outcome.report.failed {
        eprintln!("  failed: {} after {} attempt(s): {}", failed.path, failed.attempts, failed.reason);
    }
    for missing in &outcome.missing {
        eprintln!("  missing: {}", missing);
    }

    Ok(())
}
