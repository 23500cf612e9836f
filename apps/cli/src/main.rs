use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lerobot_transfer::api::{DatasetStatus, PermissionLevel};
use lerobot_transfer::auth::StoredCredentials;
use lerobot_transfer::transfer::{ConsoleProgressReporter, IntoProgressCallback, TransferConfigBuilder};
use lerobot_transfer::{
    ApiClient, AuthSession, ClientConfig, CredentialStore, Dataset, DatasetClient, ReportStatus,
    TransferConfig, TransferError, TransferReport, UploadRequest,
};

#[derive(Parser)]
#[command(name = "lerobot-hub", version, about = "Upload and download LeRobot datasets")]
struct Cli {
    /// Dataset service base URL
    #[arg(long, global = true, env = "LEROBOT_HUB_API_URL")]
    api_url: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store credentials locally
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "LEROBOT_HUB_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget stored credentials
    Logout,
    /// Show the logged in user
    Whoami,
    /// List datasets visible to you
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long)]
        status: Option<DatasetStatus>,
    },
    /// Show one dataset record
    Info { dataset_id: String },
    /// Delete a dataset
    Delete {
        dataset_id: String,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Grant another organization access to a dataset
    Assign {
        dataset_id: String,
        organization_id: String,
        #[arg(long, default_value = "download")]
        permission: PermissionLevel,
    },
    /// Revoke an assignment
    Unassign { dataset_id: String, assignment_id: String },
    /// Upload a local LeRobot dataset
    Upload(UploadArgs),
    /// Download a dataset into a directory
    Download(DownloadArgs),
}

#[derive(Args)]
struct TransferArgs {
    /// Concurrent transfers in the bulk phase
    #[arg(short, long, default_value_t = 4)]
    workers: usize,
    /// Attempts per file before giving up
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,
}

#[derive(Args)]
struct UploadArgs {
    path: PathBuf,
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    task_category: Option<String>,
    /// Upload even if files declared by meta/info.json are missing
    #[arg(long)]
    lenient: bool,
    /// Leave the dataset unfinalized if any file fails
    #[arg(long)]
    all_or_nothing: bool,
    /// Hash every file before uploading
    #[arg(long)]
    checksums: bool,
    /// Skip asking the service to confirm each uploaded file
    #[arg(long)]
    no_verify: bool,
    #[command(flatten)]
    transfer: TransferArgs,
}

#[derive(Args)]
struct DownloadArgs {
    dataset_id: String,
    /// Target directory (defaults to the dataset id)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Download files again even if a matching copy exists
    #[arg(long)]
    force: bool,
    #[command(flatten)]
    transfer: TransferArgs,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn client_config(cli: &Cli) -> ClientConfig {
    let config = ClientConfig::from_env();
    match cli.api_url {
        Some(ref url) => config.with_api_url(url),
        None => config,
    }
}

/// API client carrying the stored session, refreshed and re-saved as needed
async fn authenticated_api(cli: &Cli) -> Result<ApiClient> {
    let mut config = client_config(cli);
    let store = CredentialStore::from_config(&config)?;
    let Some(saved) = store.load().await? else {
        bail!(TransferError::Authentication {
            message: "Not authenticated. Run login first.".to_string(),
        });
    };

    if cli.api_url.is_none() && saved.api_url != config.api_url {
        info!("Using API URL {} from stored credentials", saved.api_url);
        config = config.with_api_url(&saved.api_url);
    }

    let api = ApiClient::new(&config)?;
    let session = AuthSession::from_tokens(api.clone(), saved.tokens()).with_store(store);
    Ok(api.with_credentials(Arc::new(session)))
}

fn transfer_config(args: &TransferArgs) -> TransferConfigBuilder {
    TransferConfig::builder()
        .with_max_workers(args.workers)
        .with_max_attempts(args.max_attempts)
}

fn dataset_client(api: ApiClient, config: TransferConfig, cli: &Cli, cancel: CancellationToken) -> Result<DatasetClient> {
    let client = DatasetClient::new(api, config)?.with_cancellation(cancel);
    Ok(if cli.json {
        client
    } else {
        client.with_progress(ConsoleProgressReporter::new(cli.verbose > 0).into_callback())
    })
}

/// Cancel the transfer on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling transfer");
            token.cancel();
        }
    });
    cancel
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_dataset(dataset: &Dataset) {
    println!("{} ({})", dataset.name, dataset.id);
    if let Some(ref description) = dataset.description {
        println!("  Description:   {}", description);
    }
    if let Some(count) = dataset.episode_count {
        println!("  Episodes:      {}", count);
    }
    if let Some(frames) = dataset.total_frames {
        println!("  Total Frames:  {}", frames);
    }
    if let Some(fps) = dataset.fps {
        println!("  FPS:           {}", fps);
    }
    println!("  Robot Type:    {}", dataset.robot_type.as_deref().unwrap_or("N/A"));
    println!("  Status:        {}", dataset.upload_status);
    if let Some(ref organization) = dataset.organization_name {
        println!("  Organization:  {}", organization);
    }
    if let Some(bytes) = dataset.file_size_bytes {
        println!("  Size:          {} bytes", bytes);
    }
}

fn print_report(report: &TransferReport) {
    println!(
        "{} {}: {}/{} succeeded, {} skipped, {} failed, {} bytes in {} ms",
        report.direction,
        report.status,
        report.succeeded,
        report.total_units,
        report.skipped,
        report.failed.len(),
        report.bytes_transferred,
        report.elapsed_ms
    );
    for failed in &report.failed {
        println!("  failed {} [{}] after {} attempt(s): {}", failed.path, failed.role, failed.attempts, failed.reason);
    }
    if report.cancelled {
        println!("  transfer was cancelled");
    }
    if let Some(ref error) = report.finalize_error {
        println!("  finalize failed: {}", error);
    }
}

fn exit_for(report: &TransferReport) -> ExitCode {
    match report.status {
        ReportStatus::Complete => ExitCode::SUCCESS,
        ReportStatus::Partial | ReportStatus::Failed => ExitCode::FAILURE,
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Print a report attached to a failed metadata phase instead of just the error
fn report_outcome(cli: &Cli, result: lerobot_transfer::Result<TransferReport>) -> Result<ExitCode> {
    let report = match result {
        Ok(report) => report,
        Err(TransferError::MetadataPhaseFailed { report }) => *report,
        Err(e) => return Err(e.into()),
    };
    if cli.json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(exit_for(&report))
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Login { ref email, ref password } => {
            let config = client_config(cli);
            let store = CredentialStore::from_config(&config)?;
            let api = ApiClient::new(&config)?;
            let tokens = api.login(email, password).await?;
            store.save(&StoredCredentials::new(api.base_url(), &tokens)).await?;
            println!("Logged in as {} (credentials saved to {})", email, store.path().display());
        }
        Command::Logout => {
            let store = CredentialStore::from_config(&client_config(cli))?;
            if store.clear().await? {
                println!("Logged out");
            } else {
                println!("Not logged in");
            }
        }
        Command::Whoami => {
            let user = authenticated_api(cli).await?.current_user().await?;
            if cli.json {
                print_json(&user)?;
            } else {
                let name = [user.first_name.as_deref(), user.last_name.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                if name.is_empty() {
                    println!("{}", user.email);
                } else {
                    println!("{} ({})", user.email, name);
                }
                if let Some(ref organization) = user.organization {
                    println!("  Organization: {} ({})", organization.name, organization.id);
                }
                if let Some(ref role) = user.role {
                    println!("  Role:         {}", role);
                }
            }
        }
        Command::List { page, limit, status } => {
            let datasets = authenticated_api(cli).await?.list_datasets(page, limit, status).await?;
            if cli.json {
                print_json(&datasets)?;
            } else if datasets.is_empty() {
                println!("No datasets found");
            } else {
                for dataset in &datasets {
                    println!(
                        "{:<26} {:<32} {:>10} {:>9} episodes",
                        dataset.id,
                        dataset.name,
                        dataset.upload_status,
                        dataset.episode_count.unwrap_or(0)
                    );
                }
            }
        }
        Command::Info { ref dataset_id } => {
            let dataset = authenticated_api(cli).await?.get_dataset(dataset_id).await?;
            if cli.json {
                print_json(&dataset)?;
            } else {
                print_dataset(&dataset);
            }
        }
        Command::Delete { ref dataset_id, yes } => {
            if !yes && !confirm(&format!("Delete dataset {}?", dataset_id))? {
                println!("Aborted");
                return Ok(ExitCode::FAILURE);
            }
            authenticated_api(cli).await?.delete_dataset(dataset_id).await?;
            println!("Deleted dataset {}", dataset_id);
        }
        Command::Assign { ref dataset_id, ref organization_id, permission } => {
            authenticated_api(cli)
                .await?
                .assign_dataset(dataset_id, organization_id, permission)
                .await?;
            println!("Assigned dataset {} to organization {}", dataset_id, organization_id);
        }
        Command::Unassign { ref dataset_id, ref assignment_id } => {
            authenticated_api(cli).await?.remove_assignment(dataset_id, assignment_id).await?;
            println!("Removed assignment {} from dataset {}", assignment_id, dataset_id);
        }
        Command::Upload(ref args) => {
            let config = transfer_config(&args.transfer)
                .with_strict(!args.lenient)
                .with_all_or_nothing(args.all_or_nothing)
                .with_compute_checksums(args.checksums)
                .with_verify_uploads(!args.no_verify)
                .build()?;
            let client = dataset_client(authenticated_api(cli).await?, config, cli, cancel_on_ctrl_c())?;

            let mut request = UploadRequest::new(&args.path, &args.name);
            request.description = args.description.clone();
            request.task_category = args.task_category.clone();

            let outcome = match client.upload_dataset(request).await {
                Ok(outcome) => outcome,
                Err(e) => return report_outcome(cli, Err(e)),
            };
            for missing in &outcome.missing {
                warn!("Declared file {} was not uploaded", missing);
            }
            if cli.json {
                print_json(&outcome.report)?;
            } else {
                print_dataset(&outcome.dataset);
                print_report(&outcome.report);
            }
            return Ok(exit_for(&outcome.report));
        }
        Command::Download(ref args) => {
            let config = transfer_config(&args.transfer).with_skip_existing(!args.force).build()?;
            let client = dataset_client(authenticated_api(cli).await?, config, cli, cancel_on_ctrl_c())?;
            let output = args.output.clone().unwrap_or_else(|| PathBuf::from(&args.dataset_id));
            let result = client.download_dataset(&args.dataset_id, &output).await;
            if result.is_ok() && !cli.json {
                println!("Saved to {}", output.display());
            }
            return report_outcome(cli, result);
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprint!("{}", describe_error(&e, cli.verbose));
            ExitCode::FAILURE
        }
    }
}

/// Error text for stderr; `-vv` expands transfer errors into a full report
fn describe_error(error: &anyhow::Error, verbose: u8) -> String {
    match error.downcast_ref::<TransferError>() {
        Some(transfer) if verbose >= 2 => transfer.detailed_report(),
        Some(transfer) => match transfer.suggestion() {
            Some(suggestion) => format!("error: {:#}\nhint: {}\n", error, suggestion),
            None => format!("error: {:#}\n", error),
        },
        None => format!("error: {:#}\n", error),
    }
}
