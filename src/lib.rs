//! datacollective: client for the Mozilla Data Collective dataset platform.
//!
//! The library fetches dataset metadata, downloads dataset archives with
//! resumable transfers, extracts and loads them, and submits new datasets
//! through a resumable multipart upload.
//!
//! # Modules
//!
//! - [`config`]: API location, credentials and download directory
//! - [`api`]: authenticated HTTP access and dataset metadata
//! - [`download`]: download planning, resume decisions and the transfer itself
//! - [`upload`]: multipart uploads driven by a local state file
//! - [`submission`]: dataset submission drafts and the submit call
//! - [`extract`], [`local`]: unpacking archives and reading their tables
//! - [`slug`]: `organization/dataset` names for dataset ids
//! - [`error`]: Error types for datacollective operations

pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod local;
pub mod slug;
pub mod submission;
pub mod upload;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};

pub use api::ApiClient;
pub use config::ClientConfig;
pub use error::{DataCollectiveError, DownloadError};

/// The datacollective CLI application.
#[derive(Parser)]
#[command(name = "datacollective")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options shared by every subcommand.
#[derive(clap::Args)]
struct GlobalArgs {
    /// Base URL of the Data Collective API.
    #[arg(long, global = true, env = config::ENV_API_URL, default_value = config::DEFAULT_API_URL)]
    api_url: String,

    /// API token used for authenticated requests.
    #[arg(long, global = true, env = config::ENV_API_KEY, hide_env_values = true)]
    api_key: Option<String>,

    /// Directory downloads go to when none is given.
    #[arg(long, global = true, env = config::ENV_DOWNLOAD_PATH)]
    download_dir: Option<PathBuf>,

    /// JSON file mapping `organization/dataset` slugs to dataset ids.
    #[arg(long, global = true)]
    slugs: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Show metadata for a dataset.
    Details(DetailsArgs),
    /// Download a dataset archive, resuming an interrupted download.
    Download(DownloadArgs),
    /// Extract a downloaded archive.
    Extract(ExtractArgs),
    /// Summarize an extracted dataset directory.
    Inspect(InspectArgs),
    /// Upload a file for an existing submission.
    Upload(UploadArgs),
    /// Create a submission draft.
    Draft(DraftArgs),
    /// Submit a draft for review.
    Submit(SubmitArgs),
    /// Create a draft, upload a file for it and submit it.
    Publish(PublishArgs),
}

#[derive(clap::Args)]
struct DetailsArgs {
    /// Dataset id or `organization/dataset` slug.
    dataset: String,
}

#[derive(clap::Args)]
struct DownloadArgs {
    /// Dataset id or `organization/dataset` slug.
    dataset: String,

    /// Directory to save the archive in.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Download again even if the archive already exists.
    #[arg(long)]
    overwrite: bool,

    /// Extract the archive after downloading.
    #[arg(long)]
    extract: bool,

    /// Do not draw a progress bar.
    #[arg(long)]
    no_progress: bool,
}

#[derive(clap::Args)]
struct ExtractArgs {
    /// Archive to extract (.tar.gz, .tgz, .tar or .zip).
    archive: PathBuf,

    /// Destination directory (default: next to the archive, without its suffix).
    #[arg(long)]
    dest: Option<PathBuf>,
}

#[derive(clap::Args)]
struct InspectArgs {
    /// Extracted dataset directory (`mcv-scripted-*` or `mcv-spontaneous-*`).
    dir: PathBuf,
}

#[derive(clap::Args)]
struct UploadTarget {
    /// File to upload.
    file: PathBuf,

    /// MIME type of the file.
    #[arg(long, default_value = "application/gzip")]
    mime_type: String,

    /// Name announced to the platform (default: the file name).
    #[arg(long)]
    filename: Option<String>,

    /// Upload state file (default: `<file>.mdc-upload.json`).
    #[arg(long)]
    state_path: Option<PathBuf>,

    /// Ignore any saved upload state and start over.
    #[arg(long)]
    no_resume: bool,
}

impl UploadTarget {
    fn options(&self) -> upload::UploadOptions {
        upload::UploadOptions {
            filename: self.filename.clone(),
            state_path: self.state_path.clone(),
            resume: !self.no_resume,
        }
    }
}

#[derive(clap::Args)]
struct UploadArgs {
    #[command(flatten)]
    target: UploadTarget,

    /// Submission the file belongs to.
    #[arg(long)]
    submission_id: String,
}

#[derive(clap::Args)]
struct DraftArgs {
    /// Dataset name.
    #[arg(long)]
    name: String,

    /// Full dataset description.
    #[arg(long)]
    description: String,
}

#[derive(clap::Args)]
struct SubmitArgs {
    /// Submission to submit.
    submission_id: String,

    /// JSON file with the datasheet fields.
    #[arg(long)]
    fields: PathBuf,
}

#[derive(clap::Args)]
struct PublishArgs {
    #[command(flatten)]
    target: UploadTarget,

    /// Dataset name.
    #[arg(long)]
    name: String,

    /// Full dataset description.
    #[arg(long)]
    description: String,

    /// JSON file with the datasheet fields.
    #[arg(long)]
    fields: PathBuf,
}

/// Run the datacollective CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), DataCollectiveError> {
    let cli = Cli::parse();
    let global = &cli.global;

    match cli.command {
        Some(Commands::Details(args)) => run_details(global, args),
        Some(Commands::Download(args)) => run_download(global, args),
        Some(Commands::Extract(args)) => run_extract(args),
        Some(Commands::Inspect(args)) => run_inspect(args),
        Some(Commands::Upload(args)) => run_upload(global, args),
        Some(Commands::Draft(args)) => run_draft(global, args),
        Some(Commands::Submit(args)) => run_submit(global, args),
        Some(Commands::Publish(args)) => run_publish(global, args),
        None => {
            println!("datacollective {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Client for the Mozilla Data Collective dataset platform.");
            println!();
            println!("Run 'datacollective --help' for usage information.");
            Ok(())
        }
    }
}

impl GlobalArgs {
    fn client(&self) -> Result<ApiClient, DataCollectiveError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                DataCollectiveError::Config(format!(
                    "missing API key; pass --api-key or set {}",
                    config::ENV_API_KEY
                ))
            })?;

        let mut config = ClientConfig::new(api_key).with_api_url(&self.api_url)?;
        if let Some(dir) = &self.download_dir {
            config = config.with_download_dir(dir.clone());
        }
        ApiClient::new(config)
    }

    fn dataset_id(&self, dataset: &str) -> Result<String, DataCollectiveError> {
        let index = match &self.slugs {
            Some(path) => slug::SlugIndex::load(path)?,
            None => slug::SlugIndex::default(),
        };
        Ok(index.resolve(dataset).to_string())
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), DataCollectiveError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| DataCollectiveError::Io(std::io::Error::other(err)))?;
    println!("{text}");
    Ok(())
}

fn run_details(global: &GlobalArgs, args: DetailsArgs) -> Result<(), DataCollectiveError> {
    let client = global.client()?;
    let details = api::get_dataset_details(&client, &global.dataset_id(&args.dataset)?)?;
    print_json(&details)
}

fn run_download(global: &GlobalArgs, args: DownloadArgs) -> Result<(), DataCollectiveError> {
    let client = global.client()?;
    let dataset_id = global.dataset_id(&args.dataset)?;
    let cancel = interrupt_flag();
    let archive = download::save_dataset_to_disk_cancellable(
        &client,
        &dataset_id,
        args.dir.as_deref(),
        !args.no_progress,
        args.overwrite,
        &cancel,
    )?;
    println!("{}", archive.display());

    if args.extract {
        let extracted = extract::extract_archive(&archive, None)?;
        println!("{}", extracted.display());
    }
    Ok(())
}

/// Flag raised by Ctrl-C so an interrupted download stops between chunks
/// and reports how to resume.
fn interrupt_flag() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let raised = Arc::clone(&cancel);
    if let Err(err) = ctrlc::set_handler(move || {
        eprintln!("Received interrupt signal, stopping download...");
        raised.store(true, Ordering::Relaxed);
    }) {
        tracing::warn!(error = %err, "could not install interrupt handler");
    }
    cancel
}

fn run_extract(args: ExtractArgs) -> Result<(), DataCollectiveError> {
    let extracted = extract::extract_archive(&args.archive, args.dest.as_deref())?;
    println!("{}", extracted.display());
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<(), DataCollectiveError> {
    let dataset = local::LocalDataset::open(&args.dir)?;
    let table = dataset.table();

    println!("Dataset: {}", dataset.root().display());
    println!("Kind:    {:?}", dataset.kind());
    println!("Rows:    {}", table.len());
    println!("Columns: {}", table.columns.join(", "));
    let splits = dataset.splits();
    if !splits.is_empty() {
        println!("Splits:  {}", splits.join(", "));
    }
    Ok(())
}

fn run_upload(global: &GlobalArgs, args: UploadArgs) -> Result<(), DataCollectiveError> {
    let client = global.client()?;
    let state = upload::upload_dataset_file(
        &client,
        &args.target.file,
        &args.submission_id,
        &args.target.mime_type,
        &args.target.options(),
    )?;
    print_json(&state)
}

fn run_draft(global: &GlobalArgs, args: DraftArgs) -> Result<(), DataCollectiveError> {
    let draft = submission::SubmissionDraft::new(args.name, args.description)?;
    let client = global.client()?;
    let response = submission::create_submission_draft(&client, &draft)?;
    print_json(&response)
}

fn run_submit(global: &GlobalArgs, args: SubmitArgs) -> Result<(), DataCollectiveError> {
    api::require_non_empty(&args.submission_id, "submission_id")?;
    let fields = submission::SubmissionFields::from_json_file(&args.fields)?;
    let client = global.client()?;
    let response = submission::submit_submission(&client, &args.submission_id, &fields)?;
    print_json(&response)
}

fn run_publish(global: &GlobalArgs, args: PublishArgs) -> Result<(), DataCollectiveError> {
    let draft = submission::SubmissionDraft::new(args.name, args.description)?;
    let fields = submission::SubmissionFields::from_json_file(&args.fields)?;
    let client = global.client()?;
    let response = submission::create_submission_with_upload(
        &client,
        &args.target.file,
        &draft,
        &fields,
        &args.target.mime_type,
        &args.target.options(),
    )?;
    print_json(&response)
}
