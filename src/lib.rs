//! ml-datasets: fetch, cache and decode classic machine-learning datasets.
//!
//! Public benchmark datasets are distributed in a handful of ad-hoc formats:
//! pickled batch archives (CIFAR), gzip-compressed IDX tensors (MNIST
//! variants), R serialization and delimited text (the *Elements of
//! Statistical Learning* datasets). This crate downloads each distribution
//! once into a local cache and decodes it into `ndarray` arrays.
//!
//! # Modules
//!
//! - [`fetch`]: Cache paths, HTTP transport and download-once materialization
//! - [`archive`]: Lazy member extraction from tar, tar.gz and zip archives
//! - [`formats`]: Pickle, IDX, R data and text table decoders
//! - [`datasets`]: Per-family decoders and the [`DatasetKind`] registry
//! - [`output`]: Canonical dataset shapes and array transforms
//! - [`value`]: Dynamic object tree produced by the pickle decoder
//! - [`error`]: Error types for fetch and decode operations

pub mod archive;
pub mod datasets;
pub mod error;
pub mod fetch;
pub mod formats;
pub mod output;
pub mod value;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

pub use datasets::{DatasetKind, Decoder, EmnistSplit, FamilyOptions, LabelGranularity};
pub use error::DatasetError;
pub use fetch::LoadOptions;
pub use output::ParsedDataset;

use fetch::{BarProgress, NoProgress, Progress, UreqTransport, DEFAULT_CHUNK_SIZE};
use output::LoadReport;

/// The ml-datasets CLI application.
#[derive(Parser)]
#[command(name = "ml-datasets")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Cache directory (defaults to a per-family folder in the temp dir).
    #[arg(long, global = true, env = "ML_DATASETS_DIR")]
    target_dir: Option<PathBuf>,

    /// Re-download files even when they are already cached.
    #[arg(long, global = true)]
    force: bool,

    /// Transfer chunk size in bytes.
    #[arg(long, global = true, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Suppress progress bars and informational messages.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// List the datasets this tool knows about.
    List,
    /// Download a dataset's raw files into the cache and print their paths.
    Fetch(DatasetArgs),
    /// Download (if needed) and decode a dataset, then print a summary.
    Load(LoadArgs),
    /// Check that a dataset's distribution site is reachable.
    Check(DatasetArgs),
}

/// Dataset selection and family options.
#[derive(clap::Args)]
struct DatasetArgs {
    /// Dataset name (see `ml-datasets list`).
    dataset: String,

    /// Apply orientation correction to images.
    #[arg(long, overrides_with = "no_rotate")]
    rotate: bool,

    /// Leave images in their stored orientation.
    #[arg(long)]
    no_rotate: bool,

    /// EMNIST split.
    #[arg(long, value_enum, default_value_t = EmnistSplit::Mnist)]
    split: EmnistSplit,

    /// CIFAR-100 label granularity.
    #[arg(long, value_enum, default_value_t = LabelGranularity::Fine)]
    labels: LabelGranularity,

    /// Include the mixture component means.
    #[arg(long)]
    with_means: bool,
}

impl DatasetArgs {
    fn kind(&self) -> Result<DatasetKind, DatasetError> {
        self.dataset.parse()
    }

    fn family(&self) -> FamilyOptions {
        let rotate = if self.rotate {
            Some(true)
        } else if self.no_rotate {
            Some(false)
        } else {
            None
        };
        FamilyOptions {
            labels: self.labels,
            split: self.split,
            rotate,
            with_means: self.with_means,
        }
    }
}

/// Arguments for the load subcommand.
#[derive(clap::Args)]
struct LoadArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    /// Output format for the summary ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

/// Run the ml-datasets CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), DatasetError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let opts = LoadOptions {
        target_dir: cli.target_dir.clone(),
        force: cli.force,
        chunk_size: cli.chunk_size,
        verbose: !cli.quiet,
    };
    let progress: Box<dyn Progress> = if cli.quiet {
        Box::new(NoProgress)
    } else {
        Box::new(BarProgress::new())
    };

    match cli.command {
        Some(Commands::List) => {
            run_list();
            Ok(())
        }
        Some(Commands::Fetch(args)) => run_fetch(&args, &opts, progress.as_ref()),
        Some(Commands::Load(args)) => run_load(&args, &opts, progress.as_ref()),
        Some(Commands::Check(args)) => run_check(&args, &opts),
        None => {
            println!("ml-datasets {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Fetch, cache and decode classic machine-learning datasets.");
            println!();
            println!("Run 'ml-datasets --help' for usage information.");
            Ok(())
        }
    }
}

/// RUST_LOG wins; otherwise the level follows -v / --quiet.
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };

    // A subscriber may already be installed when embedded; keep it.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_list() {
    let width = DatasetKind::ALL
        .iter()
        .map(|kind| kind.name().len())
        .max()
        .unwrap_or(0);
    for kind in DatasetKind::ALL {
        println!("{:<width$}  {}", kind.name(), kind.description(), width = width);
    }
}

fn run_fetch(
    args: &DatasetArgs,
    opts: &LoadOptions,
    progress: &dyn Progress,
) -> Result<(), DatasetError> {
    let decoder = args.kind()?.decoder(opts, &args.family());
    let paths = decoder.fetch(&UreqTransport::new(), progress)?;
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}

fn run_load(
    args: &LoadArgs,
    opts: &LoadOptions,
    progress: &dyn Progress,
) -> Result<(), DatasetError> {
    let kind = args.dataset.kind()?;
    let parsed = kind.load_with(
        opts,
        &args.dataset.family(),
        &UreqTransport::new(),
        progress,
    )?;
    let report = LoadReport::new(kind.name(), &parsed);

    match args.output.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print!("{}", report),
    }
    Ok(())
}

fn run_check(args: &DatasetArgs, opts: &LoadOptions) -> Result<(), DatasetError> {
    let decoder = args.kind()?.decoder(opts, &args.family());
    let url = &decoder.source().base_url;
    fetch::check_url(url, &UreqTransport::new())?;
    println!("{} is reachable", url);
    Ok(())
}
