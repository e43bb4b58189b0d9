use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use imgtools::{DedupError, Settings};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{Output, Status};

#[derive(Parser, Debug)]
#[command(name = "imgtools", version, about = "Collection of tools that work on images")]
struct Cli {
    /// JSON settings file (default: `<config dir>/imgtools/config.json`)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Hide progress bars
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute the difference hash (dHash) of images
    Hash(HashArgs),

    /// Compare two images using SSIM
    Diff(DiffArgs),

    /// Delete duplicate images in a directory
    Rmdup(RmdupArgs),
}

#[derive(Args, Debug)]
pub struct HashArgs {
    /// Path to the input image(s)
    #[arg(value_name = "IMAGE", required = true)]
    pub images: Vec<PathBuf>,

    /// Number of bits in the hash, a perfect square [default: 64]
    #[arg(short, long)]
    pub bits: Option<u32>,
}

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// First image
    #[arg(value_name = "IMAGE")]
    pub first: PathBuf,

    /// Second image
    #[arg(value_name = "IMAGE")]
    pub second: PathBuf,

    /// Exit with status 1 when the score falls below this value
    #[arg(short, long)]
    pub threshold: Option<f64>,
}

#[derive(Args, Debug)]
pub struct RmdupArgs {
    /// Directory in which to remove duplicate images
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Largest Hamming distance between duplicates [default: 10]
    #[arg(short, long)]
    pub threshold: Option<u32>,

    /// Only report what would be deleted (the default)
    #[arg(long, conflicts_with = "apply")]
    pub dry_run: bool,

    /// Delete duplicates
    #[arg(long)]
    pub apply: bool,

    /// Recurse into subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Number of worker threads [default: all cores]
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Trust the hash alone; skip SSIM confirmation
    #[arg(long)]
    pub no_verify: bool,

    /// SSIM score needed to confirm a duplicate [default: 0.9]
    #[arg(long, value_name = "SCORE")]
    pub ssim_threshold: Option<f64>,

    /// After a dry run, ask whether to delete the duplicates
    #[arg(short, long, conflicts_with = "apply")]
    pub interactive: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(Status::Success) => ExitCode::SUCCESS,
        Ok(Status::Failure) => ExitCode::from(1),
        Err(err) => {
            eprintln!("❌ {:#}", err);
            if is_config_error(&err) {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn run(cli: Cli) -> Result<Status> {
    let settings = Settings::load(cli.config.as_deref())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut output = Output {
        out: &mut out,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Hash(args) => commands::hash(&args, settings, &mut output),
        Commands::Diff(args) => commands::diff(&args, settings, &mut output),
        Commands::Rmdup(args) => commands::rmdup(&args, settings, &mut output),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn is_config_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|e| matches!(e.downcast_ref::<DedupError>(), Some(DedupError::Config(_))))
}
