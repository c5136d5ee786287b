//! zampy: download, ingest and convert the datasets named in a recipe.
//!
//! ```text
//! zampy recipe.yml [--config PATH] [--skip-download] [--overwrite]
//! ```
//!
//! Exit status is 0 when every dataset succeeded, 1 when any dataset failed
//! and 2 when the recipe or configuration was rejected before any work.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use datasets::ArchiveClients;
use recipe::{Orchestrator, Recipe, RunOptions};
use zampy_common::{ErrorCategory, ZampyError};

#[derive(Parser, Debug)]
#[command(name = "zampy")]
#[command(about = "Download and convert geophysical datasets for land-surface models")]
struct Args {
    /// Recipe YAML file
    recipe: PathBuf,

    /// Configuration file
    #[arg(long, env = "ZAMPY_CONFIG")]
    config: Option<PathBuf>,

    /// Only use raw data already present in the working directory
    #[arg(long)]
    skip_download: bool,

    /// Regenerate ingested data even if it already exists
    #[arg(long)]
    overwrite: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

const EXIT_FAILED: u8 = 1;
const EXIT_REJECTED: u8 = 2;

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .with_context(|| format!("Invalid log level: {}", args.log_level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if args.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Exit status for an error raised before the pipelines started.
fn rejection_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ZampyError>() {
        Some(e) if e.category() == ErrorCategory::Validation => EXIT_REJECTED,
        _ => EXIT_FAILED,
    }
}

async fn run(args: &Args) -> Result<u8> {
    let config = config::load_config(args.config.as_deref())?;
    let recipe = Recipe::load(&args.recipe)?;
    info!(
        recipe = %recipe.name,
        datasets = recipe.datasets.len(),
        variables = recipe.variable_count(),
        "Loaded recipe"
    );

    let clients = ArchiveClients::from_config(&config)?;
    let orchestrator = Orchestrator::new(&config, clients)
        .await?
        .with_options(RunOptions {
            skip_download: args.skip_download,
            force_ingest: args.overwrite,
        });

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next stage boundary");
            token.cancel();
        }
    });

    let report = orchestrator.run(&recipe).await?;
    eprintln!("{}", report);

    if report.is_success() {
        info!(outputs = report.outputs().count(), "Recipe completed");
        Ok(0)
    } else {
        warn!(failed = report.failures().count(), "Recipe completed with failures");
        Ok(EXIT_FAILED)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("zampy: {:#}", e);
        return ExitCode::from(EXIT_REJECTED);
    }

    match run(&args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{:#}", e), "zampy failed");
            eprintln!("zampy: {:#}", e);
            ExitCode::from(rejection_code(&e))
        }
    }
}
