use std::num::NonZeroUsize;
use std::process::ExitCode;
use std::thread;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cosmic_update::app::{App, RunOptions};
use cosmic_update::config::ConfigLoader;
use cosmic_update::domain::{KeyingPolicy, MaxFileAge, MismatchAggregation};
use cosmic_update::download::CosmicHttpClient;
use cosmic_update::engine::EngineOptions;
use cosmic_update::error::CosmicError;
use cosmic_update::output::JsonOutput;
use cosmic_update::store::SnapshotKnowledgeBase;

#[derive(Parser)]
#[command(name = "cosmic-update")]
#[command(about = "Reconcile legacy COSMIC identifiers in the knowledge base against COSMIC exports")]
#[command(version, author)]
struct Cli {
    /// Properties file with the run settings.
    #[arg(long)]
    config: Option<String>,

    /// Write identifier changes back to the knowledge base.
    #[arg(long)]
    apply_updates: bool,

    /// Re-download reference files older than this ISO-8601 duration.
    #[arg(long, default_value = "P1D")]
    max_file_age: MaxFileAge,

    #[arg(long)]
    skip_download: bool,

    #[arg(long)]
    reports_dir: Option<Utf8PathBuf>,

    #[arg(long, value_enum, default_value_t)]
    aggregation: MismatchAggregation,

    #[arg(long, value_enum, default_value_t)]
    keying: KeyingPolicy,

    /// Classification workers; defaults to the available parallelism.
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(cosmic) = report.downcast_ref::<CosmicError>() {
            return ExitCode::from(map_exit_code(cosmic));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CosmicError) -> u8 {
    match error {
        CosmicError::MissingConfig(_)
        | CosmicError::ConfigRead(_)
        | CosmicError::ConfigValue { .. }
        | CosmicError::InvalidDuration(_) => 2,
        CosmicError::DownloadHttp(_)
        | CosmicError::DownloadStatus { .. }
        | CosmicError::Decompress(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    let threads = cli.threads.unwrap_or_else(|| {
        thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    });
    let options = RunOptions {
        apply_updates: cli.apply_updates,
        max_file_age: cli.max_file_age,
        skip_download: cli.skip_download,
        reports_dir: cli.reports_dir,
        engine: EngineOptions {
            aggregation: cli.aggregation,
            keying: cli.keying,
            threads,
        },
    };

    let kb = SnapshotKnowledgeBase::open(&config.kb_snapshot)?;
    let client = CosmicHttpClient::new(config.credentials.clone())?;
    info!(snapshot = %config.kb_snapshot, threads, "starting reconciliation");

    let app = App::new(kb, client);
    let summary = app.run(&config, &options)?;
    JsonOutput::print_summary(&summary).into_diagnostic()?;
    Ok(())
}
