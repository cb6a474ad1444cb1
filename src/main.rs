use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use fdc_ingest::config::{DatabaseConfig, FdcConfig, StoreBackend};
use fdc_ingest::database_ops::fdc::{FdcClient, RunOptions};
use fdc_ingest::database_ops::store::open_store;
use fdc_ingest::job::{run_job, JobOutcome, JobPolicy};
use fdc_ingest::tracing::{init_tracing, DEFAULT_FILTER};
use fdc_ingest::util::env as env_util;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "fdc-ingest",
    version,
    about = "Import the USDA FoodData Central catalog into a relational store"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    // Allow `fdc-ingest --max-pages 3` without the explicit `run` subcommand.
    // If a subcommand is present, these args are ignored.
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sweep the catalog into the store (default when no command supplied)
    Run(RunArgs),
    /// Create or upgrade the schema of the selected store
    Migrate(StoreArgs),
    /// Validate configuration and log a redacted snapshot
    CheckConfig,
}

#[derive(Debug, Default, Args)]
struct StoreArgs {
    /// Storage backend (overrides FDC_STORE)
    #[arg(long, value_enum)]
    store: Option<StoreBackend>,
    /// SQLite file for the sqlite backend (overrides SQLITE_PATH)
    #[arg(long)]
    sqlite_path: Option<PathBuf>,
}

impl StoreArgs {
    fn apply(&self, db: &mut DatabaseConfig) {
        if let Some(store) = self.store {
            db.backend = store;
        }
        if let Some(path) = &self.sqlite_path {
            db.sqlite_path = path.clone();
        }
    }
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// First page to request (1-based)
    #[arg(long)]
    start_page: Option<u32>,
    /// Stop after this many pages with records (0 = no limit)
    #[arg(long)]
    max_pages: Option<u32>,
    /// Whole-run retries after a FAILED run
    #[arg(long)]
    retries: Option<u32>,
    /// Delay between whole-run retries, in seconds
    #[arg(long)]
    retry_delay_secs: Option<u64>,
    /// Do not sleep between pages
    #[arg(long = "no-pace", action = ArgAction::SetTrue)]
    no_pace: bool,
    /// Apply pending schema migrations before the run
    #[arg(long = "migrate", action = ArgAction::SetTrue)]
    migrate: bool,
    /// Repeat the job every N seconds instead of running once
    #[arg(long)]
    every_secs: Option<u64>,
    /// Print the final run report as one JSON line on stdout
    #[arg(long = "summary-json", action = ArgAction::SetTrue)]
    summary_json: bool,
}

#[derive(Clone, Copy, Debug)]
enum LoopMode {
    Once,
    Every { sleep_secs: u64 },
}

impl LoopMode {
    fn from_args(args: &RunArgs) -> Self {
        match args.every_secs {
            Some(sleep_secs) => LoopMode::Every { sleep_secs },
            None => LoopMode::Once,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run(cli.run)) {
        Command::Run(args) => run_command(args).await,
        Command::Migrate(args) => migrate_command(args).await,
        Command::CheckConfig => check_config(),
    }
}

async fn run_command(args: RunArgs) -> Result<()> {
    let mut cfg = FdcConfig::from_env().context("loading configuration")?;
    args.store.apply(&mut cfg.database);
    if let Some(start_page) = args.start_page {
        anyhow::ensure!(start_page >= 1, "--start-page is 1-based");
        cfg.job.start_page = start_page;
    }
    if let Some(max_pages) = args.max_pages {
        cfg.job.max_pages = max_pages;
    }
    if let Some(retries) = args.retries {
        cfg.job.retries = retries;
    }
    if let Some(secs) = args.retry_delay_secs {
        cfg.job.retry_delay = Duration::from_secs(secs);
    }
    cfg.log_snapshot();

    let client = FdcClient::new(&cfg.api).context("building FoodData Central client")?;
    let store = open_store(&cfg.database)
        .await
        .context("opening store")?;
    if args.migrate {
        store.migrate().await.context("applying migrations")?;
    }

    let opts = RunOptions {
        start_page: cfg.job.start_page,
        max_pages: cfg.job.max_pages,
        pace: if args.no_pace {
            Duration::ZERO
        } else {
            cfg.api.pace_interval()
        },
    };
    let policy = JobPolicy::from(&cfg.job);

    match LoopMode::from_args(&args) {
        LoopMode::Once => {
            let outcome = run_job(&client, store.as_ref(), &opts, policy).await;
            finish(outcome, args.summary_json)
        }
        LoopMode::Every { sleep_secs } => loop {
            let outcome = run_job(&client, store.as_ref(), &opts, policy).await;
            if let Err(err) = finish(outcome, args.summary_json) {
                error!(error = %err, "scheduled job failed; waiting for next slot");
            }
            info!(sleep_secs, "sleeping before next job");
            tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
        },
    }
}

fn finish(outcome: JobOutcome, summary_json: bool) -> Result<()> {
    if let Some(report) = &outcome.report {
        if summary_json {
            println!("{}", serde_json::to_string(report)?);
        }
        info!(
            state = %outcome.state,
            attempts = outcome.attempts,
            pages = report.pages,
            records = report.records_seen,
            skipped = report.records_skipped,
            no_nutrients = report.no_nutrient_records,
            foods_written = report.counts.foods_written,
            foods_skipped = report.counts.foods_skipped,
            nutrients_written = report.counts.nutrients_written,
            links_written = report.counts.links_written,
            "job summary"
        );
    }
    if outcome.is_success() {
        return Ok(());
    }
    let attempts = outcome.attempts;
    match outcome.error {
        Some(err) => Err(anyhow::Error::new(err)
            .context(format!("fdc job FAILED after {attempts} attempt(s)"))),
        None => Err(anyhow::anyhow!("fdc job FAILED after {attempts} attempt(s)")),
    }
}

async fn migrate_command(args: StoreArgs) -> Result<()> {
    let mut db = DatabaseConfig::from_env().context("loading database configuration")?;
    args.apply(&mut db);
    let store = open_store(&db).await.context("opening store")?;
    store.migrate().await.context("applying migrations")?;
    info!(store = store.backend().label(), "schema up to date");
    Ok(())
}

fn check_config() -> Result<()> {
    let cfg = FdcConfig::from_env().context("loading configuration")?;
    cfg.log_snapshot();
    if cfg.database.backend == StoreBackend::Postgres {
        cfg.database.postgres_url()?;
    }
    info!("configuration OK");
    Ok(())
}
