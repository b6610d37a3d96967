use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use colsync_catalog::{BigQueryAdapter, MetadataSource, TableIdentifier, WarehouseAdapter};
use colsync_core::{PartialConfig, SyncConfig};
use colsync_engine::Reconciler;

/// Exit code for a run stopped by the operator
const EXIT_INTERRUPTED: i32 = 130;

/// colsync - keep BigQuery column descriptions in sync with a governance catalog
#[derive(Parser)]
#[command(name = "colsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: colsync.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile column descriptions and write the job-run log
    Run {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Also write the run summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Directory for the local log file
        #[arg(long, default_value = ".")]
        log_dir: PathBuf,
    },

    /// Check credentials and catalog access without changing anything
    Check {
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

/// Settings that may come from flags or the environment
#[derive(Args, Debug, Default)]
struct SettingsArgs {
    /// GCP project holding the target tables
    #[arg(long, env = "PROJECT_ID")]
    project_id: Option<String>,

    /// Governance metadata table (dataset.table or project.dataset.table)
    #[arg(long, env = "METADATA_TABLE")]
    metadata_table: Option<String>,

    /// Job-run audit table (dataset.table or project.dataset.table)
    #[arg(long, env = "JOB_RUN_TABLE")]
    job_run_table: Option<String>,

    /// Pause after each description change, in milliseconds
    #[arg(long, env = "SLEEP_MSECONDS")]
    sleep_ms: Option<u64>,

    /// Number of tables processed at once
    #[arg(long, env = "MAX_PARALLEL_WORKERS")]
    max_workers: Option<usize>,

    /// Also append progress to column_updates_<run-id>.log
    #[arg(long = "log", env = "COLSYNC_LOCAL_LOG")]
    local_log: bool,

    /// Service account key file (Application Default Credentials otherwise)
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials: Option<PathBuf>,
}

impl SettingsArgs {
    fn into_partial(self) -> PartialConfig {
        PartialConfig {
            project_id: self.project_id,
            metadata_table_ref: self.metadata_table,
            audit_table_ref: self.job_run_table,
            sleep_interval_ms: self.sleep_ms,
            worker_count: self.max_workers,
            enable_local_log: self.local_log.then_some(true),
            credentials_path: self.credentials,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env must be loaded before clap reads env-backed flags
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            settings,
            summary,
            log_dir,
        } => {
            let config = load_config(cli.config.as_deref(), settings, cli.verbose)?;
            run_command(config, summary.as_deref(), log_dir, cli.verbose).await
        }
        Commands::Check { settings } => {
            let config = load_config(cli.config.as_deref(), settings, cli.verbose)?;
            check_command(&config).await
        }
    }
}

/// Initialize tracing on stderr; stdout carries the progress stream
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,colsync_engine=debug,colsync_catalog=debug"
    } else {
        "info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .compact(),
        )
        .init();
}

/// Layer defaults, config file, then flags and environment
fn load_config(path: Option<&Path>, settings: SettingsArgs, verbose: bool) -> Result<SyncConfig> {
    let file = if let Some(config_path) = path {
        PartialConfig::from_file(config_path)?
    } else if Path::new("colsync.toml").exists() {
        PartialConfig::from_file(Path::new("colsync.toml"))?
    } else {
        if verbose {
            eprintln!("{}", "No config file found, using flags and environment".yellow());
        }
        PartialConfig::default()
    };

    let config = file.overlay(settings.into_partial()).build().map_err(|e| {
        anyhow::anyhow!(
            "{}. Set PROJECT_ID / METADATA_TABLE / JOB_RUN_TABLE (flags, environment or .env)",
            e
        )
    })?;
    Ok(config)
}

/// Connect with the configured credentials and verify access
async fn connect(config: &SyncConfig, verbose: bool) -> Result<BigQueryAdapter> {
    if verbose {
        eprintln!("{} {}...", "Connecting to BigQuery project".cyan(), config.project_id);
    }

    let adapter = BigQueryAdapter::connect(&config.project_id, config.credentials_path.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to BigQuery: {}", e))?;

    adapter
        .test_connection()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to warehouse: {}", e))?;

    if verbose {
        eprintln!("{}", "✓ Connection successful".green());
    }

    Ok(adapter)
}

/// Run command - reconcile every catalog row
async fn run_command(
    config: SyncConfig,
    summary_path: Option<&Path>,
    log_dir: PathBuf,
    verbose: bool,
) -> Result<()> {
    let adapter = Arc::new(connect(&config, verbose).await?);

    let (interrupt, cancel) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{}",
                "⏹️  Interrupted by user; finishing tables already in progress".yellow()
            );
            let _ = interrupt.send(true);
        }
    });

    let report = Reconciler::new(config, adapter.clone(), adapter.clone(), adapter)
        .with_log_dir(log_dir)
        .run(cancel)
        .await?;

    if let Some(path) = summary_path {
        report.summary.save_to_file(path)?;
        if verbose {
            eprintln!("{} {}", "Summary saved to:".green(), path.display());
        }
    }

    if report.summary.interrupted {
        std::process::exit(EXIT_INTERRUPTED);
    }

    Ok(())
}

/// Check command - verify access to the warehouse and the catalog
async fn check_command(config: &SyncConfig) -> Result<()> {
    let adapter = connect(config, true).await?;

    let metadata_table = TableIdentifier::parse(&config.metadata_table_ref, &config.project_id)
        .ok_or_else(|| anyhow::anyhow!("Invalid metadata table '{}'", config.metadata_table_ref))?;
    let records = adapter.read_metadata(&metadata_table).await?;

    println!("{}", "Configuration".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!("  Project          : {}", config.project_id);
    println!("  Metadata table   : {}", metadata_table);
    println!("  Job-run table    : {}", config.audit_table_ref);
    println!("  Sleep after DDL  : {} ms", config.sleep_interval_ms);
    println!("  Parallel tables  : {}", config.worker_count);
    println!("  Catalog rows     : {}", records.len());
    println!("{}", "=".repeat(60).bright_blue());
    println!("{}", "✓ Ready to run".green().bold());

    Ok(())
}
