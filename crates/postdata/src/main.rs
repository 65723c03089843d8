use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use postdata_core::batch::{BatchDriver, BatchReport};
use postdata_core::config::{AppConfig, DatabaseSettings, Directories};
use postdata_core::db;
use postdata_core::gateway::{Lookup, LookupGateway};
use postdata_core::notify::SmtpNotifier;
use postdata_core::source::PgRouteSource;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_PARTIAL: u8 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about = "Postal shipment enrichment batch job", long_about = None)]
struct Cli {
    /// Load environment variables from this file instead of `./.env`
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every file in the input directory
    Run(RunArgs),
    /// Resolve a single tracking number and print the routing attributes
    Lookup(LookupArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Do not send a report e-mail, even if SMTP is configured
    #[arg(long)]
    no_notify: bool,
    /// Overrides INPUT_DIR
    #[arg(long)]
    input_dir: Option<PathBuf>,
    /// Overrides OUTPUT_DIR
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Overrides PROCESSED_DIR
    #[arg(long)]
    processed_dir: Option<PathBuf>,
    /// Overrides LOG_DIR
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl RunArgs {
    fn overrides(&self) -> Vec<(&'static str, String)> {
        [
            ("INPUT_DIR", &self.input_dir),
            ("OUTPUT_DIR", &self.output_dir),
            ("PROCESSED_DIR", &self.processed_dir),
            ("LOG_DIR", &self.log_dir),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|path| (key, path.display().to_string())))
        .collect()
    }
}

#[derive(Args, Debug)]
struct LookupArgs {
    tracking_number: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %format!("{err:#}"), "postdata failed");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    load_env(cli.env_file.as_ref())?;
    match cli.command {
        Command::Run(args) => handle_run(args).await,
        Command::Lookup(args) => handle_lookup(args).await,
    }
}

fn load_env(path: Option<&PathBuf>) -> Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("failed to load env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

async fn handle_run(args: RunArgs) -> Result<ExitCode> {
    let overrides = args.overrides();
    let config = AppConfig::from_lookup(|key| {
        overrides
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.clone())
            .or_else(|| env::var(key).ok())
    })
    .context("invalid configuration")?;

    let lookup = build_gateway(&config.database)?;
    let mut driver = BatchDriver::new(config.directories.clone(), Arc::new(lookup));

    match (&config.smtp, args.no_notify) {
        (Some(smtp), false) => {
            let notifier = SmtpNotifier::new(smtp).context("invalid SMTP configuration")?;
            driver = driver.with_notifier(Arc::new(notifier));
        }
        (Some(_), true) => info!("notifications disabled by --no-notify"),
        (None, _) => warn!("SMTP_SERVER not set, notifications disabled"),
    }

    let report = driver.run().await.context("batch aborted")?;
    println!("{}", summary_table(driver.directories(), &report));

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PARTIAL))
    }
}

async fn handle_lookup(args: LookupArgs) -> Result<ExitCode> {
    let settings = DatabaseSettings::from_lookup(|key| env::var(key).ok())
        .context("invalid database configuration")?;
    let gateway = build_gateway(&settings)?;

    match gateway.lookup(args.tracking_number.trim()).await {
        Some(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            warn!(tracking_number = %args.tracking_number, "not found");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn build_gateway(settings: &DatabaseSettings) -> Result<LookupGateway<PgRouteSource>> {
    let pool = db::connect(settings).context("invalid database connection settings")?;
    Ok(LookupGateway::new(PgRouteSource::new(pool)).with_attempts(settings.lookup_attempts))
}

fn summary_table(directories: &Directories, report: &BatchReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Input", "Rows out", "Skipped", "Output file", "Skip log", "Notified",
    ]);

    let name = |path: &Option<PathBuf>| {
        path.as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "-".to_string())
    };

    for file in &report.files {
        let notified = match file.notified {
            Some(true) => "yes",
            Some(false) => "FAILED",
            None => "-",
        };
        table.add_row(vec![
            file.input_name.clone(),
            file.transformed.to_string(),
            file.skipped.to_string(),
            name(&file.output_path),
            name(&file.log_path),
            notified.to_string(),
        ]);
    }

    for failure in &report.failures {
        table.add_row(vec![
            failure.input.display().to_string(),
            "-".to_string(),
            "-".to_string(),
            format!("aborted ({})", failure.kind),
            failure.message.clone(),
            "-".to_string(),
        ]);
    }

    if report.files.is_empty() && report.failures.is_empty() {
        table.add_row(vec![format!(
            "no input files in {}",
            directories.input.display()
        )]);
    }

    table
}
