use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cmconnect_core::config::AppConfig;
use cmconnect_core::locator::locate_latest;
use cmconnect_core::logging;
use cmconnect_core::pipeline::{run_normalization, Pipeline, PipelineConfig};
use cmconnect_core::progress::ProgressEvent;
use cmconnect_core::store::{MemoryTableStore, PgConnector, StoreConnector};
use tracing::info;

mod summary;

#[derive(Parser, Debug)]
#[command(author, version, about = "Grievance spreadsheet normalization and load", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize the newest spreadsheet and replace the staging tables
    Normalize(NormalizeArgs),
    /// Print the spreadsheet the next run would pick up
    Locate(LocateArgs),
    /// Print the effective configuration with secrets masked
    CheckConfig(ConfigArgs),
}

#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// Path to a TOML config file (defaults to ./cmconnect.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct NormalizeArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Load into an in-memory store instead of the database
    #[arg(long)]
    dry_run: bool,

    /// Print the run receipt as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug, Default)]
struct LocateArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Override the spreadsheet extension to search for
    #[arg(long)]
    extension: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Normalize(args) => normalize(args).await,
        Command::Locate(args) => {
            let config = load_config(&args.config)?;
            let extension = args
                .extension
                .unwrap_or_else(|| config.paths.spreadsheet_extension.clone());
            let path = locate_latest(&config.paths.input_dir, &extension)?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckConfig(args) => {
            let config = load_config(&args)?;
            let mut shown = config.clone();
            shown.database.password = shown.database.password.as_ref().map(|_| "****".into());
            shown.database.url = config.database.redacted_url().ok();
            let rendered =
                toml::to_string_pretty(&shown).context("failed to render effective configuration")?;
            println!("{rendered}");
            Pipeline::new(PipelineConfig::from(&config)).context("cleanup rules are invalid")?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn normalize(args: NormalizeArgs) -> Result<ExitCode> {
    let config = load_config(&args.config)?;
    let _guard = logging::init(&config.paths.log_dir).context("failed to initialise logging")?;

    let pipeline = Pipeline::new(PipelineConfig::from(&config))?;
    let memory = MemoryTableStore::new();
    let postgres;
    let connector: &dyn StoreConnector = if args.dry_run {
        info!("dry run: loading into an in-memory store");
        &memory
    } else {
        let database_url = config.database.connection_url()?;
        postgres = PgConnector::new(
            database_url,
            config.database.max_connections,
            config.database.load_mode,
        );
        &postgres
    };

    let progress = |event: &ProgressEvent| {
        info!(
            progress = event.fraction(),
            event = ?event,
            "pipeline progress"
        );
    };
    let outcome = run_normalization(&pipeline, connector, Some(&progress)).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if let Some(receipt) = &outcome.receipt {
        println!("{}", summary::render(receipt));
    }

    if outcome.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        if let Some(message) = &outcome.message {
            eprintln!("{message}");
        }
        Ok(ExitCode::FAILURE)
    }
}

fn load_config(args: &ConfigArgs) -> Result<AppConfig> {
    AppConfig::load(args.config.as_deref()).context("failed to load configuration")
}
