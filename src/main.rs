use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::info;

use tabwatch::{
    classify::compile_pattern,
    config::{FileSettings, Settings, SettingsSource, SharedSettings},
    export, feed, logging,
    observe::NetworkObserver,
    store::MemoryTableStore,
};

#[derive(Debug, Parser)]
#[command(name = "tabwatch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply an NDJSON lifecycle-event feed from stdin and print per-tab
    /// snapshots on EOF.
    Run {
        /// Optional path to config TOML. If omitted, `./tabwatch.toml` is
        /// used when present, else built-in defaults.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override log level (trace, debug, info, warn, error, off).
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Validate the config and report patterns that would be dropped.
    CheckConfig {
        /// Optional path to config TOML. If omitted, `./tabwatch.toml` is
        /// used when present, else built-in defaults.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, log_level } => run(config, log_level.as_deref()).await,
        Command::CheckConfig { config } => check_config(config),
    }
}

async fn run(config_path: Option<PathBuf>, log_level: Option<&str>) -> anyhow::Result<()> {
    let (settings, resolved_path) = Settings::discover(config_path.as_deref())?;
    logging::init(&settings, log_level)?;

    // A file-backed source keeps config edits applying per event; without a
    // file the loaded defaults are fixed for the run.
    let source: Arc<dyn SettingsSource> = match &resolved_path {
        Some(path) => {
            info!(config = %path.display(), "watching config file");
            Arc::new(FileSettings::new(path.clone()))
        }
        None => Arc::new(SharedSettings::new(settings)),
    };

    let table_store = Arc::new(MemoryTableStore::default());
    let observer = NetworkObserver::new(source, table_store.clone());

    let stdin = BufReader::new(tokio::io::stdin());
    let summary = feed::apply_feed(&observer, stdin).await?;
    info!(
        applied = summary.applied,
        decode_errors = summary.decode_errors,
        "event feed finished"
    );

    for tab_id in table_store.tab_ids() {
        let snapshot = export::snapshot(observer.store(), tab_id).await?;
        println!("{}", snapshot.to_json()?);
    }

    Ok(())
}

fn check_config(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (settings, resolved_path) = Settings::discover(config_path.as_deref())?;

    match &resolved_path {
        Some(path) => println!("config: {}", path.display()),
        None => println!("config: built-in defaults"),
    }
    println!(
        "captured request types: {}",
        settings
            .capture
            .captured_request_types
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("max records per tab: {}", settings.capture.max_records_per_tab);

    let mut dropped = 0usize;
    for (kind, sources) in [
        ("include", &settings.capture.include_patterns),
        ("exclude", &settings.capture.exclude_patterns),
    ] {
        for source in sources {
            if let Err(err) = compile_pattern(source) {
                dropped += 1;
                println!("dropped {kind} pattern `{source}`: {err}");
            }
        }
    }
    if dropped == 0 {
        println!("all patterns compile");
    }

    Ok(())
}
