//! natprobe CLI
//!
//! Classifies the local host's NAT mapping behavior by probing one or two
//! public STUN servers.

mod config;

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use natprobe_stun::{NatDetector, TestId, run_test};

/// natprobe - NAT topology classification over STUN
#[derive(Parser)]
#[command(name = "natprobe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full four-test classification procedure
    Detect,

    /// Run a single test and print its JSON report
    Test {
        /// Test identifier: test1, test2, test3, test4, or test_tcp1
        id: TestId,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_or_default()?,
    };
    config.validate()?;

    init_logging(&config, cli.verbose)?;

    match cli.command {
        Commands::Detect => detect(&config).await,
        Commands::Test { id } => single_test(id, &config).await,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging(config: &Config, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &config.logging.file {
        Some(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

async fn detect(config: &Config) -> anyhow::Result<()> {
    let primary = config.primary_endpoint();
    let secondary = config.secondary_endpoint();
    info!(
        primary = %primary.authority(),
        secondary = %secondary.authority(),
        "starting nat classification"
    );

    let classification = NatDetector::new(primary, secondary).detect().await;
    println!("NAT classification: {classification}");
    Ok(())
}

async fn single_test(id: TestId, config: &Config) -> anyhow::Result<()> {
    let report = run_test(
        id,
        &config.primary_endpoint(),
        &config.secondary_endpoint(),
    )
    .await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
