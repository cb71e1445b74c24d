use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use wineguard::config::{LoggingConfig, WineguardConfig};
use wineguard::simulate::Scenario;

#[derive(Parser)]
#[command(
    name = "wineguard",
    about = "Sustained-incident detection for cold-chain shipment telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $WINEGUARD_CONFIG, then /etc/wineguard/wineguard.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (ingest API + detector + storage)
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// SQLite database path
        #[arg(long)]
        db: Option<String>,
    },

    /// Run JSON-lines readings through a fresh detector and print events
    Replay {
        /// Input file, or '-' for stdin
        #[arg(default_value = "-")]
        input: String,
    },

    /// Print a deterministic synthetic reading stream as JSON lines
    Simulate {
        /// Number of assets in the fleet
        #[arg(long, default_value = "3")]
        assets: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Seconds between steps
        #[arg(long, default_value = "2")]
        interval: i64,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Stderr logger used while the config file is read, before its
/// `[logging]` section can apply.
fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish()
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    // Logs go to stderr so replay/simulate output stays clean on stdout.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = tracing::subscriber::with_default(bootstrap_subscriber(), || {
        WineguardConfig::resolve(cli.config.as_deref())
    })?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind, db } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(db) = db {
                config.server.db_path = db;
            }
            tracing::info!(bind = %config.server.bind, "Starting WineGuard daemon");
            wineguard::serve(&config).await?;
        }
        Commands::Replay { input } => {
            let detector = config.detector.build().context("invalid detector configuration")?;
            let reader: Box<dyn BufRead> = if input == "-" {
                Box::new(BufReader::new(io::stdin()))
            } else {
                let file = std::fs::File::open(&input)
                    .with_context(|| format!("failed to open {}", input))?;
                Box::new(BufReader::new(file))
            };
            let summary = wineguard::ingest::replay::run(&detector, reader, io::stdout().lock())?;
            tracing::info!(
                readings = summary.readings,
                opened = summary.opened,
                closed = summary.closed,
                faults = summary.faults,
                "Replay finished"
            );
        }
        Commands::Simulate { assets, seed, interval } => {
            anyhow::ensure!(assets > 0, "--assets must be at least 1");
            let scenario = Scenario {
                assets,
                seed,
                interval: chrono::Duration::seconds(interval),
                ..Default::default()
            };
            let mut out = io::stdout().lock();
            for reading in scenario.generate() {
                serde_json::to_writer(&mut out, &reading)?;
                io::Write::write_all(&mut out, b"\n")?;
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
