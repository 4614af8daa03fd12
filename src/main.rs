use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use api_metrics::{
    compute_now, count_transactions, open_database, render_api_transactions, seed, Config,
    SqliteRepository,
};

/// Seed and inspect the transaction store behind the metrics endpoint
#[derive(Parser)]
#[command(name = "api-metrics", version, about)]
struct Cli {
    /// Database file (overrides API_METRICS_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the schema
    Init,
    /// Insert synthetic transactions
    Seed {
        #[arg(long, default_value_t = seed::DEFAULT_COUNT)]
        count: usize,
    },
    /// Print one metrics snapshot to stdout
    Render {
        /// Trailing window in seconds (overrides API_METRICS_WINDOW_SECS)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        window_secs: Option<u32>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(path) = cli.database {
        config.database_path = path;
    }

    let conn = open_database(&config.database_path)?;

    match cli.command {
        Command::Init => {
            tracing::info!(path = %config.database_path.display(), "schema ready");
        }
        Command::Seed { count } => {
            seed::populate(&conn, count, &mut rand::rng())?;
            let total = count_transactions(&conn)?;
            tracing::info!(total, "database now holds {} transactions", total);
        }
        Command::Render { window_secs } => {
            if let Some(secs) = window_secs {
                config.window = chrono::Duration::seconds(i64::from(secs));
            }
            let repo = SqliteRepository::new(conn);
            let aggregates = compute_now(&repo, config.window).context("Failed to aggregate transactions")?;
            print!("{}", render_api_transactions(&aggregates)?);
        }
    }

    Ok(())
}
