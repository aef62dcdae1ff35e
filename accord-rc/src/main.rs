//! accord-rc binary - consistency check trigger
//!
//! Thin trigger-boundary caller around the orchestrator: run a check,
//! resolve what it found, or inspect history and rolling status. Output is
//! the same JSON the admin surfaces consume.

use std::path::PathBuf;
use std::str::FromStr;

use accord_common::config;
use accord_common::types::CheckType;
use accord_rc::build_orchestrator;
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "accord-rc", version, about = "OLTP/OLAP consistency reconciler")]
struct Cli {
    /// Config file path (falls back to ACCORD_CONFIG, then defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a consistency check and print the report
    Check {
        /// Tables to check (default: configured platform tables)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        /// Check types to run (default: row_count,data_hash,business_rules)
        #[arg(long = "check-types", value_delimiter = ',')]
        check_types: Vec<String>,
        /// Restrict record-level checks to one primary key
        #[arg(long)]
        key: Option<String>,
        /// Attempt to resolve detected conflicts after the check
        #[arg(long)]
        resolve: bool,
    },
    /// Print rolling service status
    Status,
    /// Print recent report summaries
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!(
        "Starting Accord Reconciler (accord-rc) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let cli = Cli::parse();
    let config = config::load_or_default(cli.config.as_deref())?;
    let orchestrator = build_orchestrator(&config).await?;

    match cli.command {
        Command::Check {
            tables,
            check_types,
            key,
            resolve,
        } => {
            let check_types = check_types
                .iter()
                .map(|s| CheckType::from_str(s))
                .collect::<accord_common::Result<Vec<_>>>()?;

            let mut report = orchestrator
                .run_check(&tables, &check_types, key.as_deref())
                .await;

            if resolve {
                let outcomes = orchestrator.resolve_conflicts(&mut report.results).await;
                println!("{}", serde_json::to_string_pretty(&report)?);
                println!("{}", serde_json::to_string_pretty(&outcomes)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&orchestrator.get_status())?);
        }
        Command::History { limit } => {
            println!(
                "{}",
                serde_json::to_string_pretty(&orchestrator.get_history(limit))?
            );
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
