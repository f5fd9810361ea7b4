//! Duet node entry point.

use anyhow::Context;
use clap::{Parser, Subcommand};
use duet_node::observability::{init_logging, LogFormat};
use duet_node::{run_simulation, NodeConfig, SimulationConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Duet - collaborative coding sessions
#[derive(Parser, Debug)]
#[command(name = "duet-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "duet.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the file
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the configuration and print the effective values as YAML
    CheckConfig,
    /// Run in-process participants over the loopback adapter
    Simulate {
        /// Number of participants
        #[arg(long, default_value_t = 3)]
        participants: usize,

        /// Random edits per participant
        #[arg(long, default_value_t = 20)]
        edits: usize,

        /// Seed of the edit generator
        #[arg(long, default_value_t = 7)]
        seed: u64,

        /// Seconds to wait for replicas to converge
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if args.json_logs {
        config.log_format = LogFormat::Json.as_str().to_string();
    }
    config.validate()?;

    match args.command {
        Command::CheckConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Command::Simulate {
            participants,
            edits,
            seed,
            timeout_secs,
            json,
        } => {
            init_logging(&config.log_level, config.log_format());
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Duet simulation");

            let sim = SimulationConfig {
                participants,
                edits_per_participant: edits,
                seed,
                settle_timeout: Duration::from_secs(timeout_secs),
            };
            let report = run_simulation(&config, &sim).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("session:      {}", report.session_id);
                println!("participants: {}", report.participants);
                println!("version:      {}", report.version);
                println!("converged:    {}", report.converged);
                println!("events:       {}", report.event_count);
                println!("document:\n{}", report.document);
            }

            if !report.converged {
                anyhow::bail!("replicas diverged");
            }
        }
    }
    Ok(())
}
