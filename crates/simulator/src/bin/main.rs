//! LatticeBFT simulator CLI.
//!
//! Runs seeded, reproducible consensus trials over a configurable switched
//! fabric.
//!
//! # Example
//!
//! ```bash
//! # Trace to the console
//! latticebft-sim run.json
//!
//! # One trace file per trial
//! latticebft-sim run.json --output traces/
//! ```

use clap::Parser;
use latticebft_simulator::RunConfig;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// LatticeBFT simulator.
///
/// Single-threaded and deterministic: the same configuration and seed
/// produce an identical event trace.
#[derive(Parser, Debug)]
#[command(name = "latticebft-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the JSON run configuration.
    config: PathBuf,

    /// Directory receiving one trace file per trial (console when omitted).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Suppress the event trace (the snapshot is suppressed too).
    #[arg(long)]
    quiet: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,latticebft_simulator=info")),
        )
        .init();

    let args = Args::parse();

    let config = match RunConfig::from_path(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = latticebft_simulator::run(&config, args.output.as_deref(), args.quiet) {
        error!("{e}");
        std::process::exit(1);
    }
}
