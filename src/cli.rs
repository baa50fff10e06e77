//! Command line interface built on clap.
//!
//! Defines [`Cli`] with the [`Command`] subcommands (run, status, peer-sim)
//! and the global `--config` and `--verbose` flags.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use plate_scheduler::config::DEFAULT_CONFIG_FILE;

/// Crash-safe plate transfer scheduler for lab robot controllers.
#[derive(Debug, Parser)]
#[command(name = "plate-scheduler", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the TOML config file.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the scheduler until interrupted.
    Run {
        /// Print the robot status board at this interval.
        #[arg(long)]
        status_interval_ms: Option<u64>,
    },

    /// Prints the paths saved in the state file and exits.
    Status,

    /// Impersonates every configured controller.
    PeerSim {
        /// Delay before each task acknowledgment.
        #[arg(long, default_value_t = 1000)]
        response_delay_ms: u64,

        /// Delay between connection attempts.
        #[arg(long, default_value_t = 5000)]
        retry_delay_ms: u64,
    },
}
