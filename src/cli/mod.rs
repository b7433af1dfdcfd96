//! CLI command implementations

pub mod checkpoint;
pub mod collect;
pub mod error;
pub mod status;
pub mod verify;

pub use checkpoint::CheckpointCommand;
pub use collect::{CollectArgs, ProgressBarSink};
pub use error::CliError;
pub use status::StatusArgs;
pub use verify::VerifyArgs;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Repository miner CLI
#[derive(Parser, Debug)]
#[command(name = "repo-miner")]
#[command(about = "Collect repository activity from quota-limited APIs", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Directory for checkpoints and job status files
    #[arg(long, global = true, default_value = ".miner")]
    pub state_dir: PathBuf,

    /// Directory collected records are written to
    #[arg(long, global = true, default_value = "data")]
    pub data_dir: PathBuf,

    /// Resume mode: on, reset, or verify
    #[arg(long, global = true, default_value = "on")]
    pub resume: ResumeMode,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9100)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one collection job to completion
    Collect(CollectArgs),

    /// Verify every configured credential of a provider
    Verify(VerifyArgs),

    /// Show the last published status of a job
    Status(StatusArgs),

    /// Inspect or delete a job's checkpoint
    Checkpoint(CheckpointCommand),
}

/// Resume modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Resume from the job's checkpoint if one exists
    On,
    /// Delete the job's checkpoint and start from the requested start
    Reset,
    /// Validate every checkpoint file before starting
    Verify,
}

impl FromStr for ResumeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on" => Ok(ResumeMode::On),
            "reset" => Ok(ResumeMode::Reset),
            "verify" => Ok(ResumeMode::Verify),
            _ => Err(format!(
                "Invalid resume mode: {s}. Valid options: on, reset, verify"
            )),
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
