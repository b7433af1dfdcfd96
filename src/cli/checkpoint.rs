//! Checkpoint command implementation

use super::{Cli, CliError, OutputFormat};
use crate::resume::{FileCheckpointStore, ProgressCheckpoint};
use clap::{Parser, Subcommand};
use std::sync::Arc;

/// Checkpoint command
#[derive(Parser, Debug)]
pub struct CheckpointCommand {
    /// Checkpoint subcommand
    #[command(subcommand)]
    pub command: CheckpointSubcommand,
}

/// Checkpoint subcommands
#[derive(Subcommand, Debug)]
pub enum CheckpointSubcommand {
    /// Show the checkpoint of a job
    Show {
        /// Job identifier
        #[arg(long)]
        job_id: String,
    },
    /// Delete the checkpoint of a job so the next run starts over
    Clear {
        /// Job identifier
        #[arg(long)]
        job_id: String,
    },
    /// Validate every checkpoint file in the state directory
    Verify,
}

impl CheckpointCommand {
    /// Execute the checkpoint command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let store = FileCheckpointStore::new(&cli.state_dir);
        let checkpoint = ProgressCheckpoint::new(Arc::new(store.clone()));

        match &self.command {
            CheckpointSubcommand::Show { job_id } => {
                let Some(state) = checkpoint.load(job_id)? else {
                    return Err(CliError::NotFound(format!("no checkpoint for job {job_id}")));
                };
                match cli.output_format {
                    OutputFormat::Json => {
                        let json = serde_json::to_string_pretty(&state)
                            .map_err(|e| CliError::Output(e.to_string()))?;
                        println!("{json}");
                    }
                    OutputFormat::Human => {
                        println!("Job: {job_id}");
                        match state.last_completed_window_end() {
                            Some(end) => println!("  Last completed day: {end}"),
                            None => println!("  Last completed day: none"),
                        }
                        println!("  Windows completed: {}", state.windows_completed());
                        println!("  Records upserted: {}", state.records_upserted());
                        println!("  Updated: {}", state.updated_at());
                    }
                }
            }
            CheckpointSubcommand::Clear { job_id } => {
                if checkpoint.clear(job_id)? {
                    println!("Checkpoint cleared for {job_id}");
                } else {
                    println!("No checkpoint for {job_id}");
                }
            }
            CheckpointSubcommand::Verify => {
                let valid = store.verify_all()?;
                println!("{valid} checkpoint files valid in {}", store.dir().display());
            }
        }
        Ok(())
    }
}
