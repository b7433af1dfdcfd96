//! Status command implementation

use super::collect::print_report;
use super::{Cli, CliError};
use crate::collector::FileStatusSink;
use clap::Parser;

/// Status command arguments
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Job identifier, as printed by `collect`
    #[arg(long)]
    pub job_id: String,
}

impl StatusArgs {
    /// Print the last report published for the job.
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let sink = FileStatusSink::new(&cli.state_dir);
        match sink.load(&self.job_id)? {
            Some(report) => print_report(&report, cli.output_format),
            None => Err(CliError::NotFound(format!("no status recorded for job {}", self.job_id))),
        }
    }
}
