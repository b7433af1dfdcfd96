//! Collect command implementation

use super::{Cli, CliError, OutputFormat, ResumeMode};
use crate::collector::{
    dispatch, CollectionJob, CollectionOrchestrator, FanoutSink, FileStatusSink, JobReport,
    JobStatus, StatusSink,
};
use crate::config::MinerConfig;
use crate::fetcher::PaginatedFetcher;
use crate::resume::{FileCheckpointStore, ProgressCheckpoint};
use crate::shutdown::SharedShutdown;
use crate::store::JsonDirStore;
use crate::{Depth, EntityType, Provider};
use chrono::NaiveDate;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Collect command arguments
#[derive(Parser, Debug)]
pub struct CollectArgs {
    /// API to collect from (github, jira, stackexchange)
    #[arg(long)]
    pub provider: Provider,

    /// Entity to collect (commits, issues, pull_requests, branches, metadata, questions)
    #[arg(long)]
    pub entity: EntityType,

    /// owner/repo, Jira project key, or Stack Exchange site
    #[arg(long)]
    pub target: String,

    /// First day to collect (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Last day to collect, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// basic or complex (adds comments, PR commits and repository languages/labels)
    #[arg(long, default_value = "basic")]
    pub depth: Depth,

    /// Days per window (default: MINER_INTERVAL_DAYS or 1)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub interval_days: Option<u32>,

    /// Items per page, at most 100 (default: MINER_PAGE_SIZE or 100)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub page_size: Option<u32>,

    /// Only collect questions carrying these tags, `;`-separated (Stack Exchange)
    #[arg(long)]
    pub tagged: Option<String>,
}

impl CollectArgs {
    /// Job described by these arguments.
    pub fn job(&self, default_interval_days: u32) -> CollectionJob {
        CollectionJob::new(self.provider, self.entity, self.target.clone())
            .with_range(self.start_date, self.end_date)
            .with_depth(self.depth)
            .with_interval_days(self.interval_days.unwrap_or(default_interval_days))
            .with_tagged(self.tagged.clone())
    }

    /// Execute the collect command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let config = MinerConfig::from_env()?;
        let job = self.job(config.interval_days);
        let job_id = job.id();

        let checkpoint_store = FileCheckpointStore::new(&cli.state_dir);
        match cli.resume {
            ResumeMode::On => {}
            ResumeMode::Reset => {
                if ProgressCheckpoint::new(Arc::new(checkpoint_store.clone())).clear(&job_id)? {
                    info!(job_id = %job_id, "Reset mode: checkpoint deleted");
                }
            }
            ResumeMode::Verify => {
                let valid = checkpoint_store.verify_all()?;
                info!(valid, "Verify passed");
            }
        }

        let fetcher = PaginatedFetcher::from_config(&config, self.provider)?;
        let file_sink = Arc::new(FileStatusSink::new(&cli.state_dir));
        let mut sinks = FanoutSink::new().with(file_sink.clone());
        if cli.output_format == OutputFormat::Human {
            sinks = sinks.with(Arc::new(ProgressBarSink::new()));
        }

        let orchestrator = CollectionOrchestrator::new(
            fetcher,
            ProgressCheckpoint::new(Arc::new(checkpoint_store)),
            Box::new(JsonDirStore::new(&cli.data_dir, self.provider)),
            Arc::new(sinks),
        )
        .with_shutdown(shutdown)
        .with_page_size(self.page_size.unwrap_or(config.page_size));

        let handle = dispatch::spawn(orchestrator, job);
        let result = handle.wait().await;

        let report = match &result {
            Ok(report) => Some(report.clone()),
            Err(_) => file_sink.load(&job_id).ok().flatten(),
        };
        if let Some(report) = report {
            print_report(&report, cli.output_format)?;
        }

        result.map(|_| ()).map_err(CliError::from)
    }
}

/// Print a job report in the requested format.
pub fn print_report(report: &JobReport, format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report).map_err(|e| CliError::Output(e.to_string()))?;
            println!("{json}");
        }
        OutputFormat::Human => {
            println!("Job: {}", report.job_id);
            println!("  Status: {}", report.status);
            println!("  Windows completed: {}", report.windows_completed);
            println!("  Records upserted: {}", report.records_upserted);
            println!("  Items skipped: {}", report.items_skipped);
            println!("  Last operation: {}", report.operation);
            if let Some(error_type) = &report.error_type {
                println!("  Error type: {error_type}");
            }
            if let Some(error) = &report.error {
                println!("  Error: {error}");
            }
        }
    }
    Ok(())
}

/// Drives a terminal spinner from job reports
pub struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    /// Spinner ticking in the background.
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

impl Default for ProgressBarSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for ProgressBarSink {
    fn publish(&self, report: &JobReport) {
        match report.status {
            JobStatus::Success | JobStatus::Failure => {
                self.bar.finish_with_message(format!("{}: {}", report.status, report.operation));
            }
            JobStatus::Pending | JobStatus::Started => self.bar.set_message(report.operation.clone()),
        }
    }
}
