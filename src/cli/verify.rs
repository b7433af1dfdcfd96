//! Verify command implementation

use super::{Cli, CliError, OutputFormat};
use crate::collector::CollectError;
use crate::config::MinerConfig;
use crate::fetcher::PaginatedFetcher;
use crate::Provider;
use clap::Parser;
use serde::Serialize;

/// Verify command arguments
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// API whose credentials to verify (github, jira, stackexchange)
    #[arg(long)]
    pub provider: Provider,
}

#[derive(Serialize)]
struct CredentialLine {
    index: usize,
    credential: String,
    #[serde(flatten)]
    status: crate::credentials::TokenStatus,
}

impl VerifyArgs {
    /// Probe every configured credential and print the outcome.
    ///
    /// Fails with `NoValidCredentialError` when none of them is usable.
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let config = MinerConfig::from_env()?;
        let fetcher = PaginatedFetcher::from_config(&config, self.provider)?;
        let statuses = fetcher.verify_all().await;

        let lines: Vec<CredentialLine> = fetcher
            .pool()
            .iter()
            .zip(statuses)
            .map(|(credential, status)| CredentialLine {
                index: credential.index(),
                credential: credential.masked(),
                status,
            })
            .collect();

        match cli.output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&lines).map_err(|e| CliError::Output(e.to_string()))?;
                println!("{json}");
            }
            OutputFormat::Human => {
                println!("{} credentials for {}:", lines.len(), self.provider);
                for line in &lines {
                    println!("  #{} {}: {}", line.index, line.credential, line.status);
                }
            }
        }

        let valid = lines.iter().filter(|l| l.status.is_valid()).count();
        if valid == 0 {
            let details = lines
                .iter()
                .map(|l| format!("#{}: {}", l.index, l.status.label()))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CollectError::NoValidCredential(format!(
                "all {} credentials failed verification ({details})",
                lines.len()
            ))
            .into());
        }
        Ok(())
    }
}
