//! Command-line behavior that needs no network

use assert_cmd::Command;
use tempfile::TempDir;

fn miner(state: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("repo-miner").unwrap();
    cmd.env_remove("GITHUB_TOKENS")
        .env_remove("JIRA_API_TOKEN")
        .env_remove("STACK_TOKENS")
        .env("GITHUB_API_URL", "http://127.0.0.1:9")
        .env("RUST_LOG", "repo_miner=warn")
        .arg("--state-dir")
        .arg(state.path().join("state"))
        .arg("--data-dir")
        .arg(state.path().join("data"));
    cmd
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_lists_commands() {
    let output = Command::cargo_bin("repo-miner").unwrap().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["collect", "verify", "status", "checkpoint"] {
        assert!(stdout.contains(command), "missing {command} in help:\n{stdout}");
    }
}

#[test]
fn test_start_after_end_fails_with_invalid_range() {
    let dir = TempDir::new().unwrap();
    let output = miner(&dir)
        .env("GITHUB_TOKENS", "tok-a,tok-b")
        .args(["--output-format", "json", "collect", "--provider", "github", "--entity", "issues"])
        .args(["--target", "rust-lang/rust", "--start-date", "2024-01-05", "--end-date", "2024-01-01"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(stderr(&output).contains("InvalidRangeError"), "stderr: {}", stderr(&output));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "FAILURE");
    assert_eq!(report["error_type"], "InvalidRangeError");
    assert_eq!(report["job_id"], "github-issues-rust-lang%2Frust-20240105-20240101");
}

#[test]
fn test_missing_tokens_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let output = miner(&dir)
        .args(["collect", "--provider", "github", "--entity", "commits", "--target", "o/r"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(stderr(&output).contains("ConfigurationError"), "stderr: {}", stderr(&output));
}

#[test]
fn test_unknown_status_is_an_error() {
    let dir = TempDir::new().unwrap();
    let output = miner(&dir).args(["status", "--job-id", "nope"]).output().unwrap();

    assert!(!output.status.success());
    assert!(stderr(&output).contains("no status recorded for job nope"));
}

#[test]
fn test_checkpoint_verify_on_empty_state() {
    let dir = TempDir::new().unwrap();
    let output = miner(&dir).args(["checkpoint", "verify"]).output().unwrap();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("0 checkpoint files valid"));
}

#[test]
fn test_malformed_date_is_rejected_by_parser() {
    let dir = TempDir::new().unwrap();
    miner(&dir)
        .args(["collect", "--provider", "jira", "--entity", "issues", "--target", "KAFKA"])
        .args(["--start-date", "01/02/2024"])
        .assert()
        .failure();
}
