//! Integration tests for resume after a failed window

use chrono::{NaiveDate, TimeZone, Utc};
use repo_miner::clock::ManualClock;
use repo_miner::collector::{CollectionJob, CollectionOrchestrator, JobStatus, MemoryStatusSink};
use repo_miner::fetcher::provider::GitHubApi;
use repo_miner::fetcher::{ApiRequest, ApiResponse, MockTransport, PaginatedFetcher};
use repo_miner::resume::state::SCHEMA_VERSION;
use repo_miner::resume::{FileCheckpointStore, ProgressCheckpoint, ResumeState};
use repo_miner::store::{MemoryStore, RecordStore};
use repo_miner::{CredentialPool, EntityType, Provider};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn job() -> CollectionJob {
    CollectionJob::new(Provider::GitHub, EntityType::Issues, "rust-lang/rust")
        .with_range(Some(d("2024-01-01")), Some(d("2024-01-10")))
}

/// Day of month from the `created:` qualifier of a search request.
fn searched_day(request: &ApiRequest) -> Option<u32> {
    let q = request.param("q")?;
    let from = q.find("created:")? + "created:2024-01-".len();
    q.get(from..from + 2)?.parse().ok()
}

/// Search endpoint answering one issue per day, numbered by the day.
fn search(fail_on_day: Option<u32>) -> Arc<MockTransport> {
    MockTransport::new(move |request| {
        if request.url.ends_with("/rate_limit") {
            return Ok(ApiResponse::new(
                200,
                json!({"resources": {
                    "core": {"limit": 5000, "remaining": 5000, "reset": 0},
                    "search": {"limit": 30, "remaining": 30, "reset": 0}
                }})
                .to_string(),
            ));
        }
        let day = searched_day(request).unwrap_or(0);
        if Some(day) == fail_on_day {
            return Ok(ApiResponse::new(503, "service unavailable"));
        }
        Ok(ApiResponse::new(
            200,
            json!({"total_count": 1, "incomplete_results": false, "items": [{"number": day}]}).to_string(),
        ))
    })
    .shared()
}

fn orchestrator(
    transport: Arc<MockTransport>,
    state_dir: &TempDir,
    store: MemoryStore,
) -> (CollectionOrchestrator, Arc<MemoryStatusSink>) {
    let fetcher = PaginatedFetcher::new(
        Arc::new(GitHubApi::new("https://api.github.test")),
        transport,
        CredentialPool::load(Some("t1"), None, false).unwrap(),
    )
    .with_clock(ManualClock::shared(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()));
    let sink = Arc::new(MemoryStatusSink::new());
    let orchestrator = CollectionOrchestrator::new(
        fetcher,
        ProgressCheckpoint::in_dir(state_dir.path()),
        Box::new(store),
        sink.clone(),
    );
    (orchestrator, sink)
}

#[tokio::test]
async fn test_restart_after_failure_only_requests_remaining_days() {
    let state_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();

    // First run: days 1-5 complete, day 6 keeps failing.
    let (mut first, sink) = orchestrator(search(Some(6)), &state_dir, store.clone());
    let mut failing = job();
    let err = first.run(&mut failing).await.unwrap_err();
    assert_eq!(err.kind(), "TransientNetworkError");
    assert!(err.to_string().contains("2024-01-06..2024-01-06"));

    let report = sink.last().unwrap();
    assert_eq!(report.status, JobStatus::Failure);
    assert_eq!(report.error_type.as_deref(), Some("TransientNetworkError"));
    assert_eq!(report.windows_completed, 5);

    let checkpoints = ProgressCheckpoint::in_dir(state_dir.path());
    assert_eq!(checkpoints.resume_point(&job()).unwrap(), Some(d("2024-01-06")));
    assert_eq!(store.count(EntityType::Issues).unwrap(), 5);

    // Second run: healthy API, same state directory.
    let transport = search(None);
    let (mut second, _) = orchestrator(transport.clone(), &state_dir, store.clone());
    let mut resumed = job();
    let report = second.run(&mut resumed).await.unwrap();
    assert_eq!(report.status, JobStatus::Success);
    assert_eq!(report.windows_completed, 5);

    let mut days: Vec<u32> = transport
        .requests_to("/search/issues")
        .iter()
        .filter_map(searched_day)
        .collect();
    days.sort_unstable();
    days.dedup();
    assert_eq!(days, vec![6, 7, 8, 9, 10]);

    assert_eq!(store.count(EntityType::Issues).unwrap(), 10);
    assert_eq!(checkpoints.resume_point(&job()).unwrap(), Some(d("2024-01-11")));
}

#[tokio::test]
async fn test_checkpoint_file_is_versioned_resume_state() {
    let state_dir = TempDir::new().unwrap();
    let (mut orchestrator, _) = orchestrator(search(None), &state_dir, MemoryStore::new());
    let mut job = job().with_range(Some(d("2024-01-01")), Some(d("2024-01-02")));
    orchestrator.run(&mut job).await.unwrap();

    let path = FileCheckpointStore::new(state_dir.path()).path_for(&job.id());
    assert!(path.exists());

    let state = ResumeState::load(&path).unwrap();
    assert_eq!(state.schema_version(), SCHEMA_VERSION);
    assert_eq!(state.job().target, "rust-lang/rust");
    assert_eq!(state.checkpoint().job_id(), job.id());
    assert_eq!(state.checkpoint().last_completed_window_end(), Some(d("2024-01-02")));
    assert_eq!(state.checkpoint().windows_completed(), 2);

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("schema_version"));
}

#[tokio::test]
async fn test_reset_clears_checkpoint_and_starts_over() {
    let state_dir = TempDir::new().unwrap();
    let checkpoints = ProgressCheckpoint::in_dir(state_dir.path());
    let job = job();

    let (mut orchestrator, _) = orchestrator(search(None), &state_dir, MemoryStore::new());
    orchestrator.run(&mut job.clone()).await.unwrap();
    assert_eq!(checkpoints.resume_point(&job).unwrap(), Some(d("2024-01-11")));

    assert!(checkpoints.clear(&job.id()).unwrap());
    assert!(!checkpoints.clear(&job.id()).unwrap());
    assert_eq!(checkpoints.resume_point(&job).unwrap(), Some(d("2024-01-01")));
}

#[test]
fn test_verify_rejects_corrupted_checkpoint() {
    let state_dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::new(state_dir.path());
    assert_eq!(store.verify_all().unwrap(), 0);

    std::fs::create_dir_all(store.dir()).unwrap();
    std::fs::write(store.dir().join("broken.json"), "{not json").unwrap();
    assert!(store.verify_all().is_err());
}
