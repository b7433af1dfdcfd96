//! End-to-end jobs against scripted Stack Exchange and Jira APIs

use chrono::{NaiveDate, TimeZone, Utc};
use repo_miner::clock::ManualClock;
use repo_miner::collector::{
    dispatch, CollectionJob, CollectionOrchestrator, FanoutSink, FileStatusSink, JobStatus,
    MemoryStatusSink,
};
use repo_miner::fetcher::provider::stack_exchange::QUESTION_FILTER;
use repo_miner::fetcher::provider::{JiraApi, StackExchangeApi};
use repo_miner::fetcher::{ApiResponse, MockTransport, PaginatedFetcher};
use repo_miner::resume::ProgressCheckpoint;
use repo_miner::store::{JsonDirStore, MemoryStore, RecordStore};
use repo_miner::{CredentialPool, Depth, EntityType, Provider};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn d(s: &str) -> Option<NaiveDate> {
    Some(s.parse().unwrap())
}

fn stack_exchange() -> Arc<MockTransport> {
    MockTransport::new(|request| {
        if request.url.ends_with("/info") {
            return Ok(ApiResponse::new(
                200,
                json!({"items": [{}], "quota_max": 10000, "quota_remaining": 9500}).to_string(),
            ));
        }
        let from: i64 = request.param("fromdate").unwrap_or("0").parse().unwrap_or(0);
        Ok(ApiResponse::new(
            200,
            json!({
                "items": [{"question_id": from, "title": "q"}, {"question_id": from + 1, "title": "q"}],
                "has_more": false,
                "quota_max": 10000,
                "quota_remaining": 9400
            })
            .to_string(),
        ))
    })
    .shared()
}

fn se_fetcher(transport: Arc<MockTransport>) -> PaginatedFetcher {
    PaginatedFetcher::new(
        Arc::new(StackExchangeApi::new("https://api.stackexchange.test", "stackoverflow")),
        transport,
        CredentialPool::load(Some("se-key"), None, false).unwrap(),
    )
    .with_clock(ManualClock::shared(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()))
}

#[tokio::test]
async fn test_questions_are_written_one_file_per_key() {
    let data_dir = TempDir::new().unwrap();
    let store = JsonDirStore::new(data_dir.path(), Provider::StackExchange);
    let questions_dir = store.entity_dir(EntityType::Questions);
    let sink = Arc::new(MemoryStatusSink::new());

    let mut orchestrator = CollectionOrchestrator::new(
        se_fetcher(stack_exchange()),
        ProgressCheckpoint::in_memory(),
        Box::new(store),
        sink.clone(),
    );
    let mut job = CollectionJob::new(Provider::StackExchange, EntityType::Questions, "stackoverflow")
        .with_range(d("2024-01-01"), d("2024-01-03"));

    let report = orchestrator.run(&mut job).await.unwrap();
    assert_eq!(report.status, JobStatus::Success);
    assert_eq!(report.windows_completed, 3);
    assert_eq!(report.records_upserted, 6);
    assert_eq!(orchestrator.store().count(EntityType::Questions).unwrap(), 6);

    let files = std::fs::read_dir(&questions_dir).unwrap().count();
    assert_eq!(files, 6);

    let operations = sink.operations();
    assert!(operations.iter().any(|op| op.starts_with("window 1/3 2024-01-01..2024-01-01: starting")));
    assert!(operations.iter().any(|op| op.starts_with("[PROGRESS] window 3/3")));
    assert!(operations.last().unwrap().starts_with("completed: 3 windows, 6 records upserted"));
}

#[tokio::test]
async fn test_tagged_questions_request_filter_and_embedded_answers() {
    let transport = stack_exchange();
    let checkpoints = ProgressCheckpoint::in_memory();
    let mut orchestrator = CollectionOrchestrator::new(
        se_fetcher(transport.clone()),
        checkpoints.clone(),
        Box::new(MemoryStore::new()),
        Arc::new(MemoryStatusSink::new()),
    );
    let mut tagged = CollectionJob::new(Provider::StackExchange, EntityType::Questions, "stackoverflow")
        .with_range(d("2024-01-01"), d("2024-01-01"))
        .with_tagged(Some("rust;tokio".into()));

    orchestrator.run(&mut tagged).await.unwrap();

    let listings = transport.requests_to("/questions");
    assert!(!listings.is_empty());
    for request in &listings {
        assert_eq!(request.param("tagged"), Some("rust;tokio"));
        assert_eq!(request.param("filter"), Some(QUESTION_FILTER));
    }

    // The untagged job over the same days has its own checkpoint.
    let untagged = tagged.clone().with_tagged(None);
    assert_eq!(checkpoints.resume_point(&tagged).unwrap(), d("2024-01-02"));
    assert_eq!(checkpoints.resume_point(&untagged).unwrap(), d("2024-01-01"));
}

#[tokio::test]
async fn test_rerunning_a_window_does_not_duplicate_records() {
    let store = MemoryStore::new();
    let job = CollectionJob::new(Provider::StackExchange, EntityType::Questions, "stackoverflow")
        .with_range(d("2024-01-01"), d("2024-01-01"));

    for _ in 0..2 {
        let mut orchestrator = CollectionOrchestrator::new(
            se_fetcher(stack_exchange()),
            ProgressCheckpoint::in_memory(),
            Box::new(store.clone()),
            Arc::new(MemoryStatusSink::new()),
        );
        orchestrator.run(&mut job.clone()).await.unwrap();
    }

    assert_eq!(store.count(EntityType::Questions).unwrap(), 2);
}

#[tokio::test]
async fn test_spawned_job_writes_final_status_file() {
    let state_dir = TempDir::new().unwrap();
    let file_sink = Arc::new(FileStatusSink::new(state_dir.path()));
    let memory_sink = Arc::new(MemoryStatusSink::new());
    let orchestrator = CollectionOrchestrator::new(
        se_fetcher(stack_exchange()),
        ProgressCheckpoint::in_dir(state_dir.path()),
        Box::new(MemoryStore::new()),
        Arc::new(FanoutSink::new().with(file_sink.clone()).with(memory_sink.clone())),
    );
    let job = CollectionJob::new(Provider::StackExchange, EntityType::Questions, "stackoverflow")
        .with_range(d("2024-01-01"), d("2024-01-02"));
    let job_id = job.id();

    let handle = dispatch::spawn(orchestrator, job);
    assert_eq!(handle.job_id(), job_id);
    assert_eq!(memory_sink.history()[0].status, JobStatus::Pending);

    let (orchestrator, result) = handle.wait_with_orchestrator().await;
    assert!(result.is_ok());
    assert!(orchestrator.is_some());

    let saved = file_sink.load(&job_id).unwrap().unwrap();
    assert_eq!(saved.status, JobStatus::Success);
    assert_eq!(saved.records_upserted, 4);
    assert!(saved.error.is_none());
}

#[tokio::test]
async fn test_jira_complex_depth_attaches_comments_and_skips_missing() {
    let transport = MockTransport::new(|request| {
        if request.url.ends_with("/myself") {
            return Ok(ApiResponse::new(200, json!({"accountId": "abc"}).to_string()));
        }
        if request.url.ends_with("/comment") {
            return if request.url.contains("KAFKA-1/") {
                Ok(ApiResponse::new(200, json!({"comments": [{"body": "looks good"}]}).to_string()))
            } else {
                Ok(ApiResponse::new(404, r#"{"errorMessages":["Issue does not exist"]}"#))
            };
        }
        if request.param("maxResults") == Some("0") {
            return Ok(ApiResponse::new(200, json!({"startAt": 0, "total": 2, "issues": []}).to_string()));
        }
        Ok(ApiResponse::new(
            200,
            json!({
                "startAt": 0,
                "total": 2,
                "issues": [{"id": "10001", "key": "KAFKA-1"}, {"id": "10002", "key": "KAFKA-2"}]
            })
            .to_string(),
        ))
    })
    .shared();
    let fetcher = PaginatedFetcher::new(
        Arc::new(JiraApi::new("https://acme.atlassian.test")),
        transport.clone(),
        CredentialPool::load(Some("jira-token"), Some("dev@example.com"), true).unwrap(),
    )
    .with_clock(ManualClock::shared(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()));
    let store = MemoryStore::new();
    let sink = Arc::new(MemoryStatusSink::new());
    let mut orchestrator = CollectionOrchestrator::new(
        fetcher,
        ProgressCheckpoint::in_memory(),
        Box::new(store.clone()),
        sink.clone(),
    );
    let mut job = CollectionJob::new(Provider::Jira, EntityType::Issues, "KAFKA")
        .with_range(d("2024-01-01"), d("2024-01-01"))
        .with_depth(Depth::Complex);

    let report = orchestrator.run(&mut job).await.unwrap();
    assert_eq!(report.records_upserted, 2);
    assert_eq!(report.items_skipped, 1);

    let first = store.get(EntityType::Issues, "10001").unwrap();
    assert_eq!(first["comments"]["comments"][0]["body"], "looks good");
    let second = store.get(EntityType::Issues, "10002").unwrap();
    assert!(second.get("comments").is_none());

    assert!(sink.operations().iter().any(|op| op.contains("~2 items expected")));
}

#[tokio::test]
async fn test_provider_mismatch_is_configuration_error() {
    let mut orchestrator = CollectionOrchestrator::new(
        se_fetcher(stack_exchange()),
        ProgressCheckpoint::in_memory(),
        Box::new(MemoryStore::new()),
        Arc::new(MemoryStatusSink::new()),
    );
    let mut job = CollectionJob::new(Provider::GitHub, EntityType::Issues, "o/r");

    let err = orchestrator.run(&mut job).await.unwrap_err();
    assert_eq!(err.kind(), "ConfigurationError");
    assert_eq!(job.status, JobStatus::Failure);
}
