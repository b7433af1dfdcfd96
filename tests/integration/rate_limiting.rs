//! Rate-limit recovery through the guard and the fetcher

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use repo_miner::clock::ManualClock;
use repo_miner::collector::{
    CollectionJob, CollectionOrchestrator, Decision, FetchWindow, JobStatus, MemoryStatusSink,
    RateLimitGuard,
};
use repo_miner::config::GuardSettings;
use repo_miner::fetcher::provider::GitHubApi;
use repo_miner::fetcher::{ApiRequest, ApiResponse, Auth, MockTransport, PaginatedFetcher};
use repo_miner::quota::{Bucket, QuotaTracker};
use repo_miner::resume::ProgressCheckpoint;
use repo_miner::store::{MemoryStore, RecordStore};
use repo_miner::{CredentialPool, EntityType, Provider};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// 403 with `remaining: 0, limit: 30, reset: now+120s`
fn exhausted() -> ApiResponse {
    ApiResponse::new(403, r#"{"message":"API rate limit exceeded for user"}"#)
        .with_header("x-ratelimit-limit", "30")
        .with_header("x-ratelimit-remaining", "0")
        .with_header("x-ratelimit-reset", (now().timestamp() + 120).to_string())
}

fn rate_limit(remaining: u64) -> ApiResponse {
    ApiResponse::new(
        200,
        json!({"resources": {"core": {"limit": 5000, "remaining": remaining, "reset": now().timestamp() + 3600}}})
            .to_string(),
    )
}

fn commits(n: usize) -> ApiResponse {
    let items: Vec<_> = (0..n).map(|i| json!({"sha": format!("c{i}")})).collect();
    ApiResponse::new(200, serde_json::Value::Array(items).to_string())
}

fn token(request: &repo_miner::fetcher::ApiRequest) -> String {
    match &request.auth {
        Auth::Bearer(token) => token.clone(),
        _ => String::new(),
    }
}

fn guard(transport: Arc<MockTransport>, clock: Arc<ManualClock>) -> RateLimitGuard {
    RateLimitGuard::new(
        Arc::new(GitHubApi::new("https://api.github.test")),
        transport,
        clock,
        GuardSettings::default(),
        FixedOffset::east_opt(0).unwrap(),
    )
}

#[tokio::test]
async fn test_exhausted_credential_switches_to_one_with_quota() {
    let clock = ManualClock::shared(now());
    let transport = MockTransport::new(|request| {
        assert!(request.url.ends_with("/rate_limit"));
        Ok(rate_limit(if token(request) == "second" { 500 } else { 0 }))
    })
    .shared();
    let mut guard = guard(transport.clone(), clock.clone());
    let mut pool = CredentialPool::load(Some("first,second"), None, false).unwrap();
    assert_eq!(pool.active_index(), 0);

    assert!(guard.is_exhausted(&exhausted()));
    let decision = guard
        .handle(&exhausted(), &Bucket::GITHUB_CORE, &mut pool, &mut QuotaTracker::new())
        .await;

    assert_eq!(decision, Decision::RetriedWithNewCredential { from: 0, to: 1 });
    assert_eq!(decision.label(), "rotated");
    assert_eq!(pool.active_index(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_single_credential_waits_until_reset_plus_margin() {
    let clock = ManualClock::shared(now());
    let transport = MockTransport::sequence(vec![Ok(rate_limit(5000))]).shared();
    let mut guard = guard(transport, clock.clone());
    let mut pool = CredentialPool::load(Some("only"), None, false).unwrap();

    let decision = guard
        .handle(&exhausted(), &Bucket::GITHUB_CORE, &mut pool, &mut QuotaTracker::new())
        .await;

    let expected = Duration::from_secs(120) + GuardSettings::default().safety_margin;
    assert_eq!(decision, Decision::WaitThenRetry { waited: expected });
    assert_eq!(decision.label(), "waited");
    assert_eq!(clock.sleeps(), vec![expected]);
    assert_eq!(pool.active_index(), 0);
}

#[tokio::test]
async fn test_permission_403_is_not_a_rate_limit() {
    let clock = ManualClock::shared(now());
    let transport = MockTransport::sequence(vec![]).shared();
    let guard = guard(transport, clock);

    let forbidden = ApiResponse::new(403, r#"{"message":"Resource not accessible by integration"}"#)
        .with_header("x-ratelimit-remaining", "4999");
    assert!(!guard.is_exhausted(&forbidden));
}

#[tokio::test]
async fn test_fetcher_retries_same_page_after_rotation() {
    let clock = ManualClock::shared(now());
    let transport = MockTransport::new(|request| {
        if request.url.ends_with("/rate_limit") {
            return Ok(rate_limit(if token(request) == "second" { 500 } else { 0 }));
        }
        if token(request) == "first" {
            Ok(exhausted())
        } else {
            Ok(commits(2))
        }
    })
    .shared();
    let mut fetcher = PaginatedFetcher::new(
        Arc::new(GitHubApi::new("https://api.github.test")),
        transport.clone(),
        CredentialPool::load(Some("first,second"), None, false).unwrap(),
    )
    .with_clock(clock.clone());

    let endpoint = fetcher
        .api()
        .endpoint(EntityType::Commits, "o/r", &FetchWindow::unbounded())
        .unwrap();
    let items = fetcher.collect_all(&endpoint, 100).await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(fetcher.pool().active_index(), 1);
    assert_eq!(fetcher.stats().rotations, 1);
    assert_eq!(
        fetcher.take_decisions(),
        vec![Decision::RetriedWithNewCredential { from: 0, to: 1 }]
    );

    let pages: Vec<_> = transport
        .requests_to("/commits")
        .iter()
        .map(|r| (token(r), r.param("page").unwrap_or_default().to_string()))
        .collect();
    assert_eq!(
        pages,
        vec![("first".to_string(), "1".to_string()), ("second".to_string(), "1".to_string())]
    );
}

#[tokio::test]
async fn test_fetcher_waits_with_single_credential() {
    let clock = ManualClock::shared(now());
    let listing_calls = Arc::new(AtomicUsize::new(0));
    let transport = MockTransport::new({
        let listing_calls = listing_calls.clone();
        move |request| {
            if request.url.ends_with("/rate_limit") {
                return Ok(rate_limit(5000));
            }
            if listing_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(exhausted())
            } else {
                Ok(commits(1))
            }
        }
    })
    .shared();
    let mut fetcher = PaginatedFetcher::new(
        Arc::new(GitHubApi::new("https://api.github.test")),
        transport,
        CredentialPool::load(Some("only"), None, false).unwrap(),
    )
    .with_clock(clock.clone());

    let endpoint = fetcher
        .api()
        .endpoint(EntityType::Commits, "o/r", &FetchWindow::unbounded())
        .unwrap();
    let items = fetcher.collect_all(&endpoint, 100).await.unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(clock.total_slept(), Duration::from_secs(125));
    assert_eq!(fetcher.stats().waits, 1);
    assert_eq!(listing_calls.load(Ordering::SeqCst), 2);
}

/// Commits `from..to` with the given remaining core quota in the headers.
fn commit_page(from: usize, to: usize, remaining: u64) -> ApiResponse {
    let items: Vec<_> = (from..to).map(|i| json!({"sha": format!("c{i}")})).collect();
    ApiResponse::new(200, serde_json::Value::Array(items).to_string())
        .with_header("x-ratelimit-limit", "5000")
        .with_header("x-ratelimit-remaining", remaining.to_string())
        .with_header("x-ratelimit-reset", (now().timestamp() + 3600).to_string())
}

fn bad_credentials() -> ApiResponse {
    ApiResponse::new(401, r#"{"message":"Bad credentials"}"#)
}

fn page_of(request: &ApiRequest) -> String {
    request.param("page").unwrap_or_default().to_string()
}

fn commits_job() -> CollectionJob {
    let day = NaiveDate::from_ymd_opt(2024, 1, 1);
    CollectionJob::new(Provider::GitHub, EntityType::Commits, "o/r").with_range(day, day)
}

fn commits_orchestrator(
    transport: Arc<MockTransport>,
    tokens: &str,
    store: MemoryStore,
    checkpoints: ProgressCheckpoint,
) -> CollectionOrchestrator {
    let fetcher = PaginatedFetcher::new(
        Arc::new(GitHubApi::new("https://api.github.test")),
        transport,
        CredentialPool::load(Some(tokens), None, false).unwrap(),
    )
    .with_clock(ManualClock::shared(now()));
    CollectionOrchestrator::new(
        fetcher,
        checkpoints,
        Box::new(store),
        Arc::new(MemoryStatusSink::new()),
    )
    .with_page_size(100)
}

#[tokio::test]
async fn test_drained_credential_never_rotates_onto_one_that_failed_verification() {
    let transport = MockTransport::new(|request| {
        let token = token(request);
        if request.url.ends_with("/rate_limit") {
            return Ok(if token == "good" { rate_limit(5000) } else { bad_credentials() });
        }
        if token != "good" {
            return Ok(bad_credentials());
        }
        Ok(match page_of(request).as_str() {
            "1" => commit_page(0, 100, 0),
            _ => commit_page(100, 120, 4999),
        })
    })
    .shared();
    let store = MemoryStore::new();
    let checkpoints = ProgressCheckpoint::in_memory();
    let mut orchestrator =
        commits_orchestrator(transport.clone(), "good,revoked", store.clone(), checkpoints.clone());

    let mut job = commits_job();
    let report = orchestrator.run(&mut job).await.unwrap();

    assert_eq!(report.status, JobStatus::Success);
    assert_eq!(report.items_skipped, 0);
    assert_eq!(store.count(EntityType::Commits).unwrap(), 120);
    assert_eq!(orchestrator.fetcher().stats().rotations, 0);
    assert!(!orchestrator.fetcher().pool().is_usable(1));

    let sent: Vec<_> = transport
        .requests_to("/commits")
        .iter()
        .map(|r| (token(r), page_of(r)))
        .collect();
    assert_eq!(
        sent,
        vec![("good".to_string(), "1".to_string()), ("good".to_string(), "2".to_string())]
    );
    assert_eq!(
        checkpoints.resume_point(&job).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 2)
    );
}

#[tokio::test]
async fn test_credential_revoked_mid_run_rotates_back_and_keeps_the_page() {
    let transport = MockTransport::new(|request| {
        let token = token(request);
        if request.url.ends_with("/rate_limit") {
            return Ok(rate_limit(if token == "first" { 5000 } else { 4000 }));
        }
        Ok(match (token.as_str(), page_of(request).as_str()) {
            ("first", "1") => commit_page(0, 100, 0),
            ("first", _) => commit_page(100, 120, 4999),
            _ => bad_credentials(),
        })
    })
    .shared();
    let store = MemoryStore::new();
    let checkpoints = ProgressCheckpoint::in_memory();
    let mut orchestrator =
        commits_orchestrator(transport.clone(), "first,second", store.clone(), checkpoints.clone());

    let mut job = commits_job();
    let report = orchestrator.run(&mut job).await.unwrap();

    assert_eq!(report.items_skipped, 0);
    assert_eq!(store.count(EntityType::Commits).unwrap(), 120);
    assert_eq!(orchestrator.fetcher().stats().rotations, 2);
    assert_eq!(orchestrator.fetcher().pool().active_index(), 0);
    assert!(!orchestrator.fetcher().pool().is_usable(1));

    let sent: Vec<_> = transport
        .requests_to("/commits")
        .iter()
        .map(|r| (token(r), page_of(r)))
        .collect();
    assert_eq!(
        sent,
        vec![
            ("first".to_string(), "1".to_string()),
            ("second".to_string(), "2".to_string()),
            ("first".to_string(), "2".to_string()),
        ]
    );
    assert_eq!(
        checkpoints.resume_point(&job).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 2)
    );
}

#[tokio::test]
async fn test_last_credential_revoked_mid_run_fails_window_without_checkpoint() {
    let transport = MockTransport::new(|request| {
        if request.url.ends_with("/rate_limit") {
            return Ok(rate_limit(5000));
        }
        Ok(match page_of(request).as_str() {
            "1" => commit_page(0, 100, 4000),
            _ => bad_credentials(),
        })
    })
    .shared();
    let checkpoints = ProgressCheckpoint::in_memory();
    let mut orchestrator =
        commits_orchestrator(transport, "only", MemoryStore::new(), checkpoints.clone());

    let mut job = commits_job();
    let err = orchestrator.run(&mut job).await.unwrap_err();

    assert_eq!(err.kind(), "NoValidCredentialError");
    assert!(err.to_string().contains("page 1"));
    assert_eq!(job.status, JobStatus::Failure);
    assert_eq!(job.progress.items_skipped, 0);
    assert_eq!(job.progress.windows_completed, 0);
    assert_eq!(
        checkpoints.resume_point(&job).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 1)
    );
}
