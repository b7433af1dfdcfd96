//! Page walking across the three page styles

use futures_util::StreamExt;
use repo_miner::fetcher::provider::{GitHubApi, JiraApi, StackExchangeApi};
use repo_miner::fetcher::{ApiResponse, MockTransport, PaginatedFetcher};
use repo_miner::{CredentialPool, EntityType, FetchWindow};
use serde_json::{json, Value};
use std::sync::Arc;

fn commits(n: usize, offset: usize) -> ApiResponse {
    let items: Vec<_> = (0..n).map(|i| json!({"sha": format!("sha-{}", offset + i)})).collect();
    ApiResponse::new(200, Value::Array(items).to_string())
}

fn github(transport: Arc<MockTransport>) -> PaginatedFetcher {
    PaginatedFetcher::new(
        Arc::new(GitHubApi::new("https://api.github.test")),
        transport,
        CredentialPool::load(Some("t"), None, false).unwrap(),
    )
}

#[tokio::test]
async fn test_full_page_then_partial_page_yields_137_items() {
    let transport = MockTransport::sequence(vec![Ok(commits(100, 0)), Ok(commits(37, 100))]).shared();
    let mut fetcher = github(transport.clone());
    let endpoint = fetcher
        .api()
        .endpoint(EntityType::Commits, "o/r", &FetchWindow::unbounded())
        .unwrap();

    let mut numbers = Vec::new();
    let mut total = 0;
    {
        let mut pages = fetcher.fetch_all(&endpoint, 100);
        while let Some(page) = pages.next().await {
            let page = page.unwrap();
            numbers.push(page.number);
            total += page.items.len();
        }
    }

    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(total, 137);
    assert_eq!(transport.request_count(), 2);
    assert_eq!(fetcher.stats().api_requests, 2);
}

#[tokio::test]
async fn test_jira_pages_by_offset_until_total() {
    let transport = MockTransport::new(|request| {
        let start: u64 = request.param("startAt").unwrap_or("0").parse().unwrap();
        let count = if start == 0 { 100 } else { 50 };
        let issues: Vec<_> = (0..count).map(|i| json!({"id": (start + i).to_string()})).collect();
        Ok(ApiResponse::new(
            200,
            json!({"startAt": start, "maxResults": 100, "total": 150, "issues": issues}).to_string(),
        ))
    })
    .shared();
    let mut fetcher = PaginatedFetcher::new(
        Arc::new(JiraApi::new("https://acme.atlassian.test")),
        transport.clone(),
        CredentialPool::load(Some("jira-token"), Some("dev@example.com"), true).unwrap(),
    );
    let window = FetchWindow::new(Some("2024-01-01".parse().unwrap()), Some("2024-01-01".parse().unwrap()));
    let endpoint = fetcher.api().endpoint(EntityType::Issues, "KAFKA", &window).unwrap();

    let items = fetcher.collect_all(&endpoint, 100).await.unwrap();
    assert_eq!(items.len(), 150);

    let offsets: Vec<_> = transport
        .requests()
        .iter()
        .map(|r| r.param("startAt").unwrap_or_default().to_string())
        .collect();
    assert_eq!(offsets, vec!["0", "100"]);
}

#[tokio::test]
async fn test_explicit_no_more_stops_on_full_page() {
    let transport = MockTransport::sequence(vec![Ok(ApiResponse::new(
        200,
        json!({"items": [{"question_id": 1}, {"question_id": 2}], "has_more": false, "quota_remaining": 9000, "quota_max": 10000})
            .to_string(),
    ))])
    .shared();
    let mut fetcher = PaginatedFetcher::new(
        Arc::new(StackExchangeApi::new("https://api.stackexchange.test", "stackoverflow")),
        transport.clone(),
        CredentialPool::load(Some("key"), None, false).unwrap(),
    );
    let endpoint = fetcher
        .api()
        .endpoint(EntityType::Questions, "stackoverflow", &FetchWindow::unbounded())
        .unwrap();

    let items = fetcher.collect_all(&endpoint, 2).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_upstream_error_skips_page_and_ends_stream() {
    let transport = MockTransport::sequence(vec![
        Ok(commits(2, 0)),
        Ok(ApiResponse::new(422, r#"{"message":"Validation Failed"}"#)),
    ])
    .shared();
    let mut fetcher = github(transport.clone());
    let endpoint = fetcher
        .api()
        .endpoint(EntityType::Commits, "o/r", &FetchWindow::unbounded())
        .unwrap();

    let first = fetcher.fetch_page(&endpoint, 1, 2).await.unwrap();
    assert_eq!(first.next_number(), Some(2));

    let second = fetcher.fetch_page(&endpoint, 2, 2).await.unwrap();
    assert!(second.items.is_empty());
    assert_eq!(second.skipped.as_ref().map(|s| s.status), Some(422));
    assert_eq!(second.next_number(), None);
}
