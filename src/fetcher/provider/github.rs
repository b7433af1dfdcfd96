//! GitHub REST v3 and Search API

use super::{classify_by_status, key_field, Endpoint, Enrichment, PageItems, PageStyle, ProviderApi};
use crate::collector::FetchWindow;
use crate::credentials::{Credential, TokenStatus};
use crate::fetcher::{ApiRequest, ApiResponse, FetcherError, FetcherResult};
use crate::quota::{Bucket, QuotaExtractor, QuotaFields};
use crate::{Depth, EntityType, Provider};
use chrono::{TimeZone, Utc};
use serde_json::Value;

const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

/// GitHub strategy
#[derive(Debug, Clone)]
pub struct GitHubApi {
    base_url: String,
}

impl GitHubApi {
    /// Strategy against `base_url` (normally `https://api.github.com`).
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn get(&self, path: &str) -> ApiRequest {
        ApiRequest::get(format!("{}{}", self.base_url, path))
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    fn search_query(target: &str, kind: &str, window: &FetchWindow) -> String {
        let mut query = format!("repo:{target} is:{kind}");
        if !window.is_unbounded() {
            let side = |d: Option<chrono::NaiveDate>| {
                d.map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "*".to_string())
            };
            query.push_str(&format!(" created:{}..{}", side(window.start), side(window.end)));
        }
        query
    }

    fn number(item: &Value) -> Option<String> {
        key_field(item, "number")
    }
}

impl ProviderApi for GitHubApi {
    fn provider(&self) -> Provider {
        Provider::GitHub
    }

    fn supports(&self, entity: EntityType) -> bool {
        !matches!(entity, EntityType::Questions)
    }

    fn endpoint(&self, entity: EntityType, target: &str, window: &FetchWindow) -> FetcherResult<Endpoint> {
        let paged = PageStyle::PageNumber {
            page: "page",
            size: "per_page",
        };
        let endpoint = match entity {
            EntityType::Issues | EntityType::PullRequests => {
                let kind = if entity == EntityType::Issues { "issue" } else { "pr" };
                Endpoint {
                    entity,
                    request: self
                        .get("/search/issues")
                        .query("q", Self::search_query(target, kind, window))
                        .query("sort", "created")
                        .query("order", "asc"),
                    bucket: Bucket::GITHUB_SEARCH,
                    style: paged,
                }
            }
            EntityType::Commits => {
                let mut request = self.get(&format!("/repos/{target}/commits"));
                if let Some(start) = window.start {
                    request = request.query("since", format!("{}T00:00:00Z", start.format("%Y-%m-%d")));
                }
                if let Some(end) = window.end {
                    request = request.query("until", format!("{}T23:59:59Z", end.format("%Y-%m-%d")));
                }
                Endpoint {
                    entity,
                    request,
                    bucket: Bucket::GITHUB_CORE,
                    style: paged,
                }
            }
            EntityType::Branches => Endpoint {
                entity,
                request: self.get(&format!("/repos/{target}/branches")),
                bucket: Bucket::GITHUB_CORE,
                style: paged,
            },
            EntityType::Metadata => Endpoint {
                entity,
                request: self.get(&format!("/repos/{target}")),
                bucket: Bucket::GITHUB_CORE,
                style: PageStyle::Single,
            },
            EntityType::Questions => {
                return Err(FetcherError::Unsupported(format!("{entity} on {}", self.provider())))
            }
        };
        Ok(endpoint)
    }

    fn preflight(&self, endpoint: &Endpoint) -> Option<ApiRequest> {
        matches!(endpoint.entity, EntityType::Issues | EntityType::PullRequests)
            .then(|| endpoint.page_request(1, 1))
    }

    fn preflight_total(&self, body: &Value) -> Option<u64> {
        body.get("total_count").and_then(Value::as_u64)
    }

    fn extract_page(&self, entity: EntityType, body: &Value) -> FetcherResult<PageItems> {
        match entity {
            EntityType::Issues | EntityType::PullRequests => {
                let items = body
                    .get("items")
                    .and_then(Value::as_array)
                    .ok_or_else(|| FetcherError::ParseError("search response without items".into()))?;
                Ok(PageItems {
                    items: items.clone(),
                    has_more: None,
                    total: body.get("total_count").and_then(Value::as_u64),
                })
            }
            EntityType::Metadata => {
                if !body.is_object() {
                    return Err(FetcherError::ParseError("repository response is not an object".into()));
                }
                Ok(PageItems {
                    items: vec![body.clone()],
                    has_more: Some(false),
                    total: Some(1),
                })
            }
            _ => {
                let items = body
                    .as_array()
                    .ok_or_else(|| FetcherError::ParseError(format!("{entity} response is not a list")))?;
                Ok(PageItems {
                    items: items.clone(),
                    has_more: None,
                    total: None,
                })
            }
        }
    }

    fn is_rate_limited(&self, response: &ApiResponse) -> bool {
        matches!(response.status, 403 | 429)
            && (response.body_mentions("rate limit")
                || response.header("x-ratelimit-remaining").map(str::trim) == Some("0"))
    }

    fn quota_extractor(&self) -> QuotaExtractor {
        QuotaExtractor::GitHubHeaders
    }

    fn authorize(&self, request: &mut ApiRequest, credential: &Credential) {
        request.auth = crate::fetcher::Auth::Bearer(credential.secret().to_string());
    }

    fn verify_request(&self) -> ApiRequest {
        self.get("/rate_limit")
    }

    fn classify_verification(&self, response: &ApiResponse) -> TokenStatus {
        let core = response
            .json()
            .ok()
            .and_then(|body| body.pointer("/resources/core").cloned());
        let field = |name: &str| core.as_ref().and_then(|c| c.get(name)).and_then(Value::as_u64);
        classify_by_status(response, field("remaining"), field("limit"))
    }

    fn probe_request(&self, _bucket: &Bucket) -> Option<ApiRequest> {
        Some(self.get("/rate_limit"))
    }

    fn parse_probe(&self, bucket: &Bucket, response: &ApiResponse) -> Option<QuotaFields> {
        if !response.is_success() {
            return None;
        }
        let body = response.json().ok()?;
        let resource = body.get("resources")?.get(bucket.name)?;
        let field = |name: &str| resource.get(name).and_then(Value::as_u64);
        Some(QuotaFields {
            limit: field("limit"),
            remaining: field("remaining"),
            reset_at: field("reset").and_then(|epoch| Utc.timestamp_opt(epoch as i64, 0).single()),
            retry_after: None,
        })
    }

    fn natural_key(&self, entity: EntityType, item: &Value) -> Option<String> {
        match entity {
            EntityType::Issues | EntityType::PullRequests => Self::number(item),
            EntityType::Commits => key_field(item, "sha"),
            EntityType::Branches => key_field(item, "name"),
            EntityType::Metadata => key_field(item, "full_name"),
            EntityType::Questions => None,
        }
    }

    /// Issues always carry their timeline and pull requests their detail
    /// object (merge state, diff stats); `complex` adds comments, PR commits,
    /// and repository languages and labels.
    fn enrichments(&self, entity: EntityType, target: &str, item: &Value, depth: Depth) -> Vec<Enrichment> {
        let enrichment = |field: &'static str, request: ApiRequest| Enrichment {
            field,
            request,
            bucket: Bucket::GITHUB_CORE,
        };
        let listing = |field: &'static str, path: String| {
            enrichment(field, self.get(&path).query("per_page", "100"))
        };
        let complex = depth == Depth::Complex;

        let mut wanted = Vec::new();
        match entity {
            EntityType::Issues => {
                if let Some(n) = Self::number(item) {
                    wanted.push(listing("timeline", format!("/repos/{target}/issues/{n}/timeline")));
                    if complex {
                        wanted.push(listing("comments", format!("/repos/{target}/issues/{n}/comments")));
                    }
                }
            }
            EntityType::PullRequests => {
                if let Some(n) = Self::number(item) {
                    wanted.push(enrichment("pull", self.get(&format!("/repos/{target}/pulls/{n}"))));
                    if complex {
                        wanted.push(listing("commits", format!("/repos/{target}/pulls/{n}/commits")));
                        wanted.push(listing("comments", format!("/repos/{target}/issues/{n}/comments")));
                    }
                }
            }
            EntityType::Metadata if complex => {
                wanted.push(listing("languages", format!("/repos/{target}/languages")));
                wanted.push(listing("labels", format!("/repos/{target}/labels")));
            }
            _ => {}
        }
        wanted
    }
}
