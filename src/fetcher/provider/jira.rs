//! Jira Cloud REST API v3

use super::{classify_by_status, key_field, Endpoint, Enrichment, PageItems, PageStyle, ProviderApi};
use crate::collector::FetchWindow;
use crate::credentials::{Credential, TokenStatus};
use crate::fetcher::{ApiRequest, ApiResponse, Auth, FetcherError, FetcherResult};
use crate::quota::{Bucket, QuotaExtractor};
use crate::{Depth, EntityType, Provider};
use serde_json::Value;

/// Jira strategy; the target is a project key
#[derive(Debug, Clone)]
pub struct JiraApi {
    base_url: String,
}

impl JiraApi {
    /// Strategy against a site such as `https://acme.atlassian.net`.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn get(&self, path: &str) -> ApiRequest {
        ApiRequest::get(format!("{}{}", self.base_url, path)).header("Accept", "application/json")
    }

    /// JQL selecting `project` issues created within `window`.
    pub fn jql(project: &str, window: &FetchWindow) -> String {
        let mut clauses = vec![format!("project=\"{project}\"")];
        if let Some(start) = window.start {
            clauses.push(format!("created >= \"{} 00:00\"", start.format("%Y-%m-%d")));
        }
        if let Some(end) = window.end {
            clauses.push(format!("created <= \"{} 23:59\"", end.format("%Y-%m-%d")));
        }
        format!("{} ORDER BY created ASC", clauses.join(" AND "))
    }
}

impl ProviderApi for JiraApi {
    fn provider(&self) -> Provider {
        Provider::Jira
    }

    fn supports(&self, entity: EntityType) -> bool {
        entity == EntityType::Issues
    }

    fn endpoint(&self, entity: EntityType, target: &str, window: &FetchWindow) -> FetcherResult<Endpoint> {
        if !self.supports(entity) {
            return Err(FetcherError::Unsupported(format!("{entity} on {}", self.provider())));
        }
        Ok(Endpoint {
            entity,
            request: self
                .get("/rest/api/3/search")
                .query("jql", Self::jql(target, window)),
            bucket: Bucket::JIRA,
            style: PageStyle::Offset {
                offset: "startAt",
                size: "maxResults",
            },
        })
    }

    fn preflight(&self, endpoint: &Endpoint) -> Option<ApiRequest> {
        let mut request = endpoint.request.clone();
        request.set_query("maxResults", "0");
        Some(request)
    }

    fn preflight_total(&self, body: &Value) -> Option<u64> {
        body.get("total").and_then(Value::as_u64)
    }

    fn extract_page(&self, _entity: EntityType, body: &Value) -> FetcherResult<PageItems> {
        let items = body
            .get("issues")
            .and_then(Value::as_array)
            .ok_or_else(|| FetcherError::ParseError("search response without issues".into()))?;
        let total = body.get("total").and_then(Value::as_u64);
        let start_at = body.get("startAt").and_then(Value::as_u64).unwrap_or(0);
        Ok(PageItems {
            has_more: total.map(|t| start_at + (items.len() as u64) < t),
            items: items.clone(),
            total,
        })
    }

    fn is_rate_limited(&self, response: &ApiResponse) -> bool {
        response.status == 429 || (response.status == 403 && response.body_mentions("rate limit"))
    }

    fn quota_extractor(&self) -> QuotaExtractor {
        QuotaExtractor::JiraHeaders
    }

    fn authorize(&self, request: &mut ApiRequest, credential: &Credential) {
        request.auth = Auth::Basic {
            username: credential.identity().unwrap_or_default().to_string(),
            password: credential.secret().to_string(),
        };
    }

    fn verify_request(&self) -> ApiRequest {
        self.get("/rest/api/3/myself")
    }

    fn classify_verification(&self, response: &ApiResponse) -> TokenStatus {
        let header = |name: &str| response.header(name).and_then(|v| v.trim().parse().ok());
        let remaining = header("x-ratelimit-remaining").or(Some(Bucket::JIRA.default_limit));
        let limit = header("x-ratelimit-limit").or(Some(Bucket::JIRA.default_limit));
        classify_by_status(response, remaining, limit)
    }

    fn natural_key(&self, _entity: EntityType, item: &Value) -> Option<String> {
        key_field(item, "id")
    }

    fn enrichments(&self, _entity: EntityType, _target: &str, item: &Value, depth: Depth) -> Vec<Enrichment> {
        if depth != Depth::Complex {
            return Vec::new();
        }
        key_field(item, "key")
            .map(|key| {
                vec![Enrichment {
                    field: "comments",
                    request: self.get(&format!("/rest/api/3/issue/{key}/comment")),
                    bucket: Bucket::JIRA,
                }]
            })
            .unwrap_or_default()
    }
}
