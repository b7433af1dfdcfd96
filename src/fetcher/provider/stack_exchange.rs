//! Stack Exchange API v2.3

use super::{key_field, Endpoint, PageItems, PageStyle, ProviderApi};
use crate::collector::FetchWindow;
use crate::credentials::{Credential, TokenStatus};
use crate::fetcher::{ApiRequest, ApiResponse, Auth, FetcherError, FetcherResult};
use crate::quota::{Bucket, QuotaExtractor, QuotaFields};
use crate::{EntityType, Provider};
use chrono::Utc;
use serde_json::Value;

/// Site used when none is configured.
pub const DEFAULT_SITE: &str = "stackoverflow";

/// Question filter embedding bodies, answers and comments (with their bodies)
/// in each listed question.
pub const QUESTION_FILTER: &str = "!2xWEp6FHz8hT56C1LBQjFx25D4Dzmr*3(8D4ngdB5g";

/// Stack Exchange strategy; the target is a site name
#[derive(Debug, Clone)]
pub struct StackExchangeApi {
    base_url: String,
    default_site: String,
}

impl StackExchangeApi {
    /// Strategy against `base_url`, verifying credentials on `default_site`.
    pub fn new(base_url: &str, default_site: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            default_site: default_site.to_string(),
        }
    }

    fn get(&self, path: &str) -> ApiRequest {
        ApiRequest::get(format!("{}/2.3{}", self.base_url, path))
    }

    fn info_request(&self) -> ApiRequest {
        self.get("/info").query("site", self.default_site.clone())
    }

    fn error_id(response: &ApiResponse) -> Option<u64> {
        response
            .json()
            .ok()
            .and_then(|body| body.get("error_id").and_then(Value::as_u64))
    }
}

impl ProviderApi for StackExchangeApi {
    fn provider(&self) -> Provider {
        Provider::StackExchange
    }

    fn supports(&self, entity: EntityType) -> bool {
        entity == EntityType::Questions
    }

    fn endpoint(&self, entity: EntityType, target: &str, window: &FetchWindow) -> FetcherResult<Endpoint> {
        if !self.supports(entity) {
            return Err(FetcherError::Unsupported(format!("{entity} on {}", self.provider())));
        }
        let site = if target.trim().is_empty() {
            self.default_site.as_str()
        } else {
            target.trim()
        };

        let mut request = self
            .get("/questions")
            .query("site", site)
            .query("order", "desc")
            .query("sort", "creation")
            .query("filter", QUESTION_FILTER);
        if let Some(start) = window.start {
            let from = start.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
            if let Some(from) = from {
                request = request.query("fromdate", from.to_string());
            }
        }
        if let Some(end) = window.end {
            let to = end.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc().timestamp());
            if let Some(to) = to {
                request = request.query("todate", to.to_string());
            }
        }

        Ok(Endpoint {
            entity,
            request,
            bucket: Bucket::STACK_EXCHANGE,
            style: PageStyle::PageNumber {
                page: "page",
                size: "pagesize",
            },
        })
    }

    fn supports_tags(&self) -> bool {
        true
    }

    fn apply_tags(&self, endpoint: &mut Endpoint, tags: &str) {
        endpoint.request.set_query("tagged", tags.trim());
    }

    fn extract_page(&self, _entity: EntityType, body: &Value) -> FetcherResult<PageItems> {
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| FetcherError::ParseError("response without items".into()))?;
        Ok(PageItems {
            items: items.clone(),
            has_more: body.get("has_more").and_then(Value::as_bool),
            total: body.get("total").and_then(Value::as_u64),
        })
    }

    fn is_rate_limited(&self, response: &ApiResponse) -> bool {
        match response.status {
            429 => true,
            400 | 403 => {
                response.body_mentions("throttle_violation")
                    || response.body_mentions("rate limit")
                    || Self::error_id(response) == Some(502)
            }
            _ => false,
        }
    }

    fn quota_extractor(&self) -> QuotaExtractor {
        QuotaExtractor::StackExchangeBody
    }

    fn authorize(&self, request: &mut ApiRequest, credential: &Credential) {
        let mut params = vec![("key".to_string(), credential.secret().to_string())];
        if let Some(token) = credential.identity() {
            params.push(("access_token".to_string(), token.to_string()));
        }
        request.auth = Auth::Query(params);
    }

    fn verify_request(&self) -> ApiRequest {
        self.info_request()
    }

    fn classify_verification(&self, response: &ApiResponse) -> TokenStatus {
        match response.status {
            200 => {
                let fields = QuotaExtractor::StackExchangeBody.extract(response, Utc::now());
                TokenStatus::Valid {
                    remaining: fields.remaining,
                    limit: fields.limit,
                }
            }
            400 | 401 if matches!(Self::error_id(response), Some(401 | 403)) => TokenStatus::InvalidOrExpired,
            401 => TokenStatus::InvalidOrExpired,
            403 => TokenStatus::InsufficientPermissions,
            status => TokenStatus::UnknownError(format!("HTTP {status}: {}", response.body_excerpt())),
        }
    }

    fn rejects_credential(&self, response: &ApiResponse) -> bool {
        match response.status {
            401 => true,
            400 => matches!(Self::error_id(response), Some(401 | 403)),
            _ => false,
        }
    }

    fn probe_request(&self, _bucket: &Bucket) -> Option<ApiRequest> {
        Some(self.info_request())
    }

    fn parse_probe(&self, _bucket: &Bucket, response: &ApiResponse) -> Option<QuotaFields> {
        if !response.is_success() {
            return None;
        }
        let fields = QuotaExtractor::StackExchangeBody.extract(response, Utc::now());
        fields.remaining.is_some().then_some(fields)
    }

    fn natural_key(&self, _entity: EntityType, item: &Value) -> Option<String> {
        key_field(item, "question_id")
    }
}
