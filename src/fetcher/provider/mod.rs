//! Per-API strategies
//!
//! Each upstream API supplies one [`ProviderApi`]: where an entity lives, how
//! pages are requested and read, how throttling shows up, where quota fields
//! are reported, and how credentials are probed. Nothing above this layer
//! inspects provider-specific JSON.

use super::{ApiRequest, ApiResponse, ApiTransport, FetcherResult};
use crate::collector::FetchWindow;
use crate::config::{ConfigError, ProviderSettings};
use crate::credentials::{Credential, CredentialVerifier, TokenStatus};
use crate::quota::{Bucket, QuotaExtractor, QuotaFields};
use crate::{Depth, EntityType, Provider};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub mod github;
pub mod jira;
pub mod stack_exchange;

pub use github::GitHubApi;
pub use jira::JiraApi;
pub use stack_exchange::StackExchangeApi;

/// How successive pages are addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStyle {
    /// 1-based page number
    PageNumber {
        /// Page parameter name
        page: &'static str,
        /// Page size parameter name
        size: &'static str,
    },
    /// 0-based item offset
    Offset {
        /// Offset parameter name
        offset: &'static str,
        /// Page size parameter name
        size: &'static str,
    },
    /// One response holds everything
    Single,
}

/// A listable resource filtered to one window
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Entity collected
    pub entity: EntityType,
    /// Request for the window without paging parameters
    pub request: ApiRequest,
    /// Quota bucket the requests draw from
    pub bucket: Bucket,
    /// Paging scheme
    pub style: PageStyle,
}

impl Endpoint {
    /// Request for 1-based page `page`.
    pub fn page_request(&self, page: u32, page_size: u32) -> ApiRequest {
        let mut request = self.request.clone();
        match self.style {
            PageStyle::PageNumber { page: p, size } => {
                request.set_query(p, page.to_string());
                request.set_query(size, page_size.to_string());
            }
            PageStyle::Offset { offset, size } => {
                let start = u64::from(page.saturating_sub(1)) * u64::from(page_size);
                request.set_query(offset, start.to_string());
                request.set_query(size, page_size.to_string());
            }
            PageStyle::Single => {}
        }
        request
    }

    /// Whether this endpoint returns exactly one page.
    pub fn is_single(&self) -> bool {
        self.style == PageStyle::Single
    }
}

/// Items read from one page body
#[derive(Debug, Clone, Default)]
pub struct PageItems {
    /// Items in API order
    pub items: Vec<Value>,
    /// Explicit "more pages" signal, when the API provides one
    pub has_more: Option<bool>,
    /// Total matching items, when the API reports it
    pub total: Option<u64>,
}

/// An extra per-item sub-resource attached to a record
#[derive(Debug, Clone)]
pub struct Enrichment {
    /// Field the result is stored under
    pub field: &'static str,
    /// Request for the sub-resource
    pub request: ApiRequest,
    /// Bucket the request draws from
    pub bucket: Bucket,
}

/// Strategy describing one upstream API
pub trait ProviderApi: Send + Sync + std::fmt::Debug {
    /// Which API this is.
    fn provider(&self) -> Provider;

    /// Whether `entity` can be collected from this API.
    fn supports(&self, entity: EntityType) -> bool;

    /// Listable endpoint for `entity` of `target` within `window`.
    fn endpoint(&self, entity: EntityType, target: &str, window: &FetchWindow) -> FetcherResult<Endpoint>;

    /// Whether listings can be narrowed to a tag set.
    fn supports_tags(&self) -> bool {
        false
    }

    /// Narrow `endpoint` to items carrying `tags` (`;`-separated).
    fn apply_tags(&self, _endpoint: &mut Endpoint, _tags: &str) {}

    /// Cheap request whose answer estimates the window's item count.
    fn preflight(&self, _endpoint: &Endpoint) -> Option<ApiRequest> {
        None
    }

    /// Read the estimate from a preflight response body.
    fn preflight_total(&self, _body: &Value) -> Option<u64> {
        None
    }

    /// Read items, has-more and total from a page body.
    fn extract_page(&self, entity: EntityType, body: &Value) -> FetcherResult<PageItems>;

    /// Whether a response signals quota exhaustion rather than another failure.
    fn is_rate_limited(&self, response: &ApiResponse) -> bool;

    /// Where this API reports quota fields.
    fn quota_extractor(&self) -> QuotaExtractor;

    /// Sign `request` with `credential`.
    fn authorize(&self, request: &mut ApiRequest, credential: &Credential);

    /// Lightweight authenticated request used for verification.
    fn verify_request(&self) -> ApiRequest;

    /// Classify the verification response.
    fn classify_verification(&self, response: &ApiResponse) -> TokenStatus;

    /// Whether a data response says the credential itself was refused.
    fn rejects_credential(&self, response: &ApiResponse) -> bool {
        response.status == 401
    }

    /// Request reporting remaining quota of `bucket` for a credential, if the API has one.
    fn probe_request(&self, _bucket: &Bucket) -> Option<ApiRequest> {
        None
    }

    /// Read quota fields for `bucket` from a probe response.
    fn parse_probe(&self, _bucket: &Bucket, _response: &ApiResponse) -> Option<QuotaFields> {
        None
    }

    /// Natural key used for upsert.
    fn natural_key(&self, entity: EntityType, item: &Value) -> Option<String>;

    /// Sub-resources fetched for `item` at `depth`.
    fn enrichments(&self, _entity: EntityType, _target: &str, _item: &Value, _depth: Depth) -> Vec<Enrichment> {
        Vec::new()
    }
}

/// Shared provider strategy.
pub type SharedApi = Arc<dyn ProviderApi>;

/// Build the strategy for `provider`.
pub fn for_provider(provider: Provider, settings: &ProviderSettings) -> Result<SharedApi, ConfigError> {
    let api: SharedApi = match provider {
        Provider::GitHub => Arc::new(GitHubApi::new(&settings.base_url)),
        Provider::Jira => {
            if settings.base_url.is_empty() {
                return Err(ConfigError::Missing("JIRA_BASE_URL".into()));
            }
            Arc::new(JiraApi::new(&settings.base_url))
        }
        Provider::StackExchange => Arc::new(StackExchangeApi::new(
            &settings.base_url,
            settings.site.as_deref().unwrap_or(stack_exchange::DEFAULT_SITE),
        )),
    };
    Ok(api)
}

/// Verifies credentials by sending the provider's probe through a transport
pub struct ApiVerifier<'a> {
    api: &'a dyn ProviderApi,
    transport: &'a dyn ApiTransport,
}

impl<'a> ApiVerifier<'a> {
    /// Verifier for `api` over `transport`.
    pub fn new(api: &'a dyn ProviderApi, transport: &'a dyn ApiTransport) -> Self {
        Self { api, transport }
    }
}

#[async_trait]
impl CredentialVerifier for ApiVerifier<'_> {
    async fn verify(&self, credential: &Credential) -> TokenStatus {
        let mut request = self.api.verify_request();
        self.api.authorize(&mut request, credential);
        match self.transport.send(&request).await {
            Ok(response) => self.api.classify_verification(&response),
            Err(e) => TokenStatus::UnknownError(e.to_string()),
        }
    }
}

/// String form of a key field that may be a JSON string or number.
pub(crate) fn key_field(item: &Value, field: &str) -> Option<String> {
    match item.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Classification shared by APIs using plain 200/401/403 semantics.
pub(crate) fn classify_by_status(
    response: &ApiResponse,
    remaining: Option<u64>,
    limit: Option<u64>,
) -> TokenStatus {
    match response.status {
        200 => TokenStatus::Valid { remaining, limit },
        401 => TokenStatus::InvalidOrExpired,
        403 => TokenStatus::InsufficientPermissions,
        status => TokenStatus::UnknownError(format!("HTTP {status}: {}", response.body_excerpt())),
    }
}
