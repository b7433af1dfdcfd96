//! HTTP transport, provider strategies and pagination

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

pub mod http;
pub mod mock;
pub mod pagination;
pub mod provider;
pub mod retry_formatter;

pub use http::ReqwestTransport;
pub use mock::MockTransport;
pub use pagination::{Page, PageStream, PaginatedFetcher, SkippedPage};

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// Every rate-limit recovery path failed
    #[error("rate limit exhausted on bucket {bucket}: {reason}")]
    RateLimitExhausted {
        /// Bucket that could not be recovered
        bucket: String,
        /// Why the guard gave up
        reason: String,
    },

    /// Connection failures, timeouts or 5xx responses outlasted the retries
    #[error("transient network error after {attempts} attempts: {message}")]
    TransientNetwork {
        /// Attempts made
        attempts: u32,
        /// Last failure
        message: String,
    },

    /// Non-2xx response not attributable to rate limiting
    #[error("upstream API error {status}: {message}")]
    UpstreamApi {
        /// HTTP status
        status: u16,
        /// Truncated response body
        message: String,
    },

    /// The active credential was refused and no usable credential remains
    #[error("credential #{credential} rejected (HTTP {status}) and no usable credential remains")]
    CredentialRejected {
        /// Pool index of the refused credential
        credential: usize,
        /// HTTP status of the refusal
        status: u16,
    },

    /// Response body did not have the expected shape
    #[error("parse error: {0}")]
    ParseError(String),

    /// Pagination guard tripped
    #[error("max pages ({0}) exceeded - possible infinite pagination")]
    TooManyPages(u32),

    /// Entity not offered by the provider
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Failure below the HTTP layer
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Request or connect timeout
    #[error("timeout: {0}")]
    Timeout(String),

    /// Connection refused, DNS failure, TLS failure
    #[error("connection failed: {0}")]
    Connect(String),

    /// Anything else (body read, redirect loop, ...)
    #[error("request failed: {0}")]
    Other(String),
}

/// How a request is authenticated
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Auth {
    /// Unauthenticated
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// HTTP Basic
    Basic {
        /// Account identity
        username: String,
        /// API token
        password: String,
    },
    /// Secrets passed as query parameters
    Query(Vec<(String, String)>),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Auth::Basic { username, .. } => write!(f, "Basic({username}:<redacted>)"),
            Auth::Query(params) => {
                let names: Vec<_> = params.iter().map(|(k, _)| k.as_str()).collect();
                write!(f, "Query({names:?})")
            }
        }
    }
}

/// Outbound GET request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiRequest {
    /// Absolute URL without query string
    pub url: String,
    /// Query parameters in insertion order
    pub query: Vec<(String, String)>,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// Authentication, filled in by the provider at send time
    pub auth: Auth,
}

impl ApiRequest {
    /// GET `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Replace any existing value of `key`, or append it.
    pub fn set_query(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.query.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.query.push((key.to_string(), value)),
        }
    }

    /// First value of query parameter `key`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Response as seen by the rest of the crate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status
    pub status: u16,
    /// Headers with lowercased names
    pub headers: HashMap<String, String>,
    /// Raw body
    pub body: String,
}

impl ApiResponse {
    /// Response with no headers.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Add a header; the name is lowercased.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 5xx
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> FetcherResult<Value> {
        serde_json::from_str(&self.body)
            .map_err(|e| FetcherError::ParseError(format!("invalid JSON body: {e}")))
    }

    /// Case-insensitive substring search in the body.
    pub fn body_mentions(&self, needle: &str) -> bool {
        self.body.to_lowercase().contains(&needle.to_lowercase())
    }

    /// Body shortened for error messages.
    pub fn body_excerpt(&self) -> String {
        const MAX: usize = 200;
        if self.body.chars().count() <= MAX {
            self.body.clone()
        } else {
            let head: String = self.body.chars().take(MAX).collect();
            format!("{head}...")
        }
    }
}

/// Sends one request and returns whatever the server answered
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Send `request`. Non-2xx statuses are `Ok`; only failures below HTTP are `Err`.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}
