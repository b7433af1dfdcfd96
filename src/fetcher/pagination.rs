//! Rate-limit aware paginated fetching
//!
//! [`PaginatedFetcher`] owns one job's credential pool and quota tracker and is
//! the only component that sends API requests on the job's behalf:
//! - transient failures (timeouts, connection errors, 5xx) are retried a fixed
//!   number of times with a fixed delay
//! - throttled responses go to the [`RateLimitGuard`] and the same request is
//!   retried after it rotates or waits
//! - pages are requested strictly in increasing order until a short page or an
//!   explicit "no more" signal
//!
//! Includes a maximum page limit to stop runaway pagination.

use super::provider::{self, ApiVerifier, Endpoint, SharedApi};
use super::retry_formatter::{RetryContext, RetryErrorType};
use super::{ApiRequest, ApiResponse, ApiTransport, FetcherError, FetcherResult, ReqwestTransport};
use crate::clock::{SharedClock, SystemClock};
use crate::collector::{CollectError, Decision, RateLimitGuard};
use crate::config::{GuardSettings, HttpSettings, MinerConfig};
use crate::credentials::{CredentialError, CredentialPool, Rotation, TokenStatus};
use crate::metrics::{self, HttpRequestMetrics};
use crate::quota::{Bucket, QuotaState, QuotaTracker};
use crate::Provider;
use chrono::FixedOffset;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum number of pages fetched for one window
pub const MAX_PAGES: u32 = 10_000;

/// A page the API refused with a non-throttling error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPage {
    /// HTTP status
    pub status: u16,
    /// Truncated response body
    pub message: String,
}

/// One fetched page
#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based page number
    pub number: u32,
    /// Items in API order
    pub items: Vec<Value>,
    /// Whether another page should be requested
    pub has_more: bool,
    /// Total matching items, when reported
    pub total: Option<u64>,
    /// Set when the page was skipped after an upstream error
    pub skipped: Option<SkippedPage>,
}

impl Page {
    /// Number of the page to request next, if any.
    pub fn next_number(&self) -> Option<u32> {
        self.has_more.then_some(self.number + 1)
    }
}

/// Lazy sequence of pages for one endpoint
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = FetcherResult<Page>> + Send + 'a>>;

/// Request counters for one fetcher
#[derive(Debug, Clone, Default)]
pub struct FetchStats {
    /// Requests sent, including transient retries; rate-limit guard quota
    /// checks are not counted
    pub api_requests: u64,
    /// Credential switches (guard-driven and proactive)
    pub rotations: u64,
    /// Quota-reset waits
    pub waits: u64,
}

/// Sends a job's requests and walks paginated endpoints
pub struct PaginatedFetcher {
    api: SharedApi,
    transport: Arc<dyn ApiTransport>,
    clock: SharedClock,
    guard: RateLimitGuard,
    guard_settings: GuardSettings,
    http: HttpSettings,
    display_offset: FixedOffset,
    pool: CredentialPool,
    tracker: QuotaTracker,
    stats: FetchStats,
    decisions: Vec<Decision>,
}

impl PaginatedFetcher {
    /// Fetcher for `api` sending through `transport` with `pool`'s credentials.
    pub fn new(api: SharedApi, transport: Arc<dyn ApiTransport>, pool: CredentialPool) -> Self {
        let clock = SystemClock::shared();
        let guard_settings = GuardSettings::default();
        let display_offset = MinerConfig::default().display_offset;
        let guard = RateLimitGuard::new(
            api.clone(),
            transport.clone(),
            clock.clone(),
            guard_settings.clone(),
            display_offset,
        );
        Self {
            api,
            transport,
            clock,
            guard,
            guard_settings,
            http: HttpSettings::default(),
            display_offset,
            pool,
            tracker: QuotaTracker::new(),
            stats: FetchStats::default(),
            decisions: Vec::new(),
        }
    }

    /// Production fetcher for `provider` built from configuration.
    pub fn from_config(config: &MinerConfig, provider: Provider) -> Result<Self, CollectError> {
        let settings = config.provider(provider)?;
        let pool = CredentialPool::for_provider(provider, settings)?;
        let api = provider::for_provider(provider, settings)?;
        let transport = ReqwestTransport::new(&config.http)
            .map_err(|e| CollectError::Configuration(e.to_string()))?;

        Ok(Self::new(api, Arc::new(transport), pool)
            .with_http_settings(config.http.clone())
            .with_guard_settings(config.guard.clone())
            .with_display_offset(config.display_offset))
    }

    /// Replace the clock used for sleeps and reset arithmetic.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self.rebuild_guard();
        self
    }

    /// Replace the rate-limit guard tunables.
    pub fn with_guard_settings(mut self, settings: GuardSettings) -> Self {
        self.guard_settings = settings;
        self.rebuild_guard();
        self
    }

    /// Replace the transient retry settings.
    pub fn with_http_settings(mut self, settings: HttpSettings) -> Self {
        self.http = settings;
        self
    }

    /// Offset used when logging reset times.
    pub fn with_display_offset(mut self, offset: FixedOffset) -> Self {
        self.display_offset = offset;
        self.rebuild_guard();
        self
    }

    fn rebuild_guard(&mut self) {
        self.guard = RateLimitGuard::new(
            self.api.clone(),
            self.transport.clone(),
            self.clock.clone(),
            self.guard_settings.clone(),
            self.display_offset,
        );
    }

    /// Provider strategy.
    pub fn api(&self) -> &SharedApi {
        &self.api
    }

    /// Provider this fetcher talks to.
    pub fn provider(&self) -> Provider {
        self.api.provider()
    }

    /// Credential pool.
    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Latest quota snapshot for `bucket` of the active credential.
    pub fn quota(&self, bucket: &str) -> Option<&QuotaState> {
        self.tracker.current(bucket)
    }

    /// Request counters.
    pub fn stats(&self) -> &FetchStats {
        &self.stats
    }

    /// Drain rate-limit decisions made since the last call.
    pub fn take_decisions(&mut self) -> Vec<Decision> {
        std::mem::take(&mut self.decisions)
    }

    /// Verify every credential and activate the one with the most quota.
    pub async fn initialize(&mut self) -> Result<Vec<TokenStatus>, CredentialError> {
        let verifier = ApiVerifier::new(self.api.as_ref(), self.transport.as_ref());
        let statuses = self.pool.initialize(&verifier).await?;
        self.tracker.reset();
        Ok(statuses)
    }

    /// Verify every credential without changing the active one.
    pub async fn verify_all(&self) -> Vec<TokenStatus> {
        let verifier = ApiVerifier::new(self.api.as_ref(), self.transport.as_ref());
        let mut statuses = Vec::with_capacity(self.pool.len());
        for credential in self.pool.iter() {
            statuses.push(crate::credentials::CredentialVerifier::verify(&verifier, credential).await);
        }
        statuses
    }

    /// Send `request` drawing from `bucket`, recovering from throttling.
    ///
    /// # Errors
    ///
    /// - [`FetcherError::TransientNetwork`] when transient retries run out
    /// - [`FetcherError::RateLimitExhausted`] when the guard gives up
    /// - [`FetcherError::CredentialRejected`] when the API refuses the active
    ///   credential and no other usable one is left
    /// - [`FetcherError::UpstreamApi`] for any other non-2xx response
    pub async fn send(&mut self, request: &ApiRequest, bucket: &Bucket) -> FetcherResult<ApiResponse> {
        let mut recoveries = 0u32;

        loop {
            let response = self.send_with_retries(request).await?;

            if response.is_success() {
                let now = self.clock.now();
                let state = self
                    .tracker
                    .update(&response, self.api.quota_extractor(), bucket, now);
                metrics::record_quota(self.provider(), &state, now, self.display_offset);
                self.after_success(&state, bucket).await;
                return Ok(response);
            }

            if self.api.is_rate_limited(&response) {
                recoveries += 1;
                if recoveries > self.guard_settings.max_recoveries {
                    return Err(FetcherError::RateLimitExhausted {
                        bucket: bucket.name.to_string(),
                        reason: format!(
                            "still throttled after {} recoveries",
                            self.guard_settings.max_recoveries
                        ),
                    });
                }

                let decision = self
                    .guard
                    .handle(&response, bucket, &mut self.pool, &mut self.tracker)
                    .await;
                match &decision {
                    Decision::RetriedWithNewCredential { .. } => self.stats.rotations += 1,
                    Decision::WaitThenRetry { .. } => self.stats.waits += 1,
                    _ => {}
                }
                self.decisions.push(decision.clone());

                if let Decision::GiveUp { reason } = decision {
                    return Err(FetcherError::RateLimitExhausted {
                        bucket: bucket.name.to_string(),
                        reason,
                    });
                }
                continue;
            }

            if self.api.rejects_credential(&response) {
                let rejected = self.pool.active_index();
                self.pool.mark_rejected(rejected);
                match self.pool.rotate() {
                    Rotation::Switched { from, to } => {
                        self.tracker.reset();
                        self.stats.rotations += 1;
                        metrics::record_credential_rotation(self.provider());
                        warn!(
                            provider = %self.provider(),
                            status = response.status,
                            from,
                            to,
                            "Credential rejected mid-run, retrying with next usable credential"
                        );
                        self.decisions
                            .push(Decision::RetriedWithNewCredential { from, to });
                        continue;
                    }
                    Rotation::NoAlternative => {
                        return Err(FetcherError::CredentialRejected {
                            credential: rejected,
                            status: response.status,
                        });
                    }
                }
            }

            return Err(FetcherError::UpstreamApi {
                status: response.status,
                message: response.body_excerpt(),
            });
        }
    }

    /// Transport send with fixed-delay retries on failures below HTTP and on 5xx.
    async fn send_with_retries(&mut self, request: &ApiRequest) -> FetcherResult<ApiResponse> {
        let max_attempts = self.http.transient_retries + 1;
        let mut last: Option<RetryContext> = None;

        for attempt in 0..max_attempts {
            let mut signed = request.clone();
            self.api.authorize(&mut signed, self.pool.current());

            let request_metrics = HttpRequestMetrics::start(self.provider(), &request.url, attempt + 1);
            self.stats.api_requests += 1;

            let (error_type, message) = match self.transport.send(&signed).await {
                Ok(response) if !response.is_server_error() => {
                    request_metrics.record_complete(response.status);
                    if let Some(ctx) = &last {
                        info!("{}", RetryContext { attempt: attempt + 1, ..ctx.clone() }.format_success());
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    request_metrics.record_complete(response.status);
                    (
                        RetryErrorType::from_status(response.status),
                        format!("HTTP {}: {}", response.status, response.body_excerpt()),
                    )
                }
                Err(e) => {
                    request_metrics.record_transport_error();
                    (RetryErrorType::from_transport(&e), e.to_string())
                }
            };

            let ctx = RetryContext::new(
                attempt + 1,
                max_attempts,
                error_type,
                self.http.transient_delay,
                request.url.clone(),
                message,
            );

            if attempt + 1 < max_attempts {
                warn!("{}", ctx.format_retry());
                self.clock.sleep(self.http.transient_delay).await;
            } else {
                warn!("{}", ctx.format_failure());
            }
            last = Some(ctx);
        }

        Err(FetcherError::TransientNetwork {
            attempts: max_attempts,
            message: last.map(|ctx| ctx.error_message).unwrap_or_default(),
        })
    }

    /// Honor API backoff hints and rotate away from a drained credential early.
    async fn after_success(&mut self, state: &QuotaState, bucket: &Bucket) {
        if let Some(backoff) = state.retry_after.filter(|d| !d.is_zero()) {
            debug!(backoff_secs = backoff.as_secs(), "API requested backoff");
            self.clock.sleep(backoff).await;
        }

        if state.is_exhausted() && bucket.is_per_credential() {
            if let Rotation::Switched { from, to } = self.pool.rotate() {
                self.tracker.reset();
                self.stats.rotations += 1;
                metrics::record_credential_rotation(self.provider());
                info!(
                    provider = %self.provider(),
                    bucket = bucket.name,
                    from,
                    to,
                    "Credential drained, rotating before next request"
                );
                self.decisions
                    .push(Decision::RetriedWithNewCredential { from, to });
            }
        }
    }

    /// GET `request` and parse the body as JSON.
    pub async fn fetch_json(&mut self, request: &ApiRequest, bucket: &Bucket) -> FetcherResult<Value> {
        self.send(request, bucket).await?.json()
    }

    /// Best-effort item count estimate for a window; failures are ignored.
    pub async fn preflight(&mut self, endpoint: &Endpoint) -> Option<u64> {
        let request = self.api.preflight(endpoint)?;
        match self.fetch_json(&request, &endpoint.bucket).await {
            Ok(body) => self.api.preflight_total(&body),
            Err(e) => {
                debug!(error = %e, "Preflight count failed");
                None
            }
        }
    }

    /// Fetch 1-based page `number` of `endpoint`.
    ///
    /// An upstream (non-throttling) error yields an empty page marked
    /// [`Page::skipped`] with `has_more = false`.
    pub async fn fetch_page(&mut self, endpoint: &Endpoint, number: u32, page_size: u32) -> FetcherResult<Page> {
        if number > MAX_PAGES {
            return Err(FetcherError::TooManyPages(MAX_PAGES));
        }
        let request = endpoint.page_request(number, page_size);
        let body = match self.fetch_json(&request, &endpoint.bucket).await {
            Ok(body) => body,
            Err(FetcherError::UpstreamApi { status, message }) => {
                warn!(
                    provider = %self.provider(),
                    entity = %endpoint.entity,
                    page = number,
                    status,
                    "Skipping page after upstream error: {message}"
                );
                return Ok(Page {
                    number,
                    items: Vec::new(),
                    has_more: false,
                    total: None,
                    skipped: Some(SkippedPage { status, message }),
                });
            }
            Err(e) => return Err(e),
        };

        let extracted = self.api.extract_page(endpoint.entity, &body)?;
        let full = extracted.items.len() as u64 >= u64::from(page_size);
        let has_more = !endpoint.is_single() && full && extracted.has_more.unwrap_or(true);

        debug!(
            entity = %endpoint.entity,
            page = number,
            items = extracted.items.len(),
            has_more,
            "Fetched page"
        );

        Ok(Page {
            number,
            items: extracted.items,
            has_more,
            total: extracted.total,
            skipped: None,
        })
    }

    /// Lazily fetch every page of `endpoint`, starting from page 1.
    ///
    /// The stream ends after the last page or after the first error.
    pub fn fetch_all<'a>(&'a mut self, endpoint: &'a Endpoint, page_size: u32) -> PageStream<'a> {
        Box::pin(stream::unfold(Some((self, 1u32)), move |state| async move {
            let (fetcher, number) = state?;
            match fetcher.fetch_page(endpoint, number, page_size).await {
                Ok(page) => {
                    let next = page.next_number().map(|n| (fetcher, n));
                    Some((Ok(page), next))
                }
                Err(e) => Some((Err(e), None)),
            }
        }))
    }

    /// Fetch every page of `endpoint` and concatenate the items.
    pub async fn collect_all(&mut self, endpoint: &Endpoint, page_size: u32) -> FetcherResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut pages = self.fetch_all(endpoint, page_size);
        while let Some(page) = pages.next().await {
            items.extend(page?.items);
        }
        Ok(items)
    }
}

impl std::fmt::Debug for PaginatedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedFetcher")
            .field("provider", &self.provider())
            .field("pool", &self.pool)
            .field("stats", &self.stats)
            .finish()
    }
}
