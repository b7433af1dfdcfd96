//! Rate-limit recovery
//!
//! [`RateLimitGuard::handle`] is the single place that decides what to do when
//! an API reports quota exhaustion: switch to another credential with spare
//! quota, sleep until the quota resets, or give up. The fetcher calls it from
//! its request path and acts on the returned [`Decision`].

use crate::clock::SharedClock;
use crate::config::GuardSettings;
use crate::credentials::CredentialPool;
use crate::fetcher::provider::SharedApi;
use crate::fetcher::{ApiResponse, ApiTransport};
use crate::metrics;
use crate::quota::{format_reset, Bucket, QuotaFields, QuotaState, QuotaTracker};
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of handling a throttled response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Response was not a quota exhaustion; nothing was done
    RetryNow,
    /// Active credential switched; retry the same request
    RetriedWithNewCredential {
        /// Previous active index
        from: usize,
        /// New active index
        to: usize,
    },
    /// Slept until the quota reset; retry the same request
    WaitThenRetry {
        /// Total time slept
        waited: Duration,
    },
    /// Recovery failed
    GiveUp {
        /// Why
        reason: String,
    },
}

impl Decision {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Decision::RetryNow => "retry_now",
            Decision::RetriedWithNewCredential { .. } => "rotated",
            Decision::WaitThenRetry { .. } => "waited",
            Decision::GiveUp { .. } => "give_up",
        }
    }

    /// Human-readable summary used in job status messages.
    pub fn describe(&self) -> String {
        match self {
            Decision::RetryNow => "retrying".to_string(),
            Decision::RetriedWithNewCredential { from, to } => {
                format!("switched credential #{from} -> #{to}")
            }
            Decision::WaitThenRetry { waited } => {
                format!("waited {}s for quota reset", waited.as_secs())
            }
            Decision::GiveUp { reason } => format!("gave up: {reason}"),
        }
    }
}

/// Rotates credentials or waits out quota resets
pub struct RateLimitGuard {
    api: SharedApi,
    transport: Arc<dyn ApiTransport>,
    clock: SharedClock,
    settings: GuardSettings,
    display_offset: FixedOffset,
    /// Credentials known to be exhausted, until when
    cooldowns: HashMap<usize, DateTime<Utc>>,
}

impl RateLimitGuard {
    /// Create a guard probing through `transport`.
    pub fn new(
        api: SharedApi,
        transport: Arc<dyn ApiTransport>,
        clock: SharedClock,
        settings: GuardSettings,
        display_offset: FixedOffset,
    ) -> Self {
        Self {
            api,
            transport,
            clock,
            settings,
            display_offset,
            cooldowns: HashMap::new(),
        }
    }

    /// Tunables in effect.
    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    /// Throttling status plus a corroborating body/header reason.
    pub fn is_exhausted(&self, response: &ApiResponse) -> bool {
        self.api.is_rate_limited(response)
    }

    /// Decide and carry out recovery for `response` on `bucket`.
    ///
    /// May change the pool's active credential and may sleep. Never touches
    /// already-fetched data.
    pub async fn handle(
        &mut self,
        response: &ApiResponse,
        bucket: &Bucket,
        pool: &mut CredentialPool,
        tracker: &mut QuotaTracker,
    ) -> Decision {
        if !self.is_exhausted(response) {
            return Decision::RetryNow;
        }

        let now = self.clock.now();
        let fields = self.api.quota_extractor().extract(response, now);
        let hinted = fields.reset_at.is_some() || fields.retry_after.is_some();
        let mut state = tracker.apply(fields, bucket, now);
        // The response says exhausted even if the headers omitted remaining.
        if !state.is_exhausted() {
            state = tracker.apply(
                QuotaFields {
                    remaining: Some(0),
                    ..Default::default()
                },
                bucket,
                now,
            );
        }

        warn!(
            provider = %self.api.provider(),
            bucket = bucket.name,
            credential = pool.active_index(),
            status = response.status,
            reset = %format_reset(&state, now, self.display_offset),
            "Rate limit exhausted"
        );

        let decision = if bucket.is_per_credential() && pool.has_alternative() {
            self.cooldowns.insert(pool.active_index(), state.reset_at);
            match self.find_alternative(bucket, pool).await {
                Some(to) => {
                    let from = pool.active_index();
                    pool.select(to);
                    tracker.reset();
                    metrics::record_credential_rotation(self.api.provider());
                    info!(
                        provider = %self.api.provider(),
                        bucket = bucket.name,
                        from,
                        to,
                        "Switched to credential with spare quota"
                    );
                    Decision::RetriedWithNewCredential { from, to }
                }
                None => {
                    info!(
                        provider = %self.api.provider(),
                        bucket = bucket.name,
                        "No credential has spare quota, waiting for reset"
                    );
                    self.wait(bucket, pool, tracker, state, hinted).await
                }
            }
        } else {
            self.wait(bucket, pool, tracker, state, hinted).await
        };

        metrics::record_rate_limit_event(self.api.provider(), bucket.name, decision.label());
        decision
    }

    /// Index of the best other credential, or `None` when none has quota.
    ///
    /// With a probe: the first credential above the usability threshold wins
    /// immediately, otherwise the one with the most non-zero quota. Without a
    /// probe: the first credential not cooling down.
    async fn find_alternative(&self, bucket: &Bucket, pool: &CredentialPool) -> Option<usize> {
        let now = self.clock.now();
        let mut best: Option<(usize, u64)> = None;

        for index in pool.others() {
            let Some(credential) = pool.get(index) else {
                continue;
            };

            let Some(mut request) = self.api.probe_request(bucket) else {
                let cooling = self.cooldowns.get(&index).is_some_and(|until| *until > now);
                if cooling {
                    continue;
                }
                return Some(index);
            };

            self.api.authorize(&mut request, credential);
            let remaining = match self.transport.send(&request).await {
                Ok(response) => match self.api.parse_probe(bucket, &response) {
                    Some(fields) => fields.remaining.unwrap_or(0),
                    None => {
                        debug!(credential = index, status = response.status, "Quota probe unreadable");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(credential = index, error = %e, "Quota probe failed");
                    continue;
                }
            };

            debug!(credential = index, remaining, bucket = bucket.name, "Probed credential");
            if remaining > self.settings.min_usable_quota {
                return Some(index);
            }
            if remaining > 0 && best.is_none_or(|(_, r)| remaining > r) {
                best = Some((index, remaining));
            }
        }

        best.map(|(index, _)| index)
    }

    /// Sleep until reset plus the safety margin, then re-probe once.
    async fn wait(
        &mut self,
        bucket: &Bucket,
        pool: &CredentialPool,
        tracker: &mut QuotaTracker,
        mut state: QuotaState,
        hinted: bool,
    ) -> Decision {
        let now = self.clock.now();
        let base = if hinted {
            state.until_reset(now)
        } else {
            match self.probe_current(bucket, pool).await {
                Err(reason) => return Decision::GiveUp { reason },
                Ok(Some(fields)) => {
                    state = tracker.apply(fields, bucket, now);
                    if state.is_exhausted() {
                        state.until_reset(now)
                    } else {
                        self.settings.fallback_wait
                    }
                }
                Ok(None) => self.settings.fallback_wait,
            }
        };
        let wait = base + self.settings.safety_margin;

        info!(
            provider = %self.api.provider(),
            bucket = bucket.name,
            wait_secs = wait.as_secs(),
            reset = %format_reset(&state, now, self.display_offset),
            "Waiting for quota reset"
        );
        self.clock.sleep(wait).await;
        let mut waited = wait;

        match self.probe_current(bucket, pool).await {
            Err(reason) => return Decision::GiveUp { reason },
            Ok(Some(fields)) => {
                let after = tracker.apply(fields, bucket, self.clock.now());
                if after.is_exhausted() {
                    debug!(
                        bucket = bucket.name,
                        recheck_secs = self.settings.recheck_delay.as_secs(),
                        "Quota still empty after reset, waiting once more"
                    );
                    self.clock.sleep(self.settings.recheck_delay).await;
                    waited += self.settings.recheck_delay;
                }
            }
            Ok(None) => {}
        }

        self.cooldowns.remove(&pool.active_index());
        metrics::record_rate_limit_wait(self.api.provider(), bucket.name, waited);
        Decision::WaitThenRetry { waited }
    }

    /// Probe the active credential. `Ok(None)` when the API has no probe.
    async fn probe_current(
        &self,
        bucket: &Bucket,
        pool: &CredentialPool,
    ) -> Result<Option<QuotaFields>, String> {
        let Some(mut request) = self.api.probe_request(bucket) else {
            return Ok(None);
        };
        self.api.authorize(&mut request, pool.current());
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| format!("quota probe failed: {e}"))?;
        self.api
            .parse_probe(bucket, &response)
            .map(Some)
            .ok_or_else(|| format!("quota probe returned HTTP {}", response.status))
    }
}

impl std::fmt::Debug for RateLimitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitGuard")
            .field("provider", &self.api.provider())
            .field("settings", &self.settings)
            .field("cooldowns", &self.cooldowns.len())
            .finish()
    }
}
