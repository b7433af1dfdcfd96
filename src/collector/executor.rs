//! Collection orchestrator
//!
//! Runs one job sequentially: resume point, windows, pages, items. A window
//! is checkpointed only after every one of its pages was fetched and every
//! item upserted; any abnormal termination stops the job with that window
//! left unrecorded so the next run redoes it.

use super::job::{CollectionJob, JobProgress, JobReport, JobStatus};
use super::progress::{StatusSink, WindowProgress};
use super::window::{split, FetchWindow};
use super::CollectError;
use crate::config::MAX_PAGE_SIZE;
use crate::fetcher::pagination::FetchStats;
use crate::fetcher::provider::Endpoint;
use crate::fetcher::{FetcherError, PaginatedFetcher};
use crate::metrics::{self, JobMetrics};
use crate::resume::ProgressCheckpoint;
use crate::shutdown::{self, SharedShutdown};
use crate::store::RecordStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Drives collection jobs for one provider
pub struct CollectionOrchestrator {
    fetcher: PaginatedFetcher,
    checkpoint: ProgressCheckpoint,
    store: Box<dyn RecordStore>,
    status: Arc<dyn StatusSink>,
    shutdown: Option<SharedShutdown>,
    page_size: u32,
    initialized: bool,
    stats_baseline: FetchStats,
}

impl CollectionOrchestrator {
    /// Orchestrator fetching through `fetcher`, persisting into `store`.
    pub fn new(
        fetcher: PaginatedFetcher,
        checkpoint: ProgressCheckpoint,
        store: Box<dyn RecordStore>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            fetcher,
            checkpoint,
            store,
            status,
            shutdown: shutdown::get_global_shutdown(),
            page_size: MAX_PAGE_SIZE,
            initialized: false,
            stats_baseline: FetchStats::default(),
        }
    }

    /// Attach a shared shutdown handle checked at window boundaries.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Items requested per page, capped at the API maximum.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Fetcher in use.
    pub fn fetcher(&self) -> &PaginatedFetcher {
        &self.fetcher
    }

    /// Checkpoint bookkeeping in use.
    pub fn checkpoint(&self) -> &ProgressCheckpoint {
        &self.checkpoint
    }

    /// Record store in use.
    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    /// Publish a pending report for `job` without running it.
    pub fn announce(&self, job: &CollectionJob) {
        self.status.publish(&job.report("queued"));
    }

    /// Run `job` to completion.
    ///
    /// # Errors
    ///
    /// Any [`CollectError`]; the job status is set to `FAILURE` and a report
    /// carrying the error classification is published before returning.
    pub async fn run(&mut self, job: &mut CollectionJob) -> Result<JobReport, CollectError> {
        let span = tracing::info_span!(
            "collection_job",
            job_id = %job.id(),
            provider = %job.provider,
            entity = %job.entity,
            target = %job.target,
        );
        self.run_job(job).instrument(span).await
    }

    async fn run_job(&mut self, job: &mut CollectionJob) -> Result<JobReport, CollectError> {
        let job_metrics = JobMetrics::start(job.id());

        match self.execute(job).await {
            Ok(()) => {
                job.status = JobStatus::Success;
                let report = job.report(format!(
                    "completed: {} windows, {} records upserted, {} items skipped",
                    job.progress.windows_completed,
                    job.progress.records_upserted,
                    job.progress.items_skipped
                ));
                self.status.publish(&report);
                job_metrics.record_success(job.progress.records_upserted);
                Ok(report)
            }
            Err(e) => {
                job.status = JobStatus::Failure;
                let message = e.to_string();
                let mut report = job.report(format!("failed: {message}"));
                report.error = Some(message.clone());
                report.error_type = Some(e.kind().to_string());
                self.status.publish(&report);
                job_metrics.record_failure(e.kind(), &message);
                Err(e)
            }
        }
    }

    async fn execute(&mut self, job: &mut CollectionJob) -> Result<(), CollectError> {
        job.validate()?;

        let api = self.fetcher.api().clone();
        if job.provider != api.provider() {
            return Err(CollectError::Configuration(format!(
                "job targets {} but the fetcher is configured for {}",
                job.provider,
                api.provider()
            )));
        }
        if !api.supports(job.entity) {
            return Err(CollectError::Configuration(format!(
                "{} does not provide {}",
                job.provider, job.entity
            )));
        }
        if job.tagged.is_some() && !api.supports_tags() {
            return Err(CollectError::Configuration(format!(
                "{} listings cannot be filtered by tag",
                job.provider
            )));
        }

        job.status = JobStatus::Started;
        job.progress = JobProgress::default();
        self.stats_baseline = self.fetcher.stats().clone();
        self.publish(job, "starting");

        if !self.initialized {
            let statuses = self.fetcher.initialize().await?;
            self.initialized = true;
            info!(
                credentials = statuses.len(),
                valid = statuses.iter().filter(|s| s.is_valid()).count(),
                active = self.fetcher.pool().active_index(),
                "Credentials verified"
            );
        }

        let effective_start = self.checkpoint.resume_point(job)?;
        if effective_start != job.start_date {
            info!(resume_from = ?effective_start, "Resuming from checkpoint");
        }
        if let (Some(start), Some(end)) = (effective_start, job.end_date) {
            if start > end {
                info!(end = %end, "All windows already checkpointed");
                return Ok(());
            }
        }

        let windows = split(effective_start, job.end_date, job.interval_days)?;
        let total = windows.len();
        job.progress.windows_total = Some(total as u64);
        info!(windows = total, "Collecting");

        for (i, window) in windows.enumerate() {
            if let Some(reason) = self.shutdown_reason() {
                info!(window = %window, reason = %reason, "Shutdown requested, stopping at window boundary");
                return Err(CollectError::Cancelled(format!(
                    "{reason}; stopped before window {window}, resume continues from there"
                )));
            }
            self.collect_window(job, &window, i + 1, total).await?;
        }

        Ok(())
    }

    async fn collect_window(
        &mut self,
        job: &mut CollectionJob,
        window: &FetchWindow,
        index: usize,
        total: usize,
    ) -> Result<(), CollectError> {
        let entity = job.entity;
        let failed = |last_successful_page: u32, source: FetcherError| CollectError::WindowFailed {
            entity,
            window: *window,
            last_successful_page,
            source,
        };

        let api = self.fetcher.api().clone();
        let mut endpoint = api
            .endpoint(job.entity, &job.target, window)
            .map_err(|source| failed(0, source))?;
        if let Some(tags) = &job.tagged {
            api.apply_tags(&mut endpoint, tags);
        }

        let phase = format!("window {index}/{total} {window}");
        let estimate = self.fetcher.preflight(&endpoint).await;
        self.publish_decisions(job);
        self.publish(
            job,
            match estimate {
                Some(n) => format!("{phase}: starting, ~{n} items expected"),
                None => format!("{phase}: starting"),
            },
        );
        info!(
            window_start = ?window.start,
            window_end = ?window.end,
            estimate = ?estimate,
            "Window started"
        );

        let mut progress = WindowProgress::new(phase.clone(), estimate);
        let mut records = 0u64;
        let mut skipped_pages = 0usize;
        let mut last_page = 0u32;
        let mut next = Some(1u32);

        while let Some(number) = next {
            let page = match self.fetcher.fetch_page(&endpoint, number, self.page_size).await {
                Ok(page) => page,
                Err(source) => {
                    self.sync_stats(job);
                    self.publish_decisions(job);
                    warn!(
                        window_start = ?window.start,
                        window_end = ?window.end,
                        page = number,
                        error = %source,
                        "Window aborted, not checkpointed"
                    );
                    return Err(failed(last_page, source));
                }
            };
            self.publish_decisions(job);

            progress.update(page.items.len() as u64);
            job.progress.pages_fetched += 1;
            if let Some(skipped) = &page.skipped {
                let entry = format!("{window} page {} (HTTP {})", page.number, skipped.status);
                warn!(skipped = %entry, "Page skipped, window continues without it");
                job.progress.items_skipped += 1;
                job.progress.skipped_pages.push(entry);
                skipped_pages += 1;
            }

            for item in page.items.iter() {
                let Some(key) = api.natural_key(job.entity, item) else {
                    job.progress.items_skipped += 1;
                    warn!(page = page.number, "Item without natural key skipped");
                    continue;
                };

                let record = match self.enrich(job, &endpoint, item.clone()).await {
                    Ok(record) => record,
                    Err(source) => {
                        self.sync_stats(job);
                        self.publish_decisions(job);
                        return Err(failed(last_page, source));
                    }
                };

                self.store.upsert(job.entity, &key, &record)?;
                records += 1;
                job.progress.records_upserted += 1;
            }

            last_page = page.number;
            next = page.next_number();
            self.sync_stats(job);
            self.publish(job, progress.format_progress());
        }

        self.store.flush()?;
        self.checkpoint.record(job, window, records)?;
        job.progress.windows_completed += 1;
        if let Some(end) = window.end {
            job.progress.last_completed_window = Some(end);
        }
        metrics::record_window_completed(job.provider, job.entity, records);

        info!(
            window_start = ?window.start,
            window_end = ?window.end,
            pages = last_page,
            records,
            skipped_pages,
            "Window completed"
        );
        let skipped = &job.progress.skipped_pages[job.progress.skipped_pages.len() - skipped_pages..];
        let operation = if skipped.is_empty() {
            format!("{phase}: completed, {records} records")
        } else {
            format!(
                "{phase}: completed, {records} records, skipped {}",
                skipped.join(", ")
            )
        };
        self.publish(job, operation);
        Ok(())
    }

    /// Attach the sub-resources the job's depth asks for to `item`.
    ///
    /// Upstream errors drop the sub-resource; throttling and network failures
    /// abort the window.
    async fn enrich(
        &mut self,
        job: &mut CollectionJob,
        endpoint: &Endpoint,
        mut item: Value,
    ) -> Result<Value, FetcherError> {
        let enrichments = self
            .fetcher
            .api()
            .enrichments(job.entity, &job.target, &item, job.depth);
        for enrichment in enrichments {
            match self.fetcher.fetch_json(&enrichment.request, &enrichment.bucket).await {
                Ok(value) => {
                    if let Value::Object(fields) = &mut item {
                        fields.insert(enrichment.field.to_string(), value);
                    }
                }
                Err(FetcherError::UpstreamApi { status, message }) => {
                    job.progress.items_skipped += 1;
                    warn!(
                        entity = %endpoint.entity,
                        field = enrichment.field,
                        status,
                        "Enrichment skipped after upstream error: {message}"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(item)
    }

    fn publish(&self, job: &CollectionJob, operation: impl Into<String>) {
        let report = job.report(operation);
        debug!(operation = %report.operation, "Status");
        self.status.publish(&report);
    }

    fn publish_decisions(&mut self, job: &mut CollectionJob) {
        for decision in self.fetcher.take_decisions() {
            self.sync_stats(job);
            self.publish(job, format!("rate limit: {}", decision.describe()));
        }
    }

    fn sync_stats(&self, job: &mut CollectionJob) {
        let stats = self.fetcher.stats();
        job.progress.api_requests = stats.api_requests - self.stats_baseline.api_requests;
        job.progress.rotations = stats.rotations - self.stats_baseline.rotations;
        job.progress.waits = stats.waits - self.stats_baseline.waits;
    }

    fn shutdown_reason(&self) -> Option<String> {
        let shutdown = self.shutdown.as_ref().filter(|s| s.is_shutdown_requested())?;
        Some(shutdown.reason().unwrap_or_else(|| "stop requested".to_string()))
    }
}

impl std::fmt::Debug for CollectionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionOrchestrator")
            .field("fetcher", &self.fetcher)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
