//! One feed's synchronization engine: the refresh loop that keeps the live
//! store current, and the read surface served from it.
//!
//! A cycle fetches and decodes the feed, resolves each record through the
//! correlation cache (falling back to the directory), then merges record by
//! record into the store. Network calls are made outside every lock, and a
//! failed fetch or decode leaves the store exactly as the previous cycle
//! left it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::time::{MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::FeedSettings;
use crate::correlation::CorrelationCache;
use crate::decode::FeedDecoder;
use crate::error::{FeedError, QueryError};
use crate::fetch::FeedTransport;
use crate::metrics::{CycleObserver, FeedMetrics};
use crate::model::{EnrichmentRecord, FeedRecord, MergedRecord};
use crate::query::{RecordFilter, parse_timestamp};
use crate::services::directory_api::EnrichmentClient;
use crate::stats::CycleReport;
use crate::store::{LiveRecordStore, Upsert};

/// Collaborators and options for a [`FeedEngine`].
pub struct FeedEngineBuilder {
    settings: FeedSettings,
    decoder: Arc<dyn FeedDecoder>,
    transport: Arc<dyn FeedTransport>,
    directory: Arc<dyn EnrichmentClient>,
    timezone: Tz,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn CycleObserver>,
    correlation_ttl: Option<Duration>,
}

impl FeedEngineBuilder {
    pub fn timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn CycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn correlation_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.correlation_ttl = ttl;
        self
    }

    pub fn build(self) -> FeedEngine {
        let store = Arc::new(LiveRecordStore::new(Arc::clone(&self.clock)));
        let correlation = CorrelationCache::new(
            Arc::clone(&store),
            Arc::clone(&self.clock),
            self.correlation_ttl,
        );

        FeedEngine {
            enabled: AtomicBool::new(self.settings.enabled),
            settings: self.settings,
            timezone: self.timezone,
            decoder: self.decoder,
            transport: self.transport,
            directory: self.directory,
            observer: self.observer,
            clock: self.clock,
            store,
            correlation,
            evicted_since_cycle: AtomicUsize::new(0),
        }
    }
}

enum Resolution {
    Cached(Arc<EnrichmentRecord>),
    Fetched(Arc<EnrichmentRecord>),
    Unknown,
    Failed(FeedError),
}

pub struct FeedEngine {
    settings: FeedSettings,
    timezone: Tz,
    decoder: Arc<dyn FeedDecoder>,
    transport: Arc<dyn FeedTransport>,
    directory: Arc<dyn EnrichmentClient>,
    observer: Arc<dyn CycleObserver>,
    clock: Arc<dyn Clock>,
    store: Arc<LiveRecordStore>,
    correlation: CorrelationCache,
    enabled: AtomicBool,
    evicted_since_cycle: AtomicUsize,
}

impl FeedEngine {
    pub fn builder(
        settings: FeedSettings,
        decoder: Arc<dyn FeedDecoder>,
        transport: Arc<dyn FeedTransport>,
        directory: Arc<dyn EnrichmentClient>,
    ) -> FeedEngineBuilder {
        FeedEngineBuilder {
            settings,
            decoder,
            transport,
            directory,
            timezone: Tz::UTC,
            clock: Arc::new(SystemClock),
            observer: Arc::new(FeedMetrics::default()),
            correlation_ttl: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Snapshot of the records matching `filter`.
    pub fn get_current(&self, filter: &dyn RecordFilter) -> Result<Vec<MergedRecord>, QueryError> {
        self.store.query(filter)
    }

    /// Enables or pauses the refresh loop. Takes effect at the next cycle.
    pub fn force_status(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(feed = %self.settings.name, enabled, "Refresh status changed");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Wall-clock time of the last merge into the store, if any.
    pub fn last_update_timestamp(&self) -> Option<DateTime<Utc>> {
        self.store.last_update()
    }

    pub fn refresh_interval(&self) -> Duration {
        self.settings.refresh_interval()
    }

    pub fn store(&self) -> &LiveRecordStore {
        &self.store
    }

    pub fn correlation(&self) -> &CorrelationCache {
        &self.correlation
    }

    /// Drops records not merged within the configured max age. The count is
    /// carried into the next cycle's report.
    pub fn evict_stale(&self) -> usize {
        let evicted = self.store.evict_older_than(self.settings.max_age());
        if evicted > 0 {
            self.evicted_since_cycle.fetch_add(evicted, Ordering::Relaxed);
            info!(feed = %self.settings.name, evicted, remaining = self.store.len(), "Eviction sweep");
        }
        evicted
    }

    /// Runs the refresh loop until `shutdown` is cancelled.
    ///
    /// Waits the startup delay once, then refreshes every refresh interval and
    /// sweeps stale records on the coarser eviction interval. A cycle in
    /// progress is allowed to finish before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            feed = %self.settings.name,
            refresh_secs = self.settings.refresh_interval_secs,
            max_age_secs = self.settings.max_age_secs,
            "Refresh loop starting"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(feed = %self.settings.name, "Shutdown before first refresh");
                return;
            }
            _ = tokio::time::sleep(self.settings.startup_delay()) => {}
        }

        let mut refresh = interval(self.settings.refresh_interval());
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let eviction_every = self.settings.eviction_interval();
        let mut eviction = interval_at(tokio::time::Instant::now() + eviction_every, eviction_every);
        eviction.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = refresh.tick() => {
                    self.run_cycle().await;
                }
                _ = eviction.tick() => {
                    self.evict_stale();
                }
            }
        }

        info!(feed = %self.settings.name, "Refresh loop stopped");
    }

    /// Runs one refresh cycle to completion and reports what it did.
    pub async fn run_cycle(&self) -> CycleReport {
        let span = tracing::info_span!("refresh_cycle", feed = %self.settings.name);
        self.cycle().instrument(span).await
    }

    async fn cycle(&self) -> CycleReport {
        let mut report = CycleReport::new(&self.settings.name, self.clock.now());

        if !self.is_enabled() {
            debug!("Feed disabled, skipping cycle");
            report.disabled = true;
            return report;
        }

        let started = Instant::now();

        match self.directory.freshness_token().await {
            Ok(token) => {
                report.invalidated = self.correlation.invalidate_if_directory_changed(&token);
            }
            Err(e) => {
                // The previous token stands.
                warn!(error = %e, "Directory freshness check failed");
                self.load_error(&mut report, &e);
            }
        }

        let records = match self.load_feed().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, uri = %self.settings.uri, "Feed load failed, store left untouched");
                self.observer.record_load_error(&self.settings.name, e.kind());
                report = report.with_error(e.kind(), &e.to_string());
                return self.finish(report, started);
            }
        };
        report.decoded = records.len();

        let marker = self.fetch_marker(&mut report).await;

        for record in records {
            if record.lacks_position() {
                report.skipped_no_fix += 1;
                continue;
            }
            self.merge(record, marker, &mut report).await;
        }

        if report.enrichment_failures > 0 {
            warn!(
                failures = report.enrichment_failures,
                "Directory lookups failed, records retried next cycle"
            );
        }

        self.finish(report, started)
    }

    async fn load_feed(&self) -> Result<Vec<FeedRecord>, FeedError> {
        let bytes = self
            .transport
            .fetch(&self.settings.uri, self.settings.timeout())
            .await?;
        debug!(bytes = bytes.len(), "Feed bytes received, decoding");
        self.decoder.decode(&bytes)
    }

    /// Best-effort read of the companion last-update marker.
    async fn fetch_marker(&self, report: &mut CycleReport) -> Option<DateTime<Utc>> {
        let uri = self.settings.last_update_uri.as_deref()?;

        match self.transport.fetch(uri, self.settings.timeout()).await {
            Ok(bytes) => {
                let raw = String::from_utf8_lossy(&bytes);
                let parsed = parse_timestamp(&raw);
                if parsed.is_none() {
                    warn!(uri, body = %raw.trim(), "Unparsable last-update marker");
                }
                parsed
            }
            Err(e) => {
                warn!(uri, error = %e, "Last-update marker fetch failed");
                self.load_error(report, &e);
                None
            }
        }
    }

    async fn resolve(&self, source_key: &str) -> Resolution {
        if let Some(hit) = self.correlation.lookup(source_key) {
            return Resolution::Cached(hit);
        }
        // Anything still stored here outlived its TTL.
        let expired = self.correlation.peek(source_key);

        match self.directory.lookup_by_source_code(source_key).await {
            Ok(Some(found)) => {
                let fresh = self.correlation.populate(source_key, found);
                self.retire(expired, Some(fresh.canonical_key.as_str()));
                Resolution::Fetched(fresh)
            }
            Ok(None) => {
                self.correlation.forget(source_key);
                self.retire(expired, None);
                Resolution::Unknown
            }
            Err(e) => Resolution::Failed(e),
        }
    }

    /// Removes the store entry of an expired correlation unless the
    /// directory still maps the code to the same canonical key.
    fn retire(&self, expired: Option<Arc<EnrichmentRecord>>, keep: Option<&str>) {
        let Some(expired) = expired else {
            return;
        };
        if keep == Some(expired.canonical_key.as_str()) {
            return;
        }
        if self.store.remove(&expired.canonical_key) {
            debug!(
                canonical_key = %expired.canonical_key,
                natural_key = %expired.natural_key,
                "Dropped record of expired correlation"
            );
        }
    }

    async fn merge(&self, record: FeedRecord, marker: Option<DateTime<Utc>>, report: &mut CycleReport) {
        let enrichment = match self.resolve(&record.source_key).await {
            Resolution::Cached(hit) => {
                report.correlation_hits += 1;
                Some(hit)
            }
            Resolution::Fetched(found) => {
                // Drop the provisional entry left by earlier misses.
                self.store
                    .remove_unenriched(&MergedRecord::provisional_key(&record.source_key));
                Some(found)
            }
            Resolution::Unknown => {
                report.enrichment_misses += 1;
                None
            }
            Resolution::Failed(e) => {
                debug!(source_key = %record.source_key, error = %e, "Directory lookup failed");
                report.enrichment_failures += 1;
                self.load_error(report, &e);
                return;
            }
        };

        let canonical_key = match &enrichment {
            Some(e) => e.canonical_key.clone(),
            None => MergedRecord::provisional_key(&record.source_key),
        };

        let observed_at = record
            .observed_at
            .or(marker)
            .unwrap_or_else(|| self.clock.now())
            .with_timezone(&self.timezone);

        let merged = MergedRecord::new(canonical_key, record.payload, observed_at, enrichment);
        match self.store.upsert(merged) {
            Upsert::Inserted => report.inserted += 1,
            Upsert::Updated => report.updated += 1,
        }
    }

    fn load_error(&self, report: &mut CycleReport, err: &FeedError) {
        report.errors += 1;
        self.observer.record_load_error(&self.settings.name, err.kind());
    }

    fn finish(&self, mut report: CycleReport, started: Instant) -> CycleReport {
        let elapsed = started.elapsed();
        report.evicted = self.evicted_since_cycle.swap(0, Ordering::Relaxed);
        report.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        self.observer
            .record_cycle(&self.settings.name, elapsed, report.errors);
        self.observer.record_records(
            &self.settings.name,
            report.merged() as u64,
            report.skipped() as u64,
        );

        if !report.aborted() {
            info!(
                decoded = report.decoded,
                inserted = report.inserted,
                updated = report.updated,
                skipped_no_fix = report.skipped_no_fix,
                correlation_hits = report.correlation_hits,
                enrichment_misses = report.enrichment_misses,
                enrichment_failures = report.enrichment_failures,
                evicted = report.evicted,
                invalidated = report.invalidated,
                stored = self.store.len(),
                duration_ms = report.duration_ms,
                "Refresh cycle complete"
            );
        }
        report
    }
}
