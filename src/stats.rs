use chrono::{DateTime, Utc};
use serde::Serialize;

/// Tallies for one refresh cycle.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub feed: String,
    pub duration_ms: u64,

    /// The cycle did no work because the feed is disabled.
    pub disabled: bool,
    /// The directory token changed and both caches were reset.
    pub invalidated: bool,

    pub decoded: usize,
    pub skipped_no_fix: usize,
    pub inserted: usize,
    pub updated: usize,
    pub correlation_hits: usize,
    /// Directory had no entry; record merged un-enriched.
    pub enrichment_misses: usize,
    /// Directory lookup failed; record skipped this cycle.
    pub enrichment_failures: usize,
    /// Records dropped by eviction sweeps since the previous cycle.
    pub evicted: usize,

    // error tracking
    pub errors: u64,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl CycleReport {
    pub fn new(feed: &str, started_at: DateTime<Utc>) -> Self {
        CycleReport {
            started_at,
            feed: feed.to_string(),
            ..Default::default()
        }
    }

    pub fn merged(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn skipped(&self) -> usize {
        self.skipped_no_fix + self.enrichment_failures
    }

    /// True if the cycle was aborted before merging.
    pub fn aborted(&self) -> bool {
        self.error_type.is_some()
    }

    /// Marks the cycle as aborted with the given error.
    pub fn with_error(mut self, error_type: &str, error_message: &str) -> Self {
        self.errors += 1;
        self.error_type = Some(error_type.to_string());
        self.error_message = Some(error_message.to_string());
        self
    }
}
