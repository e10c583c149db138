//! Live Record Store: canonical key -> current merged record.
//!
//! One lock guards both the records and the loaded marker. Each public call
//! holds it for its own duration only; callers never hold it across I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::clock::Clock;
use crate::error::QueryError;
use crate::model::MergedRecord;
use crate::query::RecordFilter;

/// Outcome of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// Records and the loaded marker, guarded together so a reader never sees
/// one without the other.
#[derive(Default)]
struct Inner {
    records: HashMap<String, MergedRecord>,
    last_update: Option<DateTime<Utc>>,
}

pub struct LiveRecordStore {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl LiveRecordStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    /// Inserts or overwrites by canonical key, stamping `last_seen_at` with
    /// the current wall-clock time.
    ///
    /// An existing record keeps its identity; payload, `observed_at` and
    /// `last_seen_at` are replaced together under one write lock. Enrichment
    /// is replaced only when the incoming record carries one.
    pub fn upsert(&self, mut record: MergedRecord) -> Upsert {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        let outcome = match inner.records.get_mut(&record.canonical_key) {
            Some(existing) => {
                existing.payload = record.payload;
                existing.observed_at = record.observed_at;
                // last_seen_at never moves backwards, even if the wall clock does.
                existing.last_seen_at = existing.last_seen_at.max(now);
                if record.enrichment.is_some() {
                    existing.enrichment = record.enrichment;
                }
                Upsert::Updated
            }
            None => {
                record.last_seen_at = now;
                inner.records.insert(record.canonical_key.clone(), record);
                Upsert::Inserted
            }
        };

        inner.last_update = Some(now);
        outcome
    }

    /// Removes every record whose `last_seen_at` is strictly older than
    /// `now - max_age`. Returns the number removed.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let now = self.clock.now();
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return 0;
        };

        let removed = {
            let mut inner = self.inner.write();
            let before = inner.records.len();
            inner.records.retain(|_, r| r.last_seen_at >= cutoff);
            before - inner.records.len()
        };

        if removed > 0 {
            debug!(removed, %cutoff, "Evicted stale records");
        }
        removed
    }

    /// Snapshot of all records accepted by `filter`, in no particular order.
    ///
    /// Returns [`QueryError::NoDataLoaded`] if nothing has been upserted
    /// since construction or the last [`clear`](Self::clear).
    pub fn query(&self, filter: &dyn RecordFilter) -> Result<Vec<MergedRecord>, QueryError> {
        let inner = self.inner.read();
        if inner.last_update.is_none() {
            return Err(QueryError::NoDataLoaded);
        }

        Ok(inner
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    /// Drops every record and returns the store to the never-loaded state.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.records.clear();
        inner.last_update = None;
    }

    pub fn remove(&self, canonical_key: &str) -> bool {
        self.inner.write().records.remove(canonical_key).is_some()
    }

    /// Removes the record under `canonical_key` only if it carries no
    /// enrichment.
    pub fn remove_unenriched(&self, canonical_key: &str) -> bool {
        let mut inner = self.inner.write();
        if inner
            .records
            .get(canonical_key)
            .is_some_and(|r| r.enrichment.is_none())
        {
            inner.records.remove(canonical_key);
            return true;
        }
        false
    }

    pub fn get(&self, canonical_key: &str) -> Option<MergedRecord> {
        self.inner.read().records.get(canonical_key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Wall-clock time of the most recent upsert.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_update
    }
}
