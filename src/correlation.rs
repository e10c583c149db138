//! Correlation Cache: natural key -> enrichment record.
//!
//! Avoids a directory round trip per record per cycle. Consistency with the
//! directory is kept by a single rule: when the directory's freshness token
//! changes, this cache and the live store are both emptied.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use crate::clock::Clock;
use crate::model::EnrichmentRecord;
use crate::store::LiveRecordStore;

pub struct CorrelationCache {
    entries: RwLock<HashMap<String, Arc<EnrichmentRecord>>>,
    token: RwLock<Option<String>>,
    ttl: Option<Duration>,
    store: Arc<LiveRecordStore>,
    clock: Arc<dyn Clock>,
}

impl CorrelationCache {
    /// `ttl` bounds how long an entry is served; `None` keeps entries until
    /// the next directory change.
    pub fn new(store: Arc<LiveRecordStore>, clock: Arc<dyn Clock>, ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            token: RwLock::new(None),
            ttl,
            store,
            clock,
        }
    }

    /// Returns the cached enrichment for `natural_key`, unless absent or
    /// older than the TTL.
    pub fn lookup(&self, natural_key: &str) -> Option<Arc<EnrichmentRecord>> {
        let entries = self.entries.read();
        let record = entries.get(natural_key)?;

        if let Some(ttl) = self.ttl {
            let age = self.clock.now() - record.created_at;
            if age.to_std().is_ok_and(|age| age > ttl) {
                return None;
            }
        }

        Some(Arc::clone(record))
    }

    /// The stored entry for `natural_key`, expired or not.
    pub fn peek(&self, natural_key: &str) -> Option<Arc<EnrichmentRecord>> {
        self.entries.read().get(natural_key).cloned()
    }

    /// Drops the entry for `natural_key`, returning it.
    pub fn forget(&self, natural_key: &str) -> Option<Arc<EnrichmentRecord>> {
        self.entries.write().remove(natural_key)
    }

    /// Inserts or overwrites the entry for `natural_key`.
    pub fn populate(&self, natural_key: &str, record: EnrichmentRecord) -> Arc<EnrichmentRecord> {
        let record = Arc::new(record);
        self.entries
            .write()
            .insert(natural_key.to_string(), Arc::clone(&record));
        record
    }

    /// Compares `new_token` with the last adopted token. On any difference
    /// (including the first token ever seen) clears this cache and the live
    /// store, adopts the new token and returns `true`.
    pub fn invalidate_if_directory_changed(&self, new_token: &str) -> bool {
        let mut token = self.token.write();
        if token.as_deref() == Some(new_token) {
            return false;
        }

        let previous = token.replace(new_token.to_string());
        let dropped = {
            let mut entries = self.entries.write();
            let n = entries.len();
            entries.clear();
            n
        };
        self.store.clear();

        info!(
            previous = previous.as_deref().unwrap_or("<none>"),
            current = new_token,
            dropped_correlations = dropped,
            "Directory changed, caches reset"
        );
        true
    }

    pub fn current_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
