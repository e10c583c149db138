use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::error::FeedError;
use crate::model::EnrichmentRecord;
use crate::services::directory_api::EnrichmentClient;

/// Directory for feeds whose source keys are already canonical.
///
/// Every code resolves to itself with no associated stops, and the
/// freshness token never changes.
pub struct PassthroughDirectory {
    clock: Arc<dyn Clock>,
}

impl PassthroughDirectory {
    pub const TOKEN: &'static str = "passthrough";

    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl EnrichmentClient for PassthroughDirectory {
    async fn lookup_by_source_code(&self, code: &str) -> Result<Option<EnrichmentRecord>, FeedError> {
        Ok(Some(EnrichmentRecord {
            canonical_key: code.to_string(),
            natural_key: code.to_string(),
            associated_stops: Vec::new(),
            created_at: self.clock.now(),
        }))
    }

    async fn freshness_token(&self) -> Result<String, FeedError> {
        Ok(Self::TOKEN.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[tokio::test]
    async fn test_code_maps_to_itself() {
        let dir = PassthroughDirectory::new(Arc::new(SystemClock));
        let record = dir.lookup_by_source_code("bus-1").await.unwrap().unwrap();
        assert_eq!(record.canonical_key, "bus-1");
        assert!(record.associated_stops.is_empty());
        assert_eq!(dir.freshness_token().await.unwrap(), PassthroughDirectory::TOKEN);
    }
}
