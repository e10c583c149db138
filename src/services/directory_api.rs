//! Trait for the directory service that enriches feed records.

use async_trait::async_trait;

use crate::error::FeedError;
use crate::model::EnrichmentRecord;

/// A directory keyed by feed source code.
///
/// A code the directory does not know is `Ok(None)`, not an error.
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    /// Resolves a feed source code to its directory entry.
    async fn lookup_by_source_code(&self, code: &str) -> Result<Option<EnrichmentRecord>, FeedError>;

    /// Opaque token that changes whenever the directory reloads its data.
    async fn freshness_token(&self) -> Result<String, FeedError>;
}
