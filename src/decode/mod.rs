//! Feed decoders: raw upstream bytes to [`FeedRecord`]s.

mod gtfs;
mod json;

pub use gtfs::{GtfsRtDecoder, parse_feed};
pub use json::JsonFeedDecoder;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::model::{FeedRecord, PayloadKind};

/// Turns one feed download into typed records. Stateless.
pub trait FeedDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<FeedRecord>, FeedError>;
}

/// Wire format of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FeedFormat {
    #[default]
    #[value(name = "gtfs_rt")]
    GtfsRt,
    Json,
}

/// Builds the decoder for a feed's format and payload kind.
pub fn decoder_for(format: FeedFormat, payload: PayloadKind) -> Arc<dyn FeedDecoder> {
    match format {
        FeedFormat::GtfsRt => Arc::new(GtfsRtDecoder::new(payload)),
        FeedFormat::Json => Arc::new(JsonFeedDecoder::new(payload)),
    }
}

pub(crate) fn unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
