//! Decoder for vendor JSON vehicle feeds.
//!
//! ```json
//! { "timestamp": 1700000000,
//!   "vehicles": [ { "id": "bus-7", "lat": 43.5, "lon": 5.2, "bearing": 90,
//!                   "occupancy": "FULL", "status": 1, "stop_id": "S1" } ] }
//! ```

use serde::Deserialize;

use super::{FeedDecoder, unix_seconds};
use crate::error::FeedError;
use crate::model::{FeedRecord, GeoPosition, OccupancyStatus, Payload, PayloadKind};

#[derive(Debug, Deserialize)]
struct JsonFeed {
    timestamp: Option<i64>,
    #[serde(default)]
    vehicles: Vec<JsonVehicle>,
}

#[derive(Debug, Deserialize)]
struct JsonVehicle {
    id: String,
    timestamp: Option<i64>,
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
    bearing: Option<f32>,
    speed: Option<f32>,
    occupancy: Option<OccupancyStatus>,
    status: Option<i32>,
    stop_id: Option<String>,
    line: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct JsonFeedDecoder {
    payload: PayloadKind,
}

impl JsonFeedDecoder {
    pub fn new(payload: PayloadKind) -> Self {
        Self { payload }
    }
}

impl FeedDecoder for JsonFeedDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<FeedRecord>, FeedError> {
        let feed: JsonFeed = serde_json::from_slice(bytes)?;
        let feed_ts = feed.timestamp.and_then(unix_seconds);

        Ok(feed
            .vehicles
            .into_iter()
            .filter_map(|v| {
                let payload = match self.payload {
                    PayloadKind::Position => Payload::Position(GeoPosition {
                        latitude: v.lat,
                        longitude: v.lon,
                        bearing: v.bearing,
                        speed: v.speed,
                    }),
                    PayloadKind::Occupancy => Payload::Occupancy {
                        status: v.occupancy?,
                    },
                    PayloadKind::Status => Payload::Status { code: v.status? },
                };

                Some(FeedRecord {
                    source_key: v.id,
                    observed_at: v.timestamp.and_then(unix_seconds).or(feed_ts),
                    payload,
                    stop_or_line_key: v.stop_id.or(v.line),
                })
            })
            .collect())
    }
}
