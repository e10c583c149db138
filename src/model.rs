//! Records flowing through the sync pipeline.
//!
//! A [`FeedRecord`] is decoded fresh every cycle and dropped after merge.
//! An [`EnrichmentRecord`] is owned by the correlation cache and shared by
//! `Arc` with the [`MergedRecord`]s that reference it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Passenger load reported by a vehicle. Mirrors the GTFS-RT enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccupancyStatus {
    Empty,
    ManySeatsAvailable,
    FewSeatsAvailable,
    StandingRoomOnly,
    CrushedStandingRoomOnly,
    Full,
    NotAcceptingPassengers,
    NoDataAvailable,
    NotBoardable,
}

impl OccupancyStatus {
    /// Maps a GTFS-RT wire code. Unknown codes are treated as "no data".
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => OccupancyStatus::Empty,
            1 => OccupancyStatus::ManySeatsAvailable,
            2 => OccupancyStatus::FewSeatsAvailable,
            3 => OccupancyStatus::StandingRoomOnly,
            4 => OccupancyStatus::CrushedStandingRoomOnly,
            5 => OccupancyStatus::Full,
            6 => OccupancyStatus::NotAcceptingPassengers,
            8 => OccupancyStatus::NotBoardable,
            _ => OccupancyStatus::NoDataAvailable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OccupancyStatus::Empty => "EMPTY",
            OccupancyStatus::ManySeatsAvailable => "MANY_SEATS_AVAILABLE",
            OccupancyStatus::FewSeatsAvailable => "FEW_SEATS_AVAILABLE",
            OccupancyStatus::StandingRoomOnly => "STANDING_ROOM_ONLY",
            OccupancyStatus::CrushedStandingRoomOnly => "CRUSHED_STANDING_ROOM_ONLY",
            OccupancyStatus::Full => "FULL",
            OccupancyStatus::NotAcceptingPassengers => "NOT_ACCEPTING_PASSENGERS",
            OccupancyStatus::NoDataAvailable => "NO_DATA_AVAILABLE",
            OccupancyStatus::NotBoardable => "NOT_BOARDABLE",
        }
    }
}

/// A vehicle fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: Option<f32>,
    pub speed: Option<f32>,
}

impl GeoPosition {
    /// Upstream feeds report `0,0` when the vehicle has no GPS fix.
    pub fn is_no_fix(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

/// Which payload variant a feed produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    #[default]
    Position,
    Occupancy,
    Status,
}

/// Observation carried by a feed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Position(GeoPosition),
    Occupancy { status: OccupancyStatus },
    Status { code: i32 },
}

impl Payload {
    pub fn position(&self) -> Option<&GeoPosition> {
        match self {
            Payload::Position(p) => Some(p),
            _ => None,
        }
    }
}

/// One upstream observation, as decoded from the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRecord {
    /// Upstream-assigned key; not stable across feed epochs.
    pub source_key: String,
    /// Feed-provided timestamp, if the feed carries one.
    pub observed_at: Option<DateTime<Utc>>,
    pub payload: Payload,
    pub stop_or_line_key: Option<String>,
}

impl FeedRecord {
    /// True for position records carrying the `0,0` no-fix sentinel.
    pub fn lacks_position(&self) -> bool {
        self.payload.position().is_some_and(GeoPosition::is_no_fix)
    }
}

/// Result of a directory lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    /// Stable, directory-assigned identifier.
    pub canonical_key: String,
    /// The key the directory was queried with.
    pub natural_key: String,
    pub associated_stops: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Prefix of the key an un-enriched record is stored under. Provisional
/// entries never share a key with a directory-assigned canonical key.
pub const PROVISIONAL_KEY_PREFIX: &str = "unmatched:";

/// The unit served to readers.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub canonical_key: String,
    pub payload: Payload,
    /// Feed timestamp, localized to the configured time zone.
    pub observed_at: DateTime<Tz>,
    /// Wall-clock time of the last merge. Set by the store on upsert.
    pub last_seen_at: DateTime<Utc>,
    pub enrichment: Option<Arc<EnrichmentRecord>>,
}

impl MergedRecord {
    /// Builds a record ready for upsert. `last_seen_at` is overwritten by the
    /// store, so it starts as the observation time.
    pub fn new(
        canonical_key: impl Into<String>,
        payload: Payload,
        observed_at: DateTime<Tz>,
        enrichment: Option<Arc<EnrichmentRecord>>,
    ) -> Self {
        let last_seen_at = observed_at.with_timezone(&Utc);
        Self {
            canonical_key: canonical_key.into(),
            payload,
            observed_at,
            last_seen_at,
            enrichment,
        }
    }

    /// Store key for a record the directory does not know yet.
    pub fn provisional_key(source_key: &str) -> String {
        format!("{PROVISIONAL_KEY_PREFIX}{source_key}")
    }
}
