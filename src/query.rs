//! Read-side filters applied to store snapshots.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::QueryError;
use crate::model::MergedRecord;

/// Strategy deciding whether a record belongs in a query result.
pub trait RecordFilter: Send + Sync {
    fn matches(&self, record: &MergedRecord) -> bool;
}

/// Rectangular area in WGS84 degrees, inclusive on every edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Parses `minLat,minLon,maxLat,maxLon`.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(QueryError::InvalidFilter(format!(
                "bounding box needs 4 coordinates, got {}",
                parts.len()
            )));
        }

        let mut coords = [0.0f64; 4];
        for (slot, part) in coords.iter_mut().zip(&parts) {
            *slot = part.parse::<f64>().map_err(|_| {
                QueryError::InvalidFilter(format!("unparsable coordinate '{part}'"))
            })?;
            if !slot.is_finite() {
                return Err(QueryError::InvalidFilter(format!(
                    "coordinate '{part}' is not finite"
                )));
            }
        }

        let [min_lat, min_lon, max_lat, max_lon] = coords;
        if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
            return Err(QueryError::InvalidFilter("latitude out of range".into()));
        }
        if !(-180.0..=180.0).contains(&min_lon) || !(-180.0..=180.0).contains(&max_lon) {
            return Err(QueryError::InvalidFilter("longitude out of range".into()));
        }
        if min_lat > max_lat || min_lon > max_lon {
            return Err(QueryError::InvalidFilter(
                "bounding box minimum exceeds maximum".into(),
            ));
        }

        Ok(Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        })
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&latitude)
            && (self.min_lon..=self.max_lon).contains(&longitude)
    }
}

/// The standard query: key set, minimum observation time, optional area.
///
/// An empty key set matches every key. `min_timestamp` is compared against
/// `observed_at`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    pub canonical_keys: HashSet<String>,
    pub min_timestamp: Option<DateTime<Utc>>,
    pub bounding_box: Option<BoundingBox>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.canonical_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.min_timestamp = Some(at);
        self
    }

    pub fn with_bounding_box(mut self, bbox: BoundingBox) -> Self {
        self.bounding_box = Some(bbox);
        self
    }

    /// Builds a filter from raw request parameters.
    ///
    /// `keys` is comma separated, `min_timestamp` is RFC 3339 or unix
    /// seconds, `bbox` is `minLat,minLon,maxLat,maxLon`.
    pub fn parse(
        keys: Option<&str>,
        min_timestamp: Option<&str>,
        bbox: Option<&str>,
    ) -> Result<Self, QueryError> {
        let canonical_keys = keys
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let min_timestamp = min_timestamp
            .map(|raw| {
                parse_timestamp(raw).ok_or_else(|| {
                    QueryError::InvalidFilter(format!("unparsable timestamp '{raw}'"))
                })
            })
            .transpose()?;

        let bounding_box = bbox.map(BoundingBox::parse).transpose()?;

        Ok(Self {
            canonical_keys,
            min_timestamp,
            bounding_box,
        })
    }
}

impl RecordFilter for QueryFilter {
    fn matches(&self, record: &MergedRecord) -> bool {
        if !self.canonical_keys.is_empty() && !self.canonical_keys.contains(&record.canonical_key)
        {
            return false;
        }

        if let Some(min) = self.min_timestamp {
            if record.observed_at.with_timezone(&Utc) < min {
                return false;
            }
        }

        if let Some(bbox) = &self.bounding_box {
            return record
                .payload
                .position()
                .is_some_and(|p| bbox.contains(p.latitude, p.longitude));
        }

        true
    }
}

/// Accepts RFC 3339 or integer unix seconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
