//! Output formatting and persistence for store snapshots and cycle reports.
//!
//! Supports pretty-printing, JSON serialization, and CSV append.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::model::{MergedRecord, Payload};
use crate::stats::CycleReport;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// One CSV row per merged record. Payload variants are flattened into
/// optional columns so every row shares one header.
#[derive(Debug, Serialize)]
pub struct SnapshotRow<'a> {
    pub feed: &'a str,
    pub canonical_key: &'a str,
    pub observed_at: String,
    pub last_seen_at: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub bearing: Option<f32>,
    pub speed: Option<f32>,
    pub occupancy: Option<&'static str>,
    pub status_code: Option<i32>,
    pub natural_key: Option<&'a str>,
    pub stops: String,
}

impl<'a> SnapshotRow<'a> {
    pub fn from_record(feed: &'a str, record: &'a MergedRecord) -> Self {
        let mut row = SnapshotRow {
            feed,
            canonical_key: &record.canonical_key,
            observed_at: record.observed_at.to_rfc3339(),
            last_seen_at: record.last_seen_at.to_rfc3339(),
            latitude: None,
            longitude: None,
            bearing: None,
            speed: None,
            occupancy: None,
            status_code: None,
            natural_key: record.enrichment.as_ref().map(|e| e.natural_key.as_str()),
            stops: record
                .enrichment
                .as_ref()
                .map(|e| e.associated_stops.join("|"))
                .unwrap_or_default(),
        };

        match &record.payload {
            Payload::Position(p) => {
                row.latitude = Some(p.latitude);
                row.longitude = Some(p.longitude);
                row.bearing = p.bearing;
                row.speed = p.speed;
            }
            Payload::Occupancy { status } => row.occupancy = Some(status.as_str()),
            Payload::Status { code } => row.status_code = Some(*code),
        }
        row
    }
}

/// Logs a cycle report using Rust's debug pretty-print format.
pub fn print_pretty(report: &CycleReport) {
    info!("{:#?}", report);
}

/// Logs a cycle report as pretty-printed JSON.
pub fn print_json(report: &CycleReport) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// Appends every record of a snapshot as rows to a CSV file.
///
/// Creates the file with headers if it does not already exist. Returns the
/// number of rows written.
pub fn append_snapshot(path: &str, feed: &str, records: &[MergedRecord]) -> Result<usize> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, rows = records.len(), "Appending CSV snapshot");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for record in records {
        writer.serialize(SnapshotRow::from_record(feed, record))?;
    }
    writer.flush()?;

    Ok(records.len())
}
