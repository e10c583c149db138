use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gtfs_rt_sync::clock::SystemClock;
use gtfs_rt_sync::config::FeedSettings;
use gtfs_rt_sync::decode::{FeedFormat, decoder_for};
use gtfs_rt_sync::engine::FeedEngine;
use gtfs_rt_sync::error::{FeedError, QueryError};
use gtfs_rt_sync::fetch::{BasicClient, SourceTransport};
use gtfs_rt_sync::gtfs_rt::{
    FeedEntity, FeedHeader, FeedMessage, Position, TripDescriptor, VehicleDescriptor,
    VehiclePosition,
};
use gtfs_rt_sync::infra::directory::PassthroughDirectory;
use gtfs_rt_sync::model::{EnrichmentRecord, PayloadKind};
use gtfs_rt_sync::query::QueryFilter;
use gtfs_rt_sync::services::directory_api::EnrichmentClient;
use parking_lot::Mutex;
use prost::Message;

// 2024-06-01T10:00:00Z
const OBSERVED: u64 = 1_717_236_000;

fn vehicle(id: &str, lat: f32, lon: f32) -> FeedEntity {
    FeedEntity {
        id: format!("entity-{id}"),
        is_deleted: None,
        vehicle: Some(VehiclePosition {
            trip: Some(TripDescriptor {
                route_id: Some("R1".into()),
                ..Default::default()
            }),
            vehicle: Some(VehicleDescriptor {
                id: Some(id.into()),
                ..Default::default()
            }),
            position: Some(Position {
                latitude: lat,
                longitude: lon,
                ..Default::default()
            }),
            timestamp: Some(OBSERVED),
            ..Default::default()
        }),
    }
}

fn encode(entities: Vec<FeedEntity>) -> Vec<u8> {
    FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".into(),
            timestamp: Some(OBSERVED),
            ..Default::default()
        },
        entity: entities,
    }
    .encode_to_vec()
}

fn engine_for(path: &str, directory: Arc<dyn EnrichmentClient>) -> FeedEngine {
    let settings =
        FeedSettings::for_source("bus", path, FeedFormat::GtfsRt, PayloadKind::Position);
    let transport = SourceTransport::new(BasicClient::new(Duration::from_secs(5)).unwrap());
    FeedEngine::builder(
        settings,
        decoder_for(FeedFormat::GtfsRt, PayloadKind::Position),
        Arc::new(transport),
        directory,
    )
    .timezone(chrono_tz::Europe::Paris)
    .build()
}

/// Directory whose data set can be swapped out between cycles.
struct ReloadableDirectory {
    version: Mutex<String>,
    entries: Mutex<HashMap<String, String>>,
    lookups: Mutex<usize>,
}

impl ReloadableDirectory {
    fn new(version: &str, entries: &[(&str, &str)]) -> Self {
        Self {
            version: Mutex::new(version.to_string()),
            entries: Mutex::new(
                entries
                    .iter()
                    .map(|(code, key)| (code.to_string(), key.to_string()))
                    .collect(),
            ),
            lookups: Mutex::new(0),
        }
    }

    fn reload(&self, version: &str, entries: &[(&str, &str)]) {
        *self.version.lock() = version.to_string();
        *self.entries.lock() = entries
            .iter()
            .map(|(code, key)| (code.to_string(), key.to_string()))
            .collect();
    }
}

#[async_trait]
impl EnrichmentClient for ReloadableDirectory {
    async fn lookup_by_source_code(&self, code: &str) -> Result<Option<EnrichmentRecord>, FeedError> {
        *self.lookups.lock() += 1;
        Ok(self.entries.lock().get(code).map(|key| EnrichmentRecord {
            canonical_key: key.clone(),
            natural_key: code.to_string(),
            associated_stops: vec![],
            created_at: Utc::now(),
        }))
    }

    async fn freshness_token(&self) -> Result<String, FeedError> {
        Ok(self.version.lock().clone())
    }
}

#[tokio::test]
async fn test_full_pipeline_from_gtfs_rt_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vehicle_positions.pb");
    std::fs::write(
        &path,
        encode(vec![
            vehicle("bus-1", 48.85, 2.35),
            vehicle("bus-2", 48.86, 2.36),
            vehicle("bus-3", 0.0, 0.0),
        ]),
    )
    .unwrap();

    let engine = engine_for(
        path.to_str().unwrap(),
        Arc::new(PassthroughDirectory::new(Arc::new(SystemClock))),
    );
    assert_eq!(
        engine.get_current(&QueryFilter::new()),
        Err(QueryError::NoDataLoaded)
    );

    let report = engine.run_cycle().await;
    assert_eq!(report.errors, 0);
    assert_eq!(report.decoded, 3);
    assert_eq!(report.skipped_no_fix, 1);
    assert_eq!(report.inserted, 2);

    let all = engine.get_current(&QueryFilter::new()).unwrap();
    assert_eq!(all.len(), 2);

    let filter = QueryFilter::new().with_keys(["bus-2"]);
    let hits = engine.get_current(&filter).unwrap();
    assert_eq!(hits.len(), 1);
    let position = hits[0].payload.position().unwrap();
    assert!((position.latitude - 48.86).abs() < 1e-4);
    assert_eq!(hits[0].observed_at.to_rfc3339(), "2024-06-01T12:00:00+02:00");

    let since: DateTime<Utc> = DateTime::from_timestamp(OBSERVED as i64 + 1, 0).unwrap();
    let later = engine
        .get_current(&QueryFilter::new().with_min_timestamp(since))
        .unwrap();
    assert!(later.is_empty());

    // Same feed again: updates in place, no duplicates.
    let report = engine.run_cycle().await;
    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, 2);
    assert_eq!(engine.get_current(&QueryFilter::new()).unwrap().len(), 2);
}

#[tokio::test]
async fn test_gzipped_feed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vehicle_positions.pb.gz");
    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gz.write_all(&encode(vec![vehicle("bus-1", 43.3, 5.4)])).unwrap();
    std::fs::write(&path, gz.finish().unwrap()).unwrap();

    let engine = engine_for(
        &format!("file://{}", path.display()),
        Arc::new(PassthroughDirectory::new(Arc::new(SystemClock))),
    );
    let report = engine.run_cycle().await;
    assert_eq!(report.inserted, 1);
    assert_eq!(engine.store().len(), 1);
}

#[tokio::test]
async fn test_missing_file_leaves_store_never_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.pb");

    let engine = engine_for(
        path.to_str().unwrap(),
        Arc::new(PassthroughDirectory::new(Arc::new(SystemClock))),
    );
    let report = engine.run_cycle().await;
    assert!(report.errors > 0);
    assert!(report.error_message.is_some());
    assert_eq!(
        engine.get_current(&QueryFilter::new()),
        Err(QueryError::NoDataLoaded)
    );
}

#[tokio::test]
async fn test_directory_reload_rebuilds_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vehicle_positions.pb");
    std::fs::write(
        &path,
        encode(vec![vehicle("bus-1", 48.85, 2.35), vehicle("bus-2", 48.86, 2.36)]),
    )
    .unwrap();

    let directory = Arc::new(ReloadableDirectory::new(
        "v1",
        &[("bus-1", "veh-001"), ("bus-2", "veh-002")],
    ));
    let engine = engine_for(path.to_str().unwrap(), directory.clone());

    engine.run_cycle().await;
    let keys: Vec<_> = {
        let mut k: Vec<_> = engine
            .get_current(&QueryFilter::new())
            .unwrap()
            .into_iter()
            .map(|r| r.canonical_key)
            .collect();
        k.sort();
        k
    };
    assert_eq!(keys, vec!["veh-001", "veh-002"]);
    assert_eq!(*directory.lookups.lock(), 2);

    // Cached: no further lookups while the directory is unchanged.
    engine.run_cycle().await;
    assert_eq!(*directory.lookups.lock(), 2);

    // The directory reloads with a new mapping and the feed drops bus-2.
    directory.reload("v2", &[("bus-1", "veh-101")]);
    std::fs::write(&path, encode(vec![vehicle("bus-1", 48.85, 2.35)])).unwrap();

    let report = engine.run_cycle().await;
    assert!(report.invalidated);

    let records = engine.get_current(&QueryFilter::new()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].canonical_key, "veh-101");
    assert_eq!(
        records[0].enrichment.as_ref().unwrap().natural_key,
        "bus-1"
    );
    assert_eq!(*directory.lookups.lock(), 3);
}
