//! Protobuf decoder for GTFS Realtime vehicle feeds.

use chrono::{DateTime, Utc};
use prost::Message;

use super::{FeedDecoder, unix_seconds};
use crate::error::FeedError;
use crate::gtfs_rt::vehicle_position::VehicleStopStatus;
use crate::gtfs_rt::{FeedEntity, FeedMessage, VehiclePosition};
use crate::model::{FeedRecord, GeoPosition, OccupancyStatus, Payload, PayloadKind};

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns [`FeedError::Decode`] if the bytes are not a valid `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, FeedError> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Emits one record per live `vehicle` entity.
#[derive(Debug, Clone, Copy)]
pub struct GtfsRtDecoder {
    payload: PayloadKind,
}

impl GtfsRtDecoder {
    pub fn new(payload: PayloadKind) -> Self {
        Self { payload }
    }

    fn record_from(
        &self,
        entity: &FeedEntity,
        vehicle: &VehiclePosition,
        header_ts: Option<DateTime<Utc>>,
    ) -> Option<FeedRecord> {
        let payload = match self.payload {
            PayloadKind::Position => {
                // A vehicle without a position is reported as the no-fix sentinel.
                let (latitude, longitude, bearing, speed) = vehicle
                    .position
                    .as_ref()
                    .map(|p| (f64::from(p.latitude), f64::from(p.longitude), p.bearing, p.speed))
                    .unwrap_or((0.0, 0.0, None, None));
                Payload::Position(GeoPosition {
                    latitude,
                    longitude,
                    bearing,
                    speed,
                })
            }
            PayloadKind::Occupancy => Payload::Occupancy {
                status: OccupancyStatus::from_code(vehicle.occupancy_status?),
            },
            PayloadKind::Status => Payload::Status {
                code: vehicle
                    .current_status
                    .unwrap_or(VehicleStopStatus::InTransitTo as i32),
            },
        };

        let source_key = vehicle
            .vehicle
            .as_ref()
            .and_then(|d| d.id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| entity.id.clone());

        let observed_at = vehicle
            .timestamp
            .and_then(|ts| i64::try_from(ts).ok())
            .and_then(unix_seconds)
            .or(header_ts);

        let stop_or_line_key = vehicle
            .stop_id
            .clone()
            .or_else(|| vehicle.trip.as_ref().and_then(|t| t.route_id.clone()));

        Some(FeedRecord {
            source_key,
            observed_at,
            payload,
            stop_or_line_key,
        })
    }
}

impl FeedDecoder for GtfsRtDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<FeedRecord>, FeedError> {
        let feed = parse_feed(bytes)?;
        let header_ts = feed
            .header
            .timestamp
            .and_then(|ts| i64::try_from(ts).ok())
            .and_then(unix_seconds);

        Ok(feed
            .entity
            .iter()
            .filter(|e| !e.is_deleted())
            .filter_map(|e| {
                let vehicle = e.vehicle.as_ref()?;
                self.record_from(e, vehicle, header_ts)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{FeedHeader, Position, TripDescriptor, VehicleDescriptor};

    fn header(timestamp: Option<u64>) -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp,
            incrementality: None,
            feed_version: None,
        }
    }

    fn entity(id: &str, vehicle: VehiclePosition) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            is_deleted: None,
            vehicle: Some(vehicle),
        }
    }

    fn encoded(entities: Vec<FeedEntity>, header_ts: Option<u64>) -> Vec<u8> {
        FeedMessage {
            header: header(header_ts),
            entity: entities,
        }
        .encode_to_vec()
    }

    #[test]
    fn test_parse_empty_bytes_returns_default_feed() {
        // Empty input is a valid (all-default) protobuf message.
        let feed = parse_feed(&[]).unwrap();
        assert_eq!(feed.header.gtfs_realtime_version, "");
        assert!(feed.entity.is_empty());
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let invalid_bytes = vec![0xFF, 0xFE, 0x00, 0x01];
        assert!(matches!(parse_feed(&invalid_bytes), Err(FeedError::Decode(_))));
    }

    #[test]
    fn test_decode_position_record() {
        let bytes = encoded(
            vec![entity(
                "e1",
                VehiclePosition {
                    vehicle: Some(VehicleDescriptor {
                        id: Some("bus-7".into()),
                        ..Default::default()
                    }),
                    position: Some(Position {
                        latitude: 43.5,
                        longitude: 5.25,
                        bearing: Some(180.0),
                        speed: Some(10.5),
                        odometer: None,
                    }),
                    stop_id: Some("STOP1".into()),
                    timestamp: Some(1_700_000_000),
                    ..Default::default()
                },
            )],
            Some(1_600_000_000),
        );

        let records = GtfsRtDecoder::new(PayloadKind::Position).decode(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.source_key, "bus-7");
        assert_eq!(r.observed_at, unix_seconds(1_700_000_000));
        assert_eq!(r.stop_or_line_key.as_deref(), Some("STOP1"));
        let pos = r.payload.position().unwrap();
        assert_eq!((pos.latitude, pos.longitude), (43.5, 5.25));
        assert_eq!(pos.bearing, Some(180.0));
    }

    #[test]
    fn test_fallbacks_to_entity_id_header_time_and_route() {
        let bytes = encoded(
            vec![entity(
                "e9",
                VehiclePosition {
                    trip: Some(TripDescriptor {
                        route_id: Some("L12".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )],
            Some(1_600_000_000),
        );

        let records = GtfsRtDecoder::new(PayloadKind::Position).decode(&bytes).unwrap();
        let r = &records[0];
        assert_eq!(r.source_key, "e9");
        assert_eq!(r.observed_at, unix_seconds(1_600_000_000));
        assert_eq!(r.stop_or_line_key.as_deref(), Some("L12"));
        // No position at all decodes to the no-fix sentinel.
        assert!(r.lacks_position());
    }

    #[test]
    fn test_deleted_and_non_vehicle_entities_are_dropped() {
        let mut deleted = entity("gone", VehiclePosition::default());
        deleted.is_deleted = Some(true);
        let no_vehicle = FeedEntity {
            id: "alert".into(),
            ..Default::default()
        };
        let bytes = encoded(vec![deleted, no_vehicle], None);

        let records = GtfsRtDecoder::new(PayloadKind::Position).decode(&bytes).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_occupancy_payload_skips_vehicles_without_occupancy() {
        let bytes = encoded(
            vec![
                entity(
                    "a",
                    VehiclePosition {
                        occupancy_status: Some(5),
                        ..Default::default()
                    },
                ),
                entity("b", VehiclePosition::default()),
            ],
            None,
        );

        let records = GtfsRtDecoder::new(PayloadKind::Occupancy).decode(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].payload,
            Payload::Occupancy {
                status: OccupancyStatus::Full
            }
        );
        assert_eq!(records[0].observed_at, None);
    }

    #[test]
    fn test_status_payload_defaults_to_in_transit() {
        let bytes = encoded(
            vec![
                entity(
                    "a",
                    VehiclePosition {
                        current_status: Some(VehicleStopStatus::StoppedAt as i32),
                        ..Default::default()
                    },
                ),
                entity("b", VehiclePosition::default()),
            ],
            None,
        );

        let records = GtfsRtDecoder::new(PayloadKind::Status).decode(&bytes).unwrap();
        assert_eq!(records[0].payload, Payload::Status { code: 1 });
        assert_eq!(records[1].payload, Payload::Status { code: 2 });
    }
}
