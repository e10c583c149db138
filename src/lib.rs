//! Live-feed synchronization cache for GTFS-RT and vendor JSON vehicle feeds.
//!
//! A [`FeedEngine`](engine::FeedEngine) periodically pulls a feed, enriches
//! each record through a directory service (cached in a
//! [`CorrelationCache`](correlation::CorrelationCache)), and merges the
//! result into a [`LiveRecordStore`](store::LiveRecordStore) that many
//! readers can query concurrently.

pub mod clock;
pub mod config;
pub mod correlation;
pub mod decode;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod infra;
pub mod metrics;
pub mod model;
pub mod output;
pub mod query;
pub mod services;
pub mod stats;
pub mod store;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
