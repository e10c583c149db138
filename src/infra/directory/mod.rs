//! [`EnrichmentClient`](crate::services::directory_api::EnrichmentClient)
//! implementations.

mod client;
mod passthrough;

pub use client::DirectoryClient;
pub use passthrough::PassthroughDirectory;
