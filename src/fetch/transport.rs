use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;

use super::{HttpClient, fetch_bytes};
use crate::error::FeedError;

/// Fetches raw bytes for a feed or marker URI.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<Bytes, FeedError>;
}

/// Serves `http(s)://` URIs through an [`HttpClient`] and anything else from
/// the local filesystem. `.gz` files are decompressed.
pub struct SourceTransport<C> {
    client: C,
}

impl<C: HttpClient> SourceTransport<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: HttpClient> FeedTransport for SourceTransport<C> {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<Bytes, FeedError> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            fetch_bytes(&self.client, uri, timeout).await
        } else {
            read_file(uri, timeout).await
        }
    }
}

async fn read_file(uri: &str, timeout: Duration) -> Result<Bytes, FeedError> {
    let path = uri.strip_prefix("file://").unwrap_or(uri).to_string();
    let task = tokio::task::spawn_blocking(move || read_local(&path));

    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(FeedError::Timeout {
            uri: uri.to_string(),
            timeout,
        }),
        Ok(Err(join)) => Err(FeedError::Io(std::io::Error::other(join))),
        Ok(Ok(result)) => result,
    }
}

fn read_local(path: &str) -> Result<Bytes, FeedError> {
    let raw = std::fs::read(path)?;
    if !path.ends_with(".gz") {
        return Ok(Bytes::from(raw));
    }

    let mut decoded = Vec::new();
    GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
    Ok(Bytes::from(decoded))
}
