//! Outbound HTTP and file access for feeds and the directory.

mod basic;
mod client;
pub mod auth;
mod transport;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use transport::{FeedTransport, SourceTransport};

use std::time::Duration;

use bytes::Bytes;

use crate::error::FeedError;

/// GETs `url` through `client`, bounding the whole request by `timeout`.
///
/// Non-2xx responses are transport errors.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    timeout: Duration,
) -> Result<Bytes, FeedError> {
    let parsed = url.parse().map_err(|e| FeedError::Transport {
        uri: url.to_string(),
        message: format!("invalid url: {e}"),
    })?;
    let mut req = reqwest::Request::new(reqwest::Method::GET, parsed);
    *req.timeout_mut() = Some(timeout);

    let resp = client
        .execute(req)
        .await
        .map_err(|e| FeedError::from_reqwest(url, timeout, e))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(FeedError::Transport {
            uri: url.to_string(),
            message: format!("upstream returned status {status}"),
        });
    }

    resp.bytes()
        .await
        .map_err(|e| FeedError::from_reqwest(url, timeout, e))
}
