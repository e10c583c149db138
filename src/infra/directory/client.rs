use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Request, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use crate::clock::Clock;
use crate::error::FeedError;
use crate::fetch::HttpClient;
use crate::model::EnrichmentRecord;
use crate::services::directory_api::EnrichmentClient;

#[derive(Deserialize)]
struct DirectoryEntry {
    id: String,
    source_code: Option<String>,
    #[serde(default)]
    stops: Vec<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    last_reload: String,
}

/// HTTP JSON directory.
///
/// - `GET {base}/v1/vehicles?source_code=<code>` returns a list of entries;
///   an empty list or a 404 means the code is unknown.
/// - `GET {base}/v1/status` returns `{ "last_reload": "<token>" }`.
pub struct DirectoryClient<C> {
    client: C,
    base_url: Url,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl<C: HttpClient> DirectoryClient<C> {
    pub fn new(client: C, base_url: &str, timeout: Duration, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| anyhow::anyhow!("invalid directory url '{base_url}': {e}"))?;
        Ok(Self {
            client,
            base_url,
            timeout,
            clock,
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, FeedError> {
        let raw = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        let parsed = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        parsed.map_err(|e| FeedError::Directory(format!("cannot build url '{raw}': {e}")))
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, FeedError> {
        let uri = url.to_string();
        let mut req = Request::new(Method::GET, url);
        *req.timeout_mut() = Some(self.timeout);
        self.client
            .execute(req)
            .await
            .map_err(|e| FeedError::from_reqwest(&uri, self.timeout, e))
    }
}

#[async_trait]
impl<C: HttpClient> EnrichmentClient for DirectoryClient<C> {
    async fn lookup_by_source_code(&self, code: &str) -> Result<Option<EnrichmentRecord>, FeedError> {
        let url = self.endpoint("/v1/vehicles", &[("source_code", code)])?;
        let uri = url.to_string();
        let response = self.get(url).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(code, "Directory has no entry");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FeedError::Directory(format!(
                "lookup for '{code}' returned status {status}"
            )));
        }

        let entries: Vec<DirectoryEntry> = response
            .json()
            .await
            .map_err(|e| FeedError::from_reqwest(&uri, self.timeout, e))?;

        let Some(entry) = entries.into_iter().next() else {
            debug!(code, "Directory has no entry");
            return Ok(None);
        };

        Ok(Some(EnrichmentRecord {
            canonical_key: entry.id,
            natural_key: entry.source_code.unwrap_or_else(|| code.to_string()),
            associated_stops: entry.stops,
            created_at: self.clock.now(),
        }))
    }

    async fn freshness_token(&self) -> Result<String, FeedError> {
        let url = self.endpoint("/v1/status", &[])?;
        let uri = url.to_string();
        let response = self.get(url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Directory(format!(
                "status endpoint returned {status}"
            )));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| FeedError::from_reqwest(&uri, self.timeout, e))?;
        Ok(body.last_reload)
    }
}
