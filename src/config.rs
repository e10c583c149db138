//! JSON configuration for feeds and the directory.
//!
//! ```json
//! {
//!   "timezone": "Europe/Paris",
//!   "directory": { "base_url": "https://directory.example", "correlation_ttl_secs": 3600 },
//!   "feeds": [
//!     { "name": "bus-positions", "uri": "https://example/vehicle_positions.pb",
//!       "auth": { "type": "header", "header_name": "x-api-key", "key_ref": "BUS_FEED_KEY" } }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::decode::FeedFormat;
use crate::fetch::HttpClient;
use crate::fetch::auth::{ApiKey, UrlParam};
use crate::infra::keys::KeyStore;
use crate::model::PayloadKind;

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_startup_delay_secs() -> u64 {
    5
}

fn default_max_age_secs() -> u64 {
    300
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// IANA zone used to localize `observed_at`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub directory: Option<DirectorySettings>,
    pub feeds: Vec<FeedSettings>,
}

/// How outbound requests authenticate. Keys are referenced, not inlined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthSettings {
    #[default]
    None,
    Header { header_name: String, key_ref: String },
    UrlParam { param_name: String, key_ref: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySettings {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Entries older than this are looked up again. Absent: kept until the
    /// directory reloads.
    pub correlation_ttl_secs: Option<u64>,
    #[serde(default)]
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSettings {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub format: FeedFormat,
    #[serde(default)]
    pub payload: PayloadKind,
    /// Companion marker holding the feed's last-update time.
    pub last_update_uri: Option<String>,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    pub eviction_interval_secs: Option<u64>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub auth: AuthSettings,
}

impl SyncConfig {
    /// Loads and validates the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("cannot read config '{path}'"))?;
        let config: SyncConfig = serde_json::from_str(&content)
            .with_context(|| format!("cannot parse config '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            bail!("config defines no feeds");
        }
        self.timezone()?;

        let mut names = HashSet::new();
        for feed in &self.feeds {
            if !names.insert(feed.name.as_str()) {
                bail!("duplicate feed name '{}'", feed.name);
            }
            if feed.refresh_interval_secs == 0 {
                bail!("feed '{}': refresh_interval_secs must be positive", feed.name);
            }
            if feed.max_age_secs == 0 {
                bail!("feed '{}': max_age_secs must be positive", feed.name);
            }
            if feed.timeout_secs == 0 {
                bail!("feed '{}': timeout_secs must be positive", feed.name);
            }
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("unknown time zone '{}': {e}", self.timezone))
    }

    pub fn feed(&self, name: &str) -> Option<&FeedSettings> {
        self.feeds.iter().find(|f| f.name == name)
    }
}

impl FeedSettings {
    /// Settings for a single ad-hoc source with every default applied.
    pub fn for_source(name: &str, uri: &str, format: FeedFormat, payload: PayloadKind) -> Self {
        Self {
            name: name.to_string(),
            uri: uri.to_string(),
            format,
            payload,
            last_update_uri: None,
            refresh_interval_secs: default_refresh_interval_secs(),
            startup_delay_secs: 0,
            max_age_secs: default_max_age_secs(),
            eviction_interval_secs: None,
            timeout_secs: default_timeout_secs(),
            enabled: true,
            auth: AuthSettings::None,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Eviction runs on a coarser timer than refresh: a quarter of the max
    /// age, never more often than the refresh interval.
    pub fn eviction_interval(&self) -> Duration {
        let secs = self
            .eviction_interval_secs
            .unwrap_or_else(|| (self.max_age_secs / 4).max(self.refresh_interval_secs));
        Duration::from_secs(secs.max(1))
    }
}

impl AuthSettings {
    /// Wraps `inner` with the configured credential, resolving the key
    /// through `keys`.
    pub async fn wrap<C>(&self, inner: C, keys: &dyn KeyStore) -> Result<Box<dyn HttpClient>>
    where
        C: HttpClient + 'static,
    {
        Ok(match self {
            AuthSettings::None => Box::new(inner),
            AuthSettings::Header {
                header_name,
                key_ref,
            } => {
                let key = keys.get(key_ref).await?;
                Box::new(ApiKey::new(inner, header_name, &key)?)
            }
            AuthSettings::UrlParam {
                param_name,
                key_ref,
            } => {
                let key = keys.get(key_ref).await?;
                Box::new(UrlParam::new(inner, param_name.as_str(), key))
            }
        })
    }
}
