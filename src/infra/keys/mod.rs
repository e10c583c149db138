//! API-key resolution.
//!
//! Configuration names secrets by reference (`key_ref`); a [`KeyStore`]
//! turns the reference into its plaintext value. [`EnvKeyStore`] reads
//! references as environment variable names, so keys can live in `.env`.

use anyhow::{Context, Result};

/// Resolves a secret reference into its plaintext value.
#[async_trait::async_trait]
pub trait KeyStore: Send + Sync {
    async fn get(&self, reference: &str) -> Result<String>;
}

/// Looks secrets up in the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvKeyStore;

#[async_trait::async_trait]
impl KeyStore for EnvKeyStore {
    async fn get(&self, reference: &str) -> Result<String> {
        let value = std::env::var(reference)
            .with_context(|| format!("environment variable '{reference}' is not set"))?;
        if value.trim().is_empty() {
            anyhow::bail!("environment variable '{reference}' is empty");
        }
        Ok(value)
    }
}
