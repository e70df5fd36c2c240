//! Access-token acquisition for outbound calls.
//!
//! Authentication is an external collaborator with a simple request/response
//! contract: the relay asks a [`TokenSource`] for a bearer token and attaches
//! it to storage and notifier requests. In production the token comes from
//! the GCE instance metadata server; tests use a static token.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default metadata-server token endpoint.
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Scopes requested for storage and downstream calls.
const DEFAULT_SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

/// Source of OAuth bearer tokens.
#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// Returns a currently-valid access token.
    async fn access_token(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Token source backed by the GCE instance metadata server.
#[derive(Debug, Clone)]
pub struct MetadataTokenSource {
    client: reqwest::Client,
    endpoint: String,
}

impl MetadataTokenSource {
    /// Creates a metadata-server token source with the default endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Error::Token` if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self> {
        Self::with_endpoint(METADATA_TOKEN_URL)
    }

    /// Creates a metadata-server token source against a custom endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Error::Token` if the HTTP client cannot be constructed.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::token(format!("failed to build metadata client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn access_token(&self) -> Result<String> {
        let scopes = DEFAULT_SCOPES.join(",");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("scopes", scopes.as_str())])
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| Error::token(format!("metadata server unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::token(format!(
                "metadata server returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::token(format!("malformed token response: {e}")))?;

        Ok(token.access_token)
    }
}

/// Token source that always returns a fixed token.
///
/// For tests and local development against emulators.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Creates a static token source.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_returns_token() {
        let source = StaticTokenSource::new("test-token");
        assert_eq!(source.access_token().await.unwrap(), "test-token");
    }
}
