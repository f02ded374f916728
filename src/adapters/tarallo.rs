//! Tarallo Inventory Adapter
//!
//! Implements the `Inventory` port against the Tarallo HTTP API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, instrument};

use crate::domain::ports::Inventory;
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for the inventory
#[derive(Clone)]
pub struct InventoryConfig {
    /// Base URL, e.g. `https://tarallo.example.org`
    pub base_url: String,

    /// API token
    pub token: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for InventoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the Tarallo inventory
pub struct TaralloClient {
    config: InventoryConfig,
    client: Client,
}

impl TaralloClient {
    /// Create a new inventory client
    pub fn new(config: InventoryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Authorization", format!("Token {}", self.config.token))
    }

    async fn send(&self, path: &str, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(Error::InventoryConnection)?;
        debug!(path, status = %response.status(), "Inventory response");
        Ok(response)
    }
}

impl std::fmt::Debug for TaralloClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaralloClient")
            .field("config", &self.config)
            .finish()
    }
}

fn status_error(path: &str, status: StatusCode) -> Error {
    Error::InventoryStatus {
        path: path.to_string(),
        status: status.as_u16(),
    }
}

#[async_trait]
impl Inventory for TaralloClient {
    #[instrument(skip(self))]
    async fn codes_by_feature(&self, feature: &str, value: &str) -> Result<Vec<String>> {
        let path = format!(
            "/v2/features/{}/{}",
            urlencoding::encode(feature),
            urlencoding::encode(value)
        );
        let response = self.send(&path, self.client.get(self.url(&path))).await?;

        match response.status() {
            // Nothing has that feature
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => response
                .json::<Vec<String>>()
                .await
                .map_err(Error::InventoryConnection),
            status => Err(status_error(&path, status)),
        }
    }

    #[instrument(skip(self))]
    async fn get_item(&self, code: &str) -> Result<serde_json::Value> {
        let path = format!("/v2/items/{}", urlencoding::encode(code));
        let request = self.client.get(self.url(&path)).query(&[("depth", "0")]);
        let response = self.send(&path, request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(&path, status));
        }
        response.json().await.map_err(Error::InventoryConnection)
    }

    #[instrument(skip(self))]
    async fn update_features(&self, code: &str, features: &BTreeMap<String, String>) -> Result<()> {
        let path = format!("/v2/items/{}/features", urlencoding::encode(code));
        let request = self.client.patch(self.url(&path)).json(features);
        let response = self.send(&path, request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(&path, status));
        }
        Ok(())
    }
}
