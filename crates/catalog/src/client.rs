//! Model catalog access.
//!
//! [`CivitaiClient`] talks to a CivitAI-compatible REST API. Jobs only see
//! the [`ModelCatalog`] trait so they can run against a fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tracing::{debug, error};

pub const DEFAULT_BASE_URL: &str = "https://civitai.com/api/v1";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("not found in catalog")]
    NotFound,
    #[error("catalog returned HTTP {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Model version whose file has the given SHA-256.
    async fn model_version_by_hash(&self, sha256: &str) -> Result<Value, CatalogError>;

    async fn model(&self, id: u64) -> Result<Value, CatalogError>;

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, CatalogError>;
}

#[derive(Clone)]
pub struct CivitaiClient {
    base_url: String,
    http: reqwest::Client,
    api_timeout: Duration,
    download_timeout: Duration,
}

impl CivitaiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_timeout: Duration,
        download_timeout: Duration,
    ) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            api_timeout,
            download_timeout,
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value, CatalogError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "catalog request");

        let resp = self
            .http
            .get(&url)
            .timeout(self.api_timeout)
            .send()
            .await
            .map_err(|err| {
                error!("catalog request failed: {err}");
                err
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound);
        }
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }

        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl ModelCatalog for CivitaiClient {
    async fn model_version_by_hash(&self, sha256: &str) -> Result<Value, CatalogError> {
        self.get_json(&format!("/model-versions/by-hash/{sha256}")).await
    }

    async fn model(&self, id: u64) -> Result<Value, CatalogError> {
        self.get_json(&format!("/models/{id}")).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, CatalogError> {
        let resp = self
            .http
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound);
        }
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }

        let mut body = Vec::with_capacity(resp.content_length().unwrap_or(0) as usize);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body)
    }
}
