//! Asset fetcher collaborator.

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use thiserror::Error;

/// Transient local handle to a fetched asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHandle {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl AssetHandle {
    pub fn new(name: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            content_type,
            bytes,
        }
    }
}

/// Asset fetch failures.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("invalid asset url: {0}")]
    InvalidUrl(String),
}

/// Fetch-by-name collaborator, independent of the stream.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch_asset(&self, name: &str, token: &str) -> Result<AssetHandle, AssetError>;
}

/// Fetches `<base_url>/<name>` with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpAssetFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAssetFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn asset_url(&self, name: &str) -> Result<reqwest::Url, AssetError> {
        let raw = format!("{}/{}", self.base_url, urlencoding::encode(name));
        reqwest::Url::parse(&raw).map_err(|e| AssetError::InvalidUrl(format!("{raw}: {e}")))
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch_asset(&self, name: &str, token: &str) -> Result<AssetHandle, AssetError> {
        let url = self.asset_url(name)?;
        debug!("Fetching asset {} from {}", name, url);

        let response = self.client.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::Status(status.as_u16()));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        Ok(AssetHandle::new(name, content_type, bytes))
    }
}
