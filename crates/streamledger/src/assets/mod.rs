//! Asset fetching for items that reference binary assets.
//!
//! Fetches run as independent tokio tasks, one per referenced name, and
//! never block ledger progress. [`AssetCache`] deduplicates by name.

mod cache;
mod fetcher;

pub use cache::{AssetCache, AssetSlot, MAX_FETCH_ATTEMPTS};
pub use fetcher::{AssetError, AssetFetcher, AssetHandle, HttpAssetFetcher};

use log::{debug, warn};
use std::sync::Arc;

use crate::credentials::Credentials;

/// Reduce an asset reference (`/uploads/x/a%20b.png`) to its name (`a b.png`).
pub fn asset_name(reference: &str) -> String {
    let last = reference
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(reference);
    urlencoding::decode(last)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| last.to_string())
}

/// Dispatches fetches for referenced assets into an [`AssetCache`].
#[derive(Clone)]
pub struct AssetDispatcher {
    fetcher: Arc<dyn AssetFetcher>,
    cache: AssetCache,
}

impl AssetDispatcher {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            fetcher,
            cache: AssetCache::new(),
        }
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// Start fetches for names not already pending or fetched. Returns the
    /// join handles of the spawned tasks. Must be called inside a tokio
    /// runtime.
    pub fn dispatch(
        &self,
        names: &[String],
        credentials: &Credentials,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        for name in names {
            if !self.cache.claim(name) {
                debug!("Asset {} already requested", name);
                continue;
            }
            let fetcher = self.fetcher.clone();
            let cache = self.cache.clone();
            let name = name.clone();
            let token = credentials.token.clone();
            handles.push(tokio::spawn(async move {
                match fetcher.fetch_asset(&name, &token).await {
                    Ok(handle) => cache.fulfil(handle),
                    Err(e) => {
                        warn!("Failed to fetch asset {}: {}", name, e);
                        cache.fail(&name, e.to_string());
                    }
                }
            }));
        }
        handles
    }
}
