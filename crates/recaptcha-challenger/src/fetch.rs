//! Streamed download of challenge assets.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::types::{ChallengeError, ChallengeResult};

/// Browser-like user agent for asset requests.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Retrieves a remote binary resource into a local file.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Download `url` to `dest`, overwriting it. No retry at this layer.
    async fn download(&self, url: &str, dest: &Path) -> ChallengeResult<u64>;
}

/// HTTP fetcher. Proxies come from the usual `HTTP(S)_PROXY` environment.
#[derive(Clone)]
pub struct HttpAssetFetcher {
    client: reqwest::Client,
}

impl Default for HttpAssetFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS)
    }
}

impl HttpAssetFetcher {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn download(&self, url: &str, dest: &Path) -> ChallengeResult<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ChallengeError::Download(format!("GET {url}: {e}")))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ChallengeError::Download(format!("Reading body of {url}: {e}")))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::debug!(url, bytes = written, path = %dest.display(), "Asset downloaded");
        Ok(written)
    }
}
