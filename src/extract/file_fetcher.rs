//! Binary file retrieval.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// What happened to one download attempt.
///
/// Ordinary network and not-found failures land in `error`, never in a
/// panic or `Err` — the owning batch records the failure and keeps going.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub downloaded: bool,
    pub local_path: PathBuf,
    pub error: Option<String>,
}

impl FetchResult {
    fn success(local_path: PathBuf) -> Self {
        Self {
            downloaded: true,
            local_path,
            error: None,
        }
    }

    fn failure(local_path: PathBuf, error: impl Into<String>) -> Self {
        Self {
            downloaded: false,
            local_path,
            error: Some(error.into()),
        }
    }
}

/// Retrieves one remote file to a local destination.
///
/// Calling twice with the same destination overwrites rather than
/// duplicating, so retried batches are safe. Retry pacing is owned by the
/// dispatcher, not implementations.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn download(&self, url: &str, destination: &Path) -> FetchResult;
}

/// [`FileFetcher`] over HTTP(S).
pub struct HttpFileFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFileFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn try_download(&self, url: &str, destination: &Path) -> Result<(), String> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("creating {}: {e}", parent.display()))?;
        }

        let mut response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| format!("creating {}: {e}", destination.display()))?;

        while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("writing {}: {e}", destination.display()))?;
        }
        file.flush()
            .await
            .map_err(|e| format!("flushing {}: {e}", destination.display()))?;

        Ok(())
    }
}

#[async_trait]
impl FileFetcher for HttpFileFetcher {
    async fn download(&self, url: &str, destination: &Path) -> FetchResult {
        match self.try_download(url, destination).await {
            Ok(()) => {
                debug!(url, destination = %destination.display(), "downloaded file");
                FetchResult::success(destination.to_path_buf())
            }
            Err(error) => {
                warn!(url, error = %error, "download failed");
                FetchResult::failure(destination.to_path_buf(), format!("{url}: {error}"))
            }
        }
    }
}
