use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("download failed ({url}): {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    AlreadyPresent,
    Downloaded { bytes: u64 },
}

/// Fetches the server artifact on first use.
#[derive(Debug, Clone)]
pub struct Provisioner {
    client: reqwest::Client,
}

impl Provisioner {
    pub fn new() -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("launchpad/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(15 * 60))
            .build()
            .map_err(ProvisionError::Client)?;
        Ok(Self { client })
    }

    /// Succeeds immediately when `target` exists; no integrity check is done.
    pub async fn ensure(&self, target: &Path, url: &str) -> Result<ProvisionOutcome, ProvisionError> {
        if target.exists() {
            return Ok(ProvisionOutcome::AlreadyPresent);
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ProvisionError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tracing::info!(%url, path = %target.display(), "downloading server artifact");

        // Partial downloads never land at `target`, so an interrupted fetch is retried next time.
        let tmp = target.with_extension("part");
        let res = self.download_to(url, &tmp).await;
        let bytes = match res {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(err);
            }
        };

        tokio::fs::rename(&tmp, target)
            .await
            .map_err(|source| ProvisionError::Io {
                path: target.to_path_buf(),
                source,
            })?;

        tracing::info!(bytes, path = %target.display(), "download completed");
        Ok(ProvisionOutcome::Downloaded { bytes })
    }

    async fn download_to(&self, url: &str, path: &Path) -> Result<u64, ProvisionError> {
        let network = |source| ProvisionError::Network {
            url: url.to_string(),
            source,
        };
        let io = |source| ProvisionError::Io {
            path: path.to_path_buf(),
            source,
        };

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(network)?
            .error_for_status()
            .map_err(network)?;

        let mut f = tokio::fs::File::create(path).await.map_err(io)?;
        let mut total: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(network)?;
            total = total.saturating_add(chunk.len() as u64);
            f.write_all(&chunk).await.map_err(io)?;
        }
        f.flush().await.map_err(io)?;
        f.sync_all().await.map_err(io)?;
        Ok(total)
    }
}
