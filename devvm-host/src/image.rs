//! Boot image caching.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::error::{HostError, Result};

/// Downloads boot images ahead of machine creation.
#[async_trait]
pub trait ImageCache: Send + Sync {
    /// Make the image at `url` available locally. An empty URL is a no-op.
    async fn cache_image_from_url(&self, url: &str) -> Result<()>;
}

/// Cache storing ISOs under a directory, keyed by file name.
pub struct IsoCache {
    cache_dir: PathBuf,
    client: reqwest::Client,
}

impl IsoCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Local path for a cached image. Query and fragment are not part of the name.
    pub fn cached_path(&self, url: &str) -> Result<PathBuf> {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let file_name = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && !name.contains(':'))
            .ok_or_else(|| HostError::ImageCache(format!("no file name in {:?}", url)))?;
        Ok(self.cache_dir.join(file_name))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HostError::ImageCache(format!("requesting {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(HostError::ImageCache(format!(
                "downloading {}: {}",
                url,
                response.status()
            )));
        }

        let tmp = dest.with_extension("download");
        let mut file = File::create(&tmp).await.map_err(cache_io(&tmp))?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| HostError::ImageCache(format!("reading {}: {}", url, e)))?;
            file.write_all(&chunk).await.map_err(cache_io(&tmp))?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await.map_err(cache_io(&tmp))?;

        fs::rename(&tmp, dest).await.map_err(cache_io(dest))?;
        info!(bytes = downloaded, path = %dest.display(), "Image downloaded");
        Ok(())
    }
}

fn cache_io(path: &Path) -> impl FnOnce(std::io::Error) -> HostError + '_ {
    move |e| HostError::ImageCache(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl ImageCache for IsoCache {
    #[instrument(skip(self))]
    async fn cache_image_from_url(&self, url: &str) -> Result<()> {
        if url.is_empty() {
            debug!("No boot image configured");
            return Ok(());
        }

        let dest = self.cached_path(url)?;
        if fs::try_exists(&dest).await.map_err(cache_io(&dest))? {
            debug!(path = %dest.display(), "Image already cached");
            return Ok(());
        }

        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(cache_io(&self.cache_dir))?;

        match url.strip_prefix("file://") {
            Some(source) => {
                fs::copy(source, &dest).await.map_err(cache_io(Path::new(source)))?;
                info!(source = %source, "Image copied into cache");
                Ok(())
            }
            None => self.download(url, &dest).await,
        }
    }
}
