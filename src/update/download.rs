//! Package download

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use url::Url;

use super::error::{Result, UpdateError};

/// Minimum spacing between progress callbacks
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Update download progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Bytes downloaded so far
    pub downloaded: u64,
    /// Total bytes, when the server announced a length
    pub total: Option<u64>,
    /// Current download speed in bytes/second
    pub speed_bps: u64,
    /// Estimated time remaining in seconds
    pub eta_seconds: Option<u64>,
}

impl DownloadProgress {
    /// Progress snapshot after `elapsed` of transfer
    pub fn measure(downloaded: u64, total: Option<u64>, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let speed_bps = if secs > 0.0 {
            (downloaded as f64 / secs) as u64
        } else {
            0
        };
        let eta_seconds = match total {
            Some(total) if speed_bps > 0 && downloaded < total => {
                Some((total - downloaded) / speed_bps)
            }
            _ => None,
        };
        Self {
            downloaded,
            total,
            speed_bps,
            eta_seconds,
        }
    }

    /// Download percentage (0-100), if the total is known
    pub fn percentage(&self) -> Option<u8> {
        self.total.map(|total| calculate_percentage(self.downloaded, total))
    }
}

/// Clamp `downloaded / total` into 0..=100
pub fn calculate_percentage(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((downloaded as f64 / total as f64) * 100.0).min(100.0) as u8
}

/// Receives progress while a package streams in
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Trait for package downloaders
#[async_trait]
pub trait PackageDownloader: Send + Sync {
    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// Dropping the future abandons the transfer; the caller owns cleanup of
    /// `dest`.
    async fn download(&self, url: &Url, dest: &Path, progress: ProgressCallback) -> Result<u64>;
}

/// HTTP package downloader
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Reuse an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PackageDownloader for HttpDownloader {
    async fn download(&self, url: &Url, dest: &Path, progress: ProgressCallback) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!("Downloading update from: {}", url);

        let mut response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(UpdateError::Network(format!(
                "Server returned status: {}",
                response.status()
            )));
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(dest).await?;

        let start_time = Instant::now();
        let mut last_progress_time = start_time;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            let now = Instant::now();
            if now.duration_since(last_progress_time) >= PROGRESS_INTERVAL {
                last_progress_time = now;
                progress(DownloadProgress::measure(
                    downloaded,
                    total,
                    now.duration_since(start_time),
                ));
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        if let Some(total) = total {
            if downloaded != total {
                return Err(UpdateError::Network(format!(
                    "Download truncated: got {} of {} bytes",
                    downloaded, total
                )));
            }
        }

        progress(DownloadProgress::measure(
            downloaded,
            total,
            start_time.elapsed(),
        ));
        tracing::info!("Downloaded {} bytes to {}", downloaded, dest.display());

        Ok(downloaded)
    }
}
