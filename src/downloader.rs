//! Part downloads into scoped local storage
//!
//! Each part is streamed from the [`FileFetcher`] into a temporary file while
//! its SHA-256 is computed. The file is removed when the [`DownloadedPart`]
//! is dropped, whichever way the release ends.

use crate::config::{DownloadConfig, RetryConfig};
use crate::error::FetchFailure;
use crate::fetcher::FileFetcher;
use crate::retry::retry_transient;
use crate::transport::OutgoingFile;
use crate::types::{Fingerprint, PartLink};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

/// A fetched part held in scoped local storage
#[derive(Debug)]
pub struct DownloadedPart {
    /// Link the part was fetched from
    pub link: PartLink,
    /// File name to present in the destination
    pub file_name: String,
    /// Bytes received
    pub size_bytes: u64,
    /// SHA-256 of the content, lowercase hex
    pub content_hash: String,
    file: NamedTempFile,
}

impl DownloadedPart {
    /// Path of the local copy; valid while `self` is alive
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Fingerprint including the content hash and size
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            release: self.link.release.clone(),
            index: self.link.index,
            content_hash: Some(self.content_hash.clone()),
            size_bytes: Some(self.size_bytes),
        }
    }

    /// Description for the chat transport
    pub fn outgoing(&self) -> OutgoingFile {
        OutgoingFile {
            path: self.path().to_path_buf(),
            file_name: self.file_name.clone(),
            size_bytes: self.size_bytes,
        }
    }
}

/// Fetches parts with retry and verifies what was received
pub struct Downloader {
    fetcher: Arc<dyn FileFetcher>,
    temp_dir: PathBuf,
    retry: RetryConfig,
}

impl Downloader {
    /// Create a downloader writing into `config.temp_dir`
    pub fn new(fetcher: Arc<dyn FileFetcher>, config: &DownloadConfig, retry: RetryConfig) -> Self {
        Self {
            fetcher,
            temp_dir: config.temp_dir.clone(),
            retry,
        }
    }

    /// Fetch one part
    ///
    /// Transient failures are retried with backoff; a permanent failure or
    /// exhausted retries return the last [`FetchFailure`].
    pub async fn fetch(&self, link: &PartLink) -> Result<DownloadedPart, FetchFailure> {
        let label = format!("{} part {}", link.title, link.index);
        let part = retry_transient(&self.retry, &label, || self.fetch_once(link)).await?;

        tracing::info!(
            release = %link.title,
            part_index = link.index,
            size_bytes = part.size_bytes,
            hash = %part.content_hash,
            "Part downloaded"
        );

        Ok(part)
    }

    async fn fetch_once(&self, link: &PartLink) -> Result<DownloadedPart, FetchFailure> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let fetched = self.fetcher.resolve(&link.locator).await?;

        let temp = tempfile::Builder::new()
            .prefix("part-")
            .tempfile_in(&self.temp_dir)?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);

        let mut hasher = Sha256::new();
        let mut size_bytes = 0u64;
        let mut body = fetched.body;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            size_bytes += chunk.len() as u64;
        }
        file.flush().await?;

        if let Some(expected) = fetched.content_length
            && expected != size_bytes
        {
            return Err(FetchFailure::Transient(format!(
                "size mismatch for file {}: expected {} bytes, received {}",
                link.locator.file_id, expected, size_bytes
            )));
        }

        let file_name = fetched
            .file_name
            .as_deref()
            .and_then(|name| Path::new(name).file_name())
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| default_file_name(link));

        Ok(DownloadedPart {
            link: link.clone(),
            file_name,
            size_bytes,
            content_hash: format!("{:x}", hasher.finalize()),
            file: temp,
        })
    }
}

/// `"<title>.part<i>"` for hosts that do not announce a file name
fn default_file_name(link: &PartLink) -> String {
    let stem: String = link
        .title
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}.part{}", stem, link.index)
}
