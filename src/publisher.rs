//! Release publishing
//!
//! Sends a complete release's parts to the destination channel in ascending
//! index order, then commits the release's fingerprints in one step. A send
//! failure stops the release without committing anything.

use crate::aggregate::ReleaseBundle;
use crate::dedup::DedupIndex;
use crate::downloader::DownloadedPart;
use crate::error::{Error, Result, SendFailure};
use crate::transport::ChatTransport;
use crate::types::{ChannelId, Fingerprint};
use std::sync::Arc;

/// Outcome of a publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    /// Every part was sent and committed
    Published {
        /// Number of parts sent
        parts: u32,
    },
    /// The release's fingerprints were already committed; nothing was sent
    AlreadyPublished,
    /// Sending stopped at `index` (0 for the announcement text)
    Failed {
        /// Part that could not be sent
        index: u32,
        /// Transport error
        error: SendFailure,
    },
}

/// Caption attached to each published part
pub fn caption(title: &str, index: u32, total: u32) -> String {
    format!("{} - part {} of {}", title, index, total)
}

/// Sends complete releases to the destination channel
pub struct ReleasePublisher {
    transport: Arc<dyn ChatTransport>,
    destination: ChannelId,
    dedup: Arc<DedupIndex>,
    announce: bool,
}

impl ReleasePublisher {
    /// Create a publisher for `destination`
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        destination: ChannelId,
        dedup: Arc<DedupIndex>,
        announce: bool,
    ) -> Self {
        Self {
            transport,
            destination,
            dedup,
            announce,
        }
    }

    /// Publish `bundle` using its downloaded parts
    ///
    /// Returns [`Error::IncompleteRelease`] if the bundle or the downloaded
    /// parts do not cover every index `1..=total`. The parts' local storage is
    /// released when this returns.
    pub async fn publish(
        &self,
        bundle: &ReleaseBundle,
        mut parts: Vec<DownloadedPart>,
    ) -> Result<PublishResult> {
        let total = match bundle.declared_total {
            Some(total) if bundle.is_complete() => total,
            _ => {
                return Err(Error::IncompleteRelease {
                    release: bundle.title.clone(),
                    missing: bundle.missing(),
                });
            }
        };

        parts.sort_by_key(|p| p.link.index);
        let indices: Vec<u32> = parts.iter().map(|p| p.link.index).collect();
        if indices != (1..=total).collect::<Vec<_>>() {
            return Err(Error::IncompleteRelease {
                release: bundle.title.clone(),
                missing: (1..=total).filter(|i| !indices.contains(i)).collect(),
            });
        }

        if self.dedup.has_all(&bundle.fingerprints()).await {
            tracing::info!(release = %bundle.title, "Release already published, skipping");
            return Ok(PublishResult::AlreadyPublished);
        }

        if self.announce
            && let Err(error) = self.transport.send_text(&self.destination, &bundle.title).await
        {
            tracing::warn!(release = %bundle.title, error = %error, "Announcement failed");
            return Ok(PublishResult::Failed { index: 0, error });
        }

        for part in &parts {
            let index = part.link.index;
            let caption = caption(&bundle.title, index, total);
            if let Err(error) = self
                .transport
                .send_file(&self.destination, &part.outgoing(), &caption)
                .await
            {
                tracing::warn!(
                    release = %bundle.title,
                    part_index = index,
                    error = %error,
                    "Send failed, aborting release"
                );
                return Ok(PublishResult::Failed { index, error });
            }
            tracing::debug!(release = %bundle.title, part_index = index, "Part sent");
        }

        let fingerprints: Vec<Fingerprint> = parts.iter().map(|p| p.fingerprint()).collect();
        self.dedup.commit_all(&bundle.title, &fingerprints).await?;

        tracing::info!(release = %bundle.title, parts = total, "Release published");
        Ok(PublishResult::Published { parts: total })
    }
}
