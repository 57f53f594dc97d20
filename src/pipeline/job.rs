//! Per-release download and publish job.

use crate::aggregate::{PartAggregator, PartFailure, ReleaseBundle};
use crate::downloader::{DownloadedPart, Downloader};
use crate::error::{FailureKind, FetchFailure};
use crate::publisher::{PublishResult, ReleasePublisher};
use crate::types::{Event, Locator, ReleaseState};
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// Downloads every part of one complete release, then publishes it
///
/// The bundle is a snapshot taken when the release was scheduled. Parts are
/// all downloaded before anything is sent.
pub(crate) struct ReleaseJob {
    pub(crate) bundle: ReleaseBundle,
    pub(crate) aggregator: Arc<Mutex<PartAggregator>>,
    pub(crate) downloader: Arc<Downloader>,
    pub(crate) publisher: Arc<ReleasePublisher>,
    pub(crate) release_slots: Arc<Semaphore>,
    pub(crate) part_concurrency: usize,
    pub(crate) cancel: CancellationToken,
    pub(crate) event_tx: broadcast::Sender<Event>,
}

impl ReleaseJob {
    pub(crate) async fn run(self) {
        let _permit = tokio::select! {
            permit = self.release_slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.abandon().await;
                    return;
                }
            },
            _ = self.cancel.cancelled() => {
                self.abandon().await;
                return;
            }
        };

        let parts = tokio::select! {
            result = self.download_all() => result,
            _ = self.cancel.cancelled() => {
                tracing::info!(release = %self.bundle.title, "Download cancelled");
                self.abandon().await;
                return;
            }
        };

        let parts = match parts {
            Ok(parts) => parts,
            Err((index, locator, failure)) => {
                self.fail(index, locator, failure.kind(), failure.reason().to_string())
                    .await;
                return;
            }
        };

        if self.cancel.is_cancelled() {
            self.abandon().await;
            return;
        }

        if !self.begin_publishing().await {
            return;
        }
        let _ = self.event_tx.send(Event::Publishing {
            release: self.bundle.release.clone(),
        });

        // Not cancellable: an interrupted publish would leave a half-sent release
        match self.publisher.publish(&self.bundle, parts).await {
            Ok(PublishResult::Published { parts }) => {
                self.transition(ReleaseState::Done).await;
                let _ = self.event_tx.send(Event::Published {
                    release: self.bundle.release.clone(),
                    parts,
                });
            }
            Ok(PublishResult::AlreadyPublished) => {
                self.transition(ReleaseState::Done).await;
                let _ = self.event_tx.send(Event::ReleaseSkipped {
                    release: self.bundle.release.clone(),
                });
            }
            Ok(PublishResult::Failed { index, error }) => {
                let locator = self.locator_of(index);
                self.fail(index, locator, FailureKind::Send, error.message)
                    .await;
            }
            Err(e) => {
                // Parts may already be in the destination; retrying automatically could duplicate them
                tracing::error!(
                    release = %self.bundle.title,
                    error = %e,
                    "Publish could not be completed"
                );
                let locator = self.locator_of(0);
                self.fail(0, locator, FailureKind::Permanent, e.to_string())
                    .await;
            }
        }
    }

    /// Fetch every part, stopping at the first failure
    async fn download_all(&self) -> Result<Vec<DownloadedPart>, (u32, Locator, FetchFailure)> {
        futures::stream::iter(self.bundle.ordered_parts())
            .map(|link| async move {
                let _ = self.event_tx.send(Event::Downloading {
                    release: link.release.clone(),
                    index: link.index,
                });
                self.downloader
                    .fetch(&link)
                    .await
                    .map_err(|failure| (link.index, link.locator.clone(), failure))
            })
            .buffered(self.part_concurrency.max(1))
            .try_collect()
            .await
    }

    /// Move to `Publishing` if the release still matches the snapshot
    ///
    /// Messages seen while downloading may raise the total or replace a part.
    /// The downloaded parts are then stale, and the release goes back to
    /// `CompleteUnverified` (still complete) or `Pending` to be scheduled again.
    async fn begin_publishing(&self) -> bool {
        let mut aggregator = self.aggregator.lock().await;
        let Some(live) = aggregator.get(&self.bundle.release) else {
            return false;
        };

        let unchanged = live.declared_total == self.bundle.declared_total
            && live.parts.len() == self.bundle.parts.len()
            && live.parts.iter().all(|(index, link)| {
                self.bundle
                    .parts
                    .get(index)
                    .is_some_and(|snap| snap.locator == link.locator)
            });
        if unchanged {
            aggregator.transition(&self.bundle.release, ReleaseState::Publishing);
            return true;
        }

        let next = if live.is_complete() {
            ReleaseState::CompleteUnverified
        } else {
            ReleaseState::Pending
        };
        tracing::info!(
            release = %self.bundle.title,
            total = ?live.declared_total,
            "Release changed while downloading, not publishing stale parts"
        );
        aggregator.transition(&self.bundle.release, next);
        false
    }

    fn locator_of(&self, index: u32) -> Locator {
        self.bundle
            .parts
            .get(&index)
            .or_else(|| self.bundle.parts.values().next())
            .map(|link| link.locator.clone())
            .unwrap_or_else(|| Locator {
                file_id: String::new(),
                url: String::new(),
            })
    }

    async fn transition(&self, state: ReleaseState) {
        self.aggregator
            .lock()
            .await
            .transition(&self.bundle.release, state);
    }

    async fn fail(&self, index: u32, locator: Locator, kind: FailureKind, reason: String) {
        tracing::error!(
            release = %self.bundle.title,
            part_index = index,
            kind = %kind,
            error = %reason,
            "Release failed"
        );

        self.aggregator.lock().await.fail(
            &self.bundle.release,
            PartFailure {
                index,
                locator,
                kind,
                reason: reason.clone(),
            },
        );

        let _ = self.event_tx.send(Event::ReleaseFailed {
            release: self.bundle.release.clone(),
            index,
            kind,
            error: reason,
        });
    }

    /// Return the release to "complete, not yet handled" after cancellation
    async fn abandon(&self) {
        self.transition(ReleaseState::CompleteUnverified).await;
    }
}
