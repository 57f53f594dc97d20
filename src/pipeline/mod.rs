//! Pipeline coordination
//!
//! [`PipelineCoordinator`] reads the source channel oldest to newest, feeds
//! each message through extraction and aggregation, and schedules a
//! [`job::ReleaseJob`] for every release that becomes complete and is not
//! already in the dedup index. Releases download concurrently up to
//! `download.max_concurrent_releases`; all state changes for a release go
//! through the shared aggregator lock, so a release is never scheduled twice.

use crate::aggregate::{PartAggregator, ReleaseBundle};
use crate::config::{Config, UnknownTotalPolicy};
use crate::db::Database;
use crate::dedup::DedupIndex;
use crate::downloader::Downloader;
use crate::error::{Error, Result};
use crate::extract::{LinkExtractor, ParsedHints};
use crate::fetcher::FileFetcher;
use crate::publisher::ReleasePublisher;
use crate::transport::ChatTransport;
use crate::types::{ChannelId, Cursor, Event, Fingerprint, Message, ReleaseKey, ReleaseState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

mod job;

use job::ReleaseJob;

/// Drives the release-reconciliation pipeline for one source/destination pair
pub struct PipelineCoordinator {
    config: Arc<Config>,
    source: ChannelId,
    destination: ChannelId,
    transport: Arc<dyn ChatTransport>,
    db: Arc<Database>,
    dedup: Arc<DedupIndex>,
    extractor: LinkExtractor,
    aggregator: Arc<Mutex<PartAggregator>>,
    downloader: Arc<Downloader>,
    publisher: Arc<ReleasePublisher>,
    jobs: Mutex<JoinSet<()>>,
    release_slots: Arc<Semaphore>,
    cursor: Mutex<Option<Cursor>>,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<Event>,
}

impl PipelineCoordinator {
    /// Open the database and build the pipeline
    ///
    /// The transport must already be authenticated and the channels resolved.
    pub async fn new(
        config: Config,
        source: ChannelId,
        destination: ChannelId,
        transport: Arc<dyn ChatTransport>,
        fetcher: Arc<dyn FileFetcher>,
    ) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);

        if db.was_unclean_shutdown().await? {
            tracing::warn!(
                "Previous session did not shut down cleanly; a release may have been partially sent"
            );
        }
        db.set_clean_start().await?;

        let dedup = Arc::new(DedupIndex::load(db.clone()).await?);
        let extractor = LinkExtractor::new(&config.extraction)?;
        let aggregator = Arc::new(Mutex::new(PartAggregator::new(
            config.aggregation.total_conflict,
        )));
        let downloader = Arc::new(Downloader::new(
            fetcher,
            &config.download,
            config.retry.clone(),
        ));
        let publisher = Arc::new(ReleasePublisher::new(
            transport.clone(),
            destination.clone(),
            dedup.clone(),
            config.publish.announce_release,
        ));
        let release_slots = Arc::new(Semaphore::new(config.download.max_concurrent_releases));

        // Broadcast channel for events; slow subscribers lose the oldest events
        let (event_tx, _rx) = broadcast::channel(1000);

        tracing::info!(
            source = %source,
            destination = %destination,
            "Pipeline coordinator ready"
        );

        Ok(Self {
            config: Arc::new(config),
            source,
            destination,
            transport,
            db,
            dedup,
            extractor,
            aggregator,
            downloader,
            publisher,
            jobs: Mutex::new(JoinSet::new()),
            release_slots,
            cursor: Mutex::new(None),
            cancel: CancellationToken::new(),
            event_tx,
        })
    }

    /// Subscribe to pipeline events
    ///
    /// Multiple subscribers are supported; each receives every event sent
    /// after it subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Scan the whole source history once and wait for every scheduled release
    ///
    /// Every job has finished when this returns, so the session is recorded
    /// as cleanly ended.
    pub async fn run_once(&self) -> Result<()> {
        self.seed_from_destination().await?;
        self.scan(None).await?;
        self.wait_for_jobs().await;
        self.db.set_clean_shutdown().await?;
        Ok(())
    }

    /// Scan the whole history, then keep polling for new messages until shut down
    pub async fn run(&self) -> Result<()> {
        self.db.set_clean_start().await?;
        self.seed_from_destination().await?;
        self.scan(None).await?;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.scan.poll_interval) => {}
            }

            let from = self.cursor.lock().await.clone();
            match self.scan(from).await {
                Ok(()) => {}
                Err(Error::ShuttingDown) => break,
                // A listing failure is retried on the next poll
                Err(e) => tracing::warn!(error = %e, "Polling the source channel failed"),
            }
            self.reap_finished_jobs().await;
        }

        Ok(())
    }

    /// Record fingerprints for releases the destination already shows
    ///
    /// Reads the most recent destination messages and commits a fingerprint for
    /// every caption of the form `"<title> - part i of n"`. Returns the number
    /// of new fingerprints.
    pub async fn seed_from_destination(&self) -> Result<u64> {
        if !self.config.dedup.seed_from_destination {
            return Ok(0);
        }

        let messages = self
            .transport
            .recent_messages(&self.destination, self.config.dedup.seed_limit)
            .await?;

        let mut by_release: HashMap<ReleaseKey, (String, Vec<Fingerprint>)> = HashMap::new();
        for message in &messages {
            if let ParsedHints::Matched {
                title: Some(title),
                index,
                total: Some(_),
            } = self.extractor.parse_hints(&message.text)
            {
                let key = ReleaseKey::from_title(&title);
                by_release
                    .entry(key.clone())
                    .or_insert_with(|| (title, Vec::new()))
                    .1
                    .push(Fingerprint::new(key, index));
            }
        }

        let mut seeded = 0;
        for (title, fingerprints) in by_release.values() {
            seeded += self.dedup.commit_all(title, fingerprints).await?;
        }

        tracing::info!(
            messages = messages.len(),
            fingerprints = seeded,
            "Seeded dedup index from destination"
        );
        Ok(seeded)
    }

    /// Current state of a release, if it has been observed
    pub async fn state_of(&self, release: &ReleaseKey) -> Option<ReleaseState> {
        self.aggregator.lock().await.get(release).map(|b| b.state)
    }

    /// Snapshot of every tracked release
    pub async fn releases(&self) -> Vec<ReleaseBundle> {
        self.aggregator.lock().await.bundles().cloned().collect()
    }

    /// The persistent dedup index
    pub fn dedup(&self) -> &DedupIndex {
        &self.dedup
    }

    /// Stop scanning, let in-flight releases finish within the grace period and
    /// mark a clean shutdown
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");
        self.cancel.cancel();

        let grace = self.config.scan.shutdown_grace;
        if tokio::time::timeout(grace, self.wait_for_jobs()).await.is_err() {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Timeout waiting for releases to finish, aborting remaining jobs"
            );
            let mut jobs = self.jobs.lock().await;
            jobs.abort_all();
            while jobs.join_next().await.is_some() {}
        }

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        }

        let _ = self.event_tx.send(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// One pass over the source channel starting after `from`
    async fn scan(&self, from: Option<Cursor>) -> Result<()> {
        self.retry_pending().await;

        let page_size = self.config.scan.page_size;
        let mut cursor = from;
        let mut messages_seen = 0u64;
        let mut links_seen = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::ShuttingDown);
            }

            let page = self
                .transport
                .list_messages(&self.source, cursor.as_ref(), page_size)
                .await?;

            let mut messages = page.messages;
            messages.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));

            for message in &messages {
                messages_seen += 1;
                links_seen += self.ingest(message).await;
            }

            if page.cursor.is_some() {
                cursor = page.cursor;
            }
            if !page.has_more || cursor.is_none() {
                break;
            }
        }

        if cursor.is_some() {
            *self.cursor.lock().await = cursor;
        }

        self.settle_quiet_releases().await;

        tracing::info!(messages = messages_seen, links = links_seen, "Scan pass complete");
        let _ = self.event_tx.send(Event::ScanComplete {
            messages: messages_seen,
            links: links_seen,
        });
        Ok(())
    }

    /// Observe every part link in `message`, returning how many were found
    async fn ingest(&self, message: &Message) -> u64 {
        let links = self.extractor.extract(message);
        let count = links.len() as u64;

        for link in links {
            let job = {
                let mut aggregator = self.aggregator.lock().await;
                let key = link.release.clone();
                let index = link.index;
                let bundle = aggregator.observe(link);
                let _ = self.event_tx.send(Event::PartObserved {
                    release: key.clone(),
                    index,
                    total: bundle.declared_total,
                    message: message.id,
                });
                self.evaluate(&mut aggregator, &key).await
            };
            if let Some(job) = job {
                self.jobs.lock().await.spawn(job.run());
            }
        }

        count
    }

    /// Requeue releases whose send failed and schedule every complete release left waiting
    async fn retry_pending(&self) {
        let mut scheduled = Vec::new();
        {
            let mut aggregator = self.aggregator.lock().await;
            for key in aggregator.requeue_send_failures() {
                tracing::info!(release = %key, "Retrying release after send failure");
            }
            for key in aggregator.ready() {
                scheduled.extend(self.evaluate(&mut aggregator, &key).await);
            }
        }

        let mut jobs = self.jobs.lock().await;
        for job in scheduled {
            jobs.spawn(job.run());
        }
    }

    /// Give quiet releases without a declared total their highest index as total
    async fn settle_quiet_releases(&self) {
        if self.config.aggregation.unknown_total != UnknownTotalPolicy::SettleWhenQuiet {
            return;
        }

        let mut scheduled = Vec::new();
        {
            let mut aggregator = self.aggregator.lock().await;
            let settled = aggregator
                .settle_unknown_totals(chrono::Utc::now(), self.config.aggregation.settle_after);
            for key in settled {
                scheduled.extend(self.evaluate(&mut aggregator, &key).await);
            }
        }

        let mut jobs = self.jobs.lock().await;
        for job in scheduled {
            jobs.spawn(job.run());
        }
    }

    /// Advance a release that may have just become complete
    ///
    /// Returns the job to spawn when the release needs downloading. The caller
    /// spawns it after releasing the aggregator lock.
    async fn evaluate(&self, aggregator: &mut PartAggregator, key: &ReleaseKey) -> Option<ReleaseJob> {
        let bundle = aggregator.get(key)?;
        if !matches!(
            bundle.state,
            ReleaseState::Pending | ReleaseState::CompleteUnverified
        ) || !bundle.is_complete()
        {
            return None;
        }
        let parts = bundle.parts.len() as u32;
        let fingerprints = bundle.fingerprints();

        if aggregator.transition(key, ReleaseState::CompleteUnverified) == Some(ReleaseState::Pending) {
            let _ = self.event_tx.send(Event::ReleaseComplete {
                release: key.clone(),
                parts,
            });
        }

        if self.dedup.has_all(&fingerprints).await {
            tracing::debug!(release = %key, "Release already in dedup index");
            aggregator.transition(key, ReleaseState::Done);
            let _ = self.event_tx.send(Event::ReleaseSkipped {
                release: key.clone(),
            });
            return None;
        }

        if self.cancel.is_cancelled() {
            return None;
        }

        aggregator.transition(key, ReleaseState::Downloading);
        let snapshot = aggregator.get(key).cloned()?;

        tracing::info!(release = %snapshot.title, parts, "Release complete, scheduling download");

        Some(ReleaseJob {
            bundle: snapshot,
            aggregator: self.aggregator.clone(),
            downloader: self.downloader.clone(),
            publisher: self.publisher.clone(),
            release_slots: self.release_slots.clone(),
            part_concurrency: self.config.download.part_concurrency,
            cancel: self.cancel.clone(),
            event_tx: self.event_tx.clone(),
        })
    }

    async fn wait_for_jobs(&self) {
        let mut jobs = self.jobs.lock().await;
        while let Some(result) = jobs.join_next().await {
            if let Err(e) = result
                && e.is_panic()
            {
                tracing::error!(error = %e, "Release job panicked");
            }
        }
    }

    async fn reap_finished_jobs(&self) {
        let mut jobs = self.jobs.lock().await;
        while let Some(result) = jobs.try_join_next() {
            if let Err(e) = result
                && e.is_panic()
            {
                tracing::error!(error = %e, "Release job panicked");
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
