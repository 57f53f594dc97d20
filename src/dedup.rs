//! Persistent dedup index
//!
//! Remembers which `(release, part)` fingerprints have already been forwarded.
//! Committed keys are loaded into memory at start-up and every commit is
//! written through to the database before the in-memory set is updated.

use crate::db::Database;
use crate::error::Result;
use crate::types::{Fingerprint, ReleaseKey};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Set of fingerprints already handled, backed by SQLite
pub struct DedupIndex {
    db: Arc<Database>,
    committed: Mutex<HashSet<(ReleaseKey, u32)>>,
}

impl DedupIndex {
    /// Load the index from the database
    pub async fn load(db: Arc<Database>) -> Result<Self> {
        let committed: HashSet<(ReleaseKey, u32)> = db
            .list_fingerprint_keys()
            .await?
            .into_iter()
            .map(|(key, index)| (ReleaseKey::from_title(&key), index))
            .collect();

        tracing::debug!(fingerprints = committed.len(), "Loaded dedup index");

        Ok(Self {
            db,
            committed: Mutex::new(committed),
        })
    }

    /// True if this fingerprint's `(release, index)` has been committed
    pub async fn has(&self, fingerprint: &Fingerprint) -> bool {
        self.committed
            .lock()
            .await
            .contains(&(fingerprint.release.clone(), fingerprint.index))
    }

    /// True if every fingerprint in `fingerprints` has been committed
    ///
    /// An empty set is never considered published.
    pub async fn has_all(&self, fingerprints: &[Fingerprint]) -> bool {
        if fingerprints.is_empty() {
            return false;
        }
        let committed = self.committed.lock().await;
        fingerprints
            .iter()
            .all(|f| committed.contains(&(f.release.clone(), f.index)))
    }

    /// Record a single fingerprint; a no-op if it is already present
    pub async fn add(&self, release_title: &str, fingerprint: Fingerprint) -> Result<bool> {
        Ok(self
            .commit_all(release_title, std::slice::from_ref(&fingerprint))
            .await?
            > 0)
    }

    /// Record a release's fingerprints in one step
    ///
    /// Either every new fingerprint is persisted or none is. Returns the number
    /// of fingerprints that were not already present.
    pub async fn commit_all(&self, release_title: &str, fingerprints: &[Fingerprint]) -> Result<u64> {
        // Held across the write so concurrent commits serialize
        let mut committed = self.committed.lock().await;

        let fresh: Vec<Fingerprint> = fingerprints
            .iter()
            .filter(|f| !committed.contains(&(f.release.clone(), f.index)))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        self.db.insert_fingerprints(release_title, &fresh).await?;

        for f in &fresh {
            committed.insert((f.release.clone(), f.index));
        }

        tracing::debug!(
            release = %release_title,
            fingerprints = fresh.len(),
            "Committed fingerprints"
        );

        Ok(fresh.len() as u64)
    }

    /// Number of committed fingerprints
    pub async fn len(&self) -> usize {
        self.committed.lock().await.len()
    }

    /// True when nothing has been committed
    pub async fn is_empty(&self) -> bool {
        self.committed.lock().await.is_empty()
    }
}
