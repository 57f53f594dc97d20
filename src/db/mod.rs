//! Database layer for drive-relay
//!
//! Handles SQLite persistence for committed fingerprints and runtime state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`fingerprints`]: Committed part fingerprints (the dedup record)
//! - [`state`]: Runtime state (shutdown tracking)

use crate::types::{Fingerprint, ReleaseKey};
use sqlx::{FromRow, sqlite::SqlitePool};

mod fingerprints;
mod migrations;
mod state;

/// Committed fingerprint record from database
#[derive(Debug, Clone, FromRow)]
pub struct FingerprintRecord {
    /// Normalized release key
    pub release_key: String,
    /// 1-based part index
    pub part_index: i64,
    /// Release title as it was published
    pub release_title: String,
    /// SHA-256 of the part content, if it was downloaded
    pub content_hash: Option<String>,
    /// Part size in bytes, if it was downloaded
    pub size_bytes: Option<i64>,
    /// Unix timestamp of the commit
    pub committed_at: i64,
}

impl FingerprintRecord {
    /// Convert the stored row back into a [`Fingerprint`]
    ///
    /// The stored key is already normalized, so it round-trips unchanged.
    pub fn to_fingerprint(&self) -> Fingerprint {
        Fingerprint {
            release: ReleaseKey::from_title(&self.release_key),
            index: u32::try_from(self.part_index).unwrap_or(0),
            content_hash: self.content_hash.clone(),
            size_bytes: self.size_bytes.and_then(|s| u64::try_from(s).ok()),
        }
    }
}

/// Database handle for drive-relay
pub struct Database {
    pool: SqlitePool,
}
