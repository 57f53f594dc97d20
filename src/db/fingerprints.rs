//! Committed part fingerprints.

use crate::error::DatabaseError;
use crate::types::{Fingerprint, ReleaseKey};
use crate::{Error, Result};

use super::{Database, FingerprintRecord};

impl Database {
    /// Commit a release's fingerprints in one transaction
    ///
    /// Fingerprints already present are left untouched. Returns the number of
    /// rows actually inserted.
    pub async fn insert_fingerprints(
        &self,
        release_title: &str,
        fingerprints: &[Fingerprint],
    ) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin fingerprint transaction: {}",
                e
            )))
        })?;

        let mut inserted = 0;
        for fingerprint in fingerprints {
            let size = fingerprint
                .size_bytes
                .map(|s| i64::try_from(s).unwrap_or(i64::MAX));
            let result = sqlx::query(
                r#"
                INSERT INTO fingerprints (
                    release_key, part_index, release_title, content_hash, size_bytes, committed_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(release_key, part_index) DO NOTHING
                "#,
            )
            .bind(fingerprint.release.as_str())
            .bind(i64::from(fingerprint.index))
            .bind(release_title)
            .bind(fingerprint.content_hash.as_deref())
            .bind(size)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert fingerprint: {}",
                    e
                )))
            })?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit fingerprints: {}",
                e
            )))
        })?;

        Ok(inserted)
    }

    /// All committed `(release_key, part_index)` pairs
    pub async fn list_fingerprint_keys(&self) -> Result<Vec<(String, u32)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT release_key, part_index FROM fingerprints")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to list fingerprints: {}",
                        e
                    )))
                })?;

        Ok(rows
            .into_iter()
            .filter_map(|(key, index)| u32::try_from(index).ok().map(|i| (key, i)))
            .collect())
    }

    /// Look up a committed fingerprint
    pub async fn get_fingerprint(
        &self,
        release: &ReleaseKey,
        index: u32,
    ) -> Result<Option<FingerprintRecord>> {
        let record = sqlx::query_as::<_, FingerprintRecord>(
            r#"
            SELECT release_key, part_index, release_title, content_hash, size_bytes, committed_at
            FROM fingerprints
            WHERE release_key = ? AND part_index = ?
            "#,
        )
        .bind(release.as_str())
        .bind(i64::from(index))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get fingerprint: {}",
                e
            )))
        })?;

        Ok(record)
    }

    /// Committed fingerprints of one release, in part order
    pub async fn list_release_fingerprints(
        &self,
        release: &ReleaseKey,
    ) -> Result<Vec<FingerprintRecord>> {
        let records = sqlx::query_as::<_, FingerprintRecord>(
            r#"
            SELECT release_key, part_index, release_title, content_hash, size_bytes, committed_at
            FROM fingerprints
            WHERE release_key = ?
            ORDER BY part_index ASC
            "#,
        )
        .bind(release.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list release fingerprints: {}",
                e
            )))
        })?;

        Ok(records)
    }

    /// Number of committed fingerprints
    pub async fn count_fingerprints(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fingerprints")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count fingerprints: {}",
                    e
                )))
            })?;

        Ok(count)
    }
}
