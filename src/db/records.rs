//! Record existence, lookup, and deduplicated batch writes.

use crate::error::DatabaseError;
use crate::types::{CatalogRecord, ContentHash};
use crate::{Error, Result};
use sqlx::SqliteConnection;

use super::Catalog;
use super::keys::{SOURCE_PREFIX, SOURCE_PREFIX_END, display_key, record_key};
use super::sources::put_freshness;

impl Catalog {
    /// Whether a record with this content hash is stored
    ///
    /// Only the primary key is probed; the stored value is never read.
    pub async fn exists(&self, hash: &ContentHash) -> Result<bool> {
        let mut conn = self.store.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;
        key_exists(&mut conn, record_key(hash)).await
    }

    /// Look up a stored record by content hash
    pub async fn get_record(&self, hash: &ContentHash) -> Result<Option<CatalogRecord>> {
        if hash.is_empty() {
            return Ok(None);
        }

        let key = record_key(hash);
        let value: Option<Vec<u8>> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.store)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read record {}: {}",
                    hash, e
                )))
            })?;

        value.map(|value| decode_record(key, &value)).transpose()
    }

    /// Number of stored records
    pub async fn record_count(&self) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM kv WHERE NOT (key >= ? AND key < ?)")
                .bind(SOURCE_PREFIX)
                .bind(SOURCE_PREFIX_END)
                .fetch_one(&self.store)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count records: {}",
                        e
                    )))
                })?;
        Ok(count as usize)
    }

    /// Every stored record, in content hash order
    pub async fn all_records(&self) -> Result<Vec<CatalogRecord>> {
        let rows: Vec<(Vec<u8>, Vec<u8>)> = sqlx::query_as(
            "SELECT key, value FROM kv WHERE NOT (key >= ? AND key < ?) ORDER BY key",
        )
        .bind(SOURCE_PREFIX)
        .bind(SOURCE_PREFIX_END)
        .fetch_all(&self.store)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list records: {}",
                e
            )))
        })?;

        rows.iter()
            .map(|(key, value)| decode_record(key, value))
            .collect()
    }

    /// Persist a batch of records, skipping content that is already stored
    ///
    /// The whole batch is validated first: a record with an empty content hash
    /// or an empty source URL rejects the call before anything is written.
    /// Every new record is written together with its source's freshness in one
    /// primary-store transaction. A record whose hash is already present (in the
    /// store or earlier in the same batch) is not rewritten; whether its source's
    /// freshness still advances is governed by
    /// [`CatalogOptions::advance_freshness_on_duplicate`](super::CatalogOptions).
    ///
    /// Newly inserted records are added to the search index after the commit.
    /// Index failures are logged and do not undo the commit.
    ///
    /// Returns the number of newly inserted records.
    pub async fn upsert_batch(&self, records: &[CatalogRecord]) -> Result<usize> {
        for record in records {
            if record.hash.is_empty() {
                return Err(Error::Database(DatabaseError::InvalidRecord {
                    url: record.source_url.clone(),
                    reason: "empty content hash".into(),
                }));
            }
            if record.source_url.is_empty() {
                return Err(Error::Database(DatabaseError::InvalidRecord {
                    url: record.source_url.clone(),
                    reason: format!("record {} has an empty source url", record.hash),
                }));
            }
        }

        if records.is_empty() {
            return Ok(0);
        }

        let inserted = {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.store.begin().await.map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

            let mut inserted = Vec::new();
            for record in records {
                let key = record_key(&record.hash);
                if key_exists(&mut tx, key).await? {
                    tracing::debug!(
                        hash = %record.hash,
                        url = %record.source_url,
                        "Record already cataloged, skipping"
                    );
                    if self.options.advance_freshness_on_duplicate {
                        put_freshness(&mut tx, &record.source_url, &record.freshness()).await?;
                    }
                    continue;
                }

                let value = serde_json::to_vec(record)?;
                sqlx::query("INSERT INTO kv (key, value) VALUES (?, ?)")
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "Failed to write record {}: {}",
                            record.hash, e
                        )))
                    })?;
                put_freshness(&mut tx, &record.source_url, &record.freshness()).await?;
                inserted.push(record);
            }

            tx.commit().await.map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to commit batch: {}",
                    e
                )))
            })?;
            inserted
        };

        for record in &inserted {
            if let Err(e) = self.index.index_record(record).await {
                tracing::warn!(
                    hash = %record.hash,
                    error = %e,
                    "Failed to index record; search results will lag until reindex"
                );
            }
        }

        tracing::info!(
            offered = records.len(),
            inserted = inserted.len(),
            "Batch persisted"
        );
        Ok(inserted.len())
    }
}

/// Primary-key probe that never touches the value column
async fn key_exists(conn: &mut SqliteConnection, key: &[u8]) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM kv WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to probe {}: {}",
                display_key(key),
                e
            )))
        })?;
    Ok(found.is_some())
}

pub(super) fn decode_record(key: &[u8], value: &[u8]) -> Result<CatalogRecord> {
    serde_json::from_slice(value).map_err(|e| {
        Error::Database(DatabaseError::Corrupt {
            key: display_key(key),
            reason: e.to_string(),
        })
    })
}
