//! Source registration and freshness tracking.

use crate::error::DatabaseError;
use crate::types::{Freshness, SourceFreshness};
use crate::{Error, Result};
use sqlx::SqliteConnection;

use super::Catalog;
use super::keys::{SOURCE_PREFIX, SOURCE_PREFIX_END, display_key, source_key, url_from_source_key};

impl Catalog {
    /// Register a source URL
    ///
    /// Creates a zero-valued freshness entry if the URL is unknown and leaves an
    /// existing entry untouched. Returns whether the URL was newly registered.
    pub async fn register_source(&self, url: &str) -> Result<bool> {
        if url.is_empty() {
            return Err(Error::Database(DatabaseError::EmptyUrl));
        }

        let value = serde_json::to_vec(&Freshness::default())?;

        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            INSERT INTO kv (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO NOTHING
            "#,
        )
        .bind(source_key(url))
        .bind(value)
        .execute(&self.store)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to register source: {}",
                e
            )))
        })?;

        let created = result.rows_affected() > 0;
        if created {
            tracing::debug!(url, "Registered new source");
        }
        Ok(created)
    }

    /// Last-known freshness of a source, zero-valued if the URL is unknown
    pub async fn freshness(&self, url: &str) -> Result<Freshness> {
        if url.is_empty() {
            return Err(Error::Database(DatabaseError::EmptyUrl));
        }

        let key = source_key(url);
        let value: Option<Vec<u8>> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
            .bind(&key)
            .fetch_optional(&self.store)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read freshness: {}",
                    e
                )))
            })?;

        match value {
            Some(value) => decode_freshness(&key, &value),
            None => Ok(Freshness::default()),
        }
    }

    /// Every registered source, in lexical key order
    pub async fn known_sources(&self) -> Result<Vec<SourceFreshness>> {
        let rows: Vec<(Vec<u8>, Vec<u8>)> =
            sqlx::query_as("SELECT key, value FROM kv WHERE key >= ? AND key < ? ORDER BY key")
                .bind(SOURCE_PREFIX)
                .bind(SOURCE_PREFIX_END)
                .fetch_all(&self.store)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to list sources: {}",
                        e
                    )))
                })?;

        let mut sources = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let Some(url) = url_from_source_key(&key) else {
                tracing::warn!(key = %display_key(&key), "Skipping undecodable source key");
                continue;
            };
            sources.push(SourceFreshness {
                url,
                freshness: decode_freshness(&key, &value)?,
            });
        }
        Ok(sources)
    }

    /// Number of registered sources
    pub async fn source_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv WHERE key >= ? AND key < ?")
            .bind(SOURCE_PREFIX)
            .bind(SOURCE_PREFIX_END)
            .fetch_one(&self.store)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count sources: {}",
                    e
                )))
            })?;
        Ok(count as usize)
    }
}

/// Overwrite a source's freshness inside an open transaction
pub(super) async fn put_freshness(
    conn: &mut SqliteConnection,
    url: &str,
    freshness: &Freshness,
) -> Result<()> {
    let value = serde_json::to_vec(freshness)?;
    sqlx::query(
        r#"
        INSERT INTO kv (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(source_key(url))
    .bind(value)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to write freshness for {}: {}",
            url, e
        )))
    })?;
    Ok(())
}

fn decode_freshness(key: &[u8], value: &[u8]) -> Result<Freshness> {
    serde_json::from_slice(value).map_err(|e| {
        Error::Database(DatabaseError::Corrupt {
            key: display_key(key),
            reason: e.to_string(),
        })
    })
}
