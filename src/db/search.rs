//! Full-text search index and catalog queries.

use crate::error::DatabaseError;
use crate::types::{CatalogRecord, ContentHash};
use crate::{Error, Result};
use sqlx::sqlite::SqlitePool;
use std::collections::HashSet;

use super::Catalog;

/// FTS5 index over manifest entries, one document per content hash
///
/// Each entry of a record becomes one row tagged with the record's document
/// identifier (its hex content hash). Records without entries get a single
/// row carrying only the source URL so they still resolve by identifier.
pub struct SearchIndex {
    pub(super) pool: SqlitePool,
    write_lock: tokio::sync::Mutex<()>,
}

impl SearchIndex {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }

    /// Replace the index rows for one record
    pub async fn index_record(&self, record: &CatalogRecord) -> Result<()> {
        let doc_id = record.hash.to_hex();

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM catalog_fts WHERE doc_id = ?")
            .bind(&doc_id)
            .execute(&mut *tx)
            .await?;

        if record.entries.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO catalog_fts (doc_id, name, kind, description, categories, source_url)
                VALUES (?, '', '', '', '', ?)
                "#,
            )
            .bind(&doc_id)
            .bind(&record.source_url)
            .execute(&mut *tx)
            .await?;
        }

        for entry in &record.entries {
            sqlx::query(
                r#"
                INSERT INTO catalog_fts (doc_id, name, kind, description, categories, source_url)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&doc_id)
            .bind(&entry.name)
            .bind(&entry.kind)
            .bind(&entry.description)
            .bind(entry.categories.join(" "))
            .bind(&record.source_url)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Whether any row carries this document identifier
    pub async fn contains(&self, doc_id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM catalog_fts WHERE doc_id = ? LIMIT 1")
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// All indexed document identifiers
    pub async fn doc_ids(&self) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT DISTINCT doc_id FROM catalog_fts")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    /// Document identifiers matching `text`, ordered by entry name, at most `limit`
    pub async fn search(&self, text: &str, limit: usize) -> Result<Vec<String>> {
        let expression = match_expression(text)
            .ok_or_else(|| Error::InvalidQuery("query text is empty".into()))?;

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT doc_id, MIN(name) AS sort_name
            FROM catalog_fts
            WHERE catalog_fts MATCH ?
            GROUP BY doc_id
            ORDER BY sort_name COLLATE NOCASE, doc_id
            LIMIT ?
            "#,
        )
        .bind(expression)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to search index: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(|(doc_id, _)| doc_id).collect())
    }
}

/// Turn free text into an FTS5 expression: every term is quoted and prefix-matched, all must match
///
/// Returns `None` when the text has no terms.
pub(crate) fn match_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|term| format!("\"{}\"*", term.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

impl Catalog {
    /// Search the catalog
    ///
    /// Results are ordered by entry name and capped at the configured query
    /// limit. A hit whose record is missing from the primary store is logged
    /// and skipped.
    pub async fn query(&self, text: &str) -> Result<Vec<CatalogRecord>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidQuery("query text is empty".into()));
        }

        let doc_ids = self.index.search(text, self.options.query_limit).await?;

        let mut records = Vec::with_capacity(doc_ids.len());
        for doc_id in doc_ids {
            let hash = match ContentHash::from_hex(&doc_id) {
                Ok(hash) => hash,
                Err(e) => {
                    tracing::warn!(doc_id = %doc_id, error = %e, "Search hit has malformed identifier");
                    continue;
                }
            };
            match self.get_record(&hash).await? {
                Some(record) => records.push(record),
                None => {
                    tracing::warn!(hash = %hash, "Search hit has no stored record, skipping");
                }
            }
        }
        Ok(records)
    }

    /// Index every stored record that is missing from the search index
    ///
    /// Repairs the index after a crash between a primary commit and the index
    /// update. Returns the number of records indexed.
    pub async fn reindex_missing(&self) -> Result<usize> {
        let indexed = self.index.doc_ids().await?;
        let mut repaired = 0;

        for record in self.all_records().await? {
            if indexed.contains(&record.hash.to_hex()) {
                continue;
            }
            self.index.index_record(&record).await?;
            repaired += 1;
        }

        if repaired > 0 {
            tracing::info!(repaired, "Reindexed records missing from search index");
        } else {
            tracing::debug!("Search index is up to date");
        }
        Ok(repaired)
    }
}
