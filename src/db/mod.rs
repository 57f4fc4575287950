//! Catalog store for opkcat
//!
//! Two independent SQLite databases back the catalog:
//! - the **primary store**, a single `kv` table holding record blobs keyed by
//!   raw content hash and freshness blobs keyed by `_url:` + percent-encoded URL
//! - the **search index**, an FTS5 table with one row per manifest entry,
//!   keyed by the content hash rendered as hex
//!
//! Writes to the primary store are serialized through one write lock and applied
//! in transactions. The search index is updated after the primary commit and is
//! not covered by it; [`Catalog::reindex_missing`] repairs an index left behind
//! by a crash between the two.
//!
//! ## Submodules
//!
//! Methods on [`Catalog`] are organized by domain:
//! - [`migrations`] — Opening both databases, schema migrations
//! - [`sources`] — Source registration and freshness
//! - [`records`] — Record existence, lookup, and deduplicated batch writes
//! - [`search`] — Full-text index maintenance and queries

use crate::config::{Config, ScheduleConfig};
use sqlx::sqlite::SqlitePool;

mod keys;
mod migrations;
mod records;
mod search;
mod sources;

pub use search::SearchIndex;

/// Behavior switches for the catalog store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatalogOptions {
    /// Store the incoming freshness for a source even when its record is a duplicate
    pub advance_freshness_on_duplicate: bool,
    /// Maximum number of records returned by [`Catalog::query`]
    pub query_limit: usize,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self::from(&ScheduleConfig::default())
    }
}

impl From<&ScheduleConfig> for CatalogOptions {
    fn from(schedule: &ScheduleConfig) -> Self {
        Self {
            advance_freshness_on_duplicate: schedule.advance_freshness_on_duplicate,
            query_limit: schedule.query_limit,
        }
    }
}

impl From<&Config> for CatalogOptions {
    fn from(config: &Config) -> Self {
        Self::from(&config.schedule)
    }
}

/// Catalog handle, safe to share across tasks behind an `Arc`
pub struct Catalog {
    store: SqlitePool,
    index: SearchIndex,
    /// Serializes write transactions against the primary store
    write_lock: tokio::sync::Mutex<()>,
    options: CatalogOptions,
}

impl Catalog {
    /// Search index handle
    pub fn index(&self) -> &SearchIndex {
        &self.index
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
