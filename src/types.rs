//! Core types for opkcat

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// SHA-256 digest of an archive's raw bytes, the identity of a [`CatalogRecord`]
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(#[serde(with = "hex::serde")] pub Vec<u8>);

impl ContentHash {
    /// Wrap raw digest bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a lowercase or uppercase hex rendering
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(s)?))
    }

    /// Hex rendering, also used as the search-index document identifier
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether the digest is empty (never valid for a persisted record)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Vec<u8>> for ContentHash {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Cached validators for one source location
///
/// `last_fetched` is `None` and `etag` is empty until a fetch of the source
/// has been persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freshness {
    /// Time of the last persisted fetch
    pub last_fetched: Option<DateTime<Utc>>,
    /// Entity tag returned by the server on the last persisted fetch
    pub etag: String,
}

impl Freshness {
    /// Whether this is the zero value of a source that was never fetched
    pub fn is_zero(&self) -> bool {
        self.last_fetched.is_none() && self.etag.is_empty()
    }
}

/// A known source URL together with its freshness
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFreshness {
    /// Source URL (identity key)
    pub url: String,
    /// Last-known validators
    #[serde(flatten)]
    pub freshness: Freshness,
}

impl SourceFreshness {
    /// A freshly registered source with zero-valued freshness
    pub fn unfetched(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            freshness: Freshness::default(),
        }
    }
}

/// One application described by a manifest inside a package archive
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Application name (`Name`)
    pub name: String,
    /// Desktop entry type (`Type`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Description (`Comment`)
    pub description: String,
    /// Categories (`Categories`, `;`-delimited in the manifest)
    pub categories: Vec<String>,
    /// PNG icon data
    #[serde(with = "hex::serde")]
    pub icon: Vec<u8>,
}

/// Immutable catalog record for one distinct archive
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Content hash (identity key)
    pub hash: ContentHash,
    /// URL the archive was fetched from (provenance only)
    pub source_url: String,
    /// When the archive was fetched
    pub fetched_at: DateTime<Utc>,
    /// Entity tag returned with the archive, empty if none
    pub etag: String,
    /// One entry per manifest found in the archive
    pub entries: Vec<Entry>,
}

impl CatalogRecord {
    /// Freshness to store for this record's source once it is persisted
    pub fn freshness(&self) -> Freshness {
        Freshness {
            last_fetched: Some(self.fetched_at),
            etag: self.etag.clone(),
        }
    }
}

/// Result of building a record for one source
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The server reported the cached validators still match
    Unchanged,
    /// A new archive was downloaded and cataloged
    Built(CatalogRecord),
}

/// Summary of one fetch cycle
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Monotonic cycle number assigned by the scheduler (0 for ad-hoc cycles)
    pub cycle: u64,
    /// Sources handed to workers
    pub sources: usize,
    /// Records built from changed sources
    pub built: usize,
    /// Sources whose content was unchanged
    pub unchanged: usize,
    /// Sources that failed to fetch or extract
    pub failed: usize,
    /// Records newly inserted by the batch write
    pub inserted: usize,
    /// Whether the cycle was cut short by cancellation
    pub cancelled: bool,
    /// Wall-clock duration of the cycle
    pub duration: Duration,
}

/// Event emitted by the fetch scheduler
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A fetch cycle began
    CycleStarted {
        /// Cycle number
        cycle: u64,
    },

    /// A fetch cycle finished and its batch was written
    CycleFinished(CycleReport),

    /// A fetch cycle failed as a whole (e.g. source enumeration failed)
    CycleFailed {
        /// Cycle number
        cycle: u64,
        /// Error message
        error: String,
    },

    /// A trigger arrived while a cycle was running and was dropped
    TriggerCoalesced,

    /// The scheduler finished shutting down
    Stopped,
}
