//! Error types for opkcat
//!
//! Failures are grouped by how far they propagate:
//! - [`Error::Setup`] is fatal and aborts the process (storage cannot be opened)
//! - [`FetchError`] and [`ExtractError`] are per-source and never abort a fetch cycle
//! - [`DatabaseError::InvalidRecord`] aborts a whole batch write
//! - [`Error::InvalidQuery`] is a caller error returned from catalog queries

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for opkcat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for opkcat
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fetch.max_concurrent_fetches")
        key: Option<String>,
    },

    /// Storage could not be opened; the process cannot continue
    #[error("setup error: {0}")]
    Setup(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Conditional fetch of a source failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Unpacking an archive or reading its manifests failed
    #[error("extract error: {0}")]
    Extract(#[from] ExtractError),

    /// Query text was rejected before reaching the index
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not supported (missing binary, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The service is not in a state that allows the requested transition
    #[error("invalid service state: cannot {operation} while {state}")]
    InvalidState {
        /// The operation that was attempted (e.g., "start")
        operation: &'static str,
        /// The state the service was in
        state: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this failure is scoped to a single source and should only skip it
    pub fn is_source_failure(&self) -> bool {
        matches!(self, Error::Fetch(_) | Error::Extract(_) | Error::Io(_))
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A record handed to a batch write failed validation
    #[error("invalid record from {url}: {reason}")]
    InvalidRecord {
        /// Source URL of the offending record
        url: String,
        /// Why the record was rejected
        reason: String,
    },

    /// A freshness lookup was made with an empty URL
    #[error("empty source url")]
    EmptyUrl,

    /// A stored value could not be decoded
    #[error("corrupt value at {key}: {reason}")]
    Corrupt {
        /// Printable form of the key
        key: String,
        /// Decoder message
        reason: String,
    },
}

/// Conditional fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// The transport failed before a status was received, or while streaming the body
    #[error("transport error fetching {url}: {reason}")]
    Transport {
        /// URL being fetched
        url: String,
        /// Transport message
        reason: String,
    },

    /// The server answered with neither success nor "not modified"
    #[error("http fetch error for {url}: status {status}")]
    UnexpectedStatus {
        /// URL being fetched
        url: String,
        /// HTTP status code
        status: u16,
    },
}

/// Archive extraction and manifest parsing errors
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The unpacking tool exited unsuccessfully
    #[error("failed to unpack {archive}: {output}")]
    UnpackFailed {
        /// Archive that could not be unpacked
        archive: PathBuf,
        /// Combined stdout/stderr of the tool plus its exit status
        output: String,
    },

    /// A manifest is missing its `[Desktop Entry]` section
    #[error("manifest {manifest} has no [{section}] section")]
    MissingSection {
        /// Manifest file
        manifest: PathBuf,
        /// Section that was expected
        section: String,
    },

    /// A manifest could not be parsed
    #[error("malformed manifest {manifest} at line {line}: {reason}")]
    MalformedManifest {
        /// Manifest file
        manifest: PathBuf,
        /// 1-based line number
        line: usize,
        /// Parser message
        reason: String,
    },

    /// The icon referenced by a manifest does not exist
    #[error("icon {path} referenced by manifest not found")]
    MissingIcon {
        /// Expected icon path
        path: PathBuf,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_and_extract_errors_are_source_failures() {
        let fetch = Error::Fetch(FetchError::UnexpectedStatus {
            url: "http://example.com/a.opk".into(),
            status: 500,
        });
        let extract = Error::Extract(ExtractError::MissingIcon {
            path: PathBuf::from("/tmp/x/icon.png"),
        });

        assert!(fetch.is_source_failure());
        assert!(extract.is_source_failure());
    }

    #[test]
    fn batch_and_query_errors_are_not_source_failures() {
        let invalid = Error::Database(DatabaseError::InvalidRecord {
            url: "http://example.com/a.opk".into(),
            reason: "empty content hash".into(),
        });

        assert!(!invalid.is_source_failure());
        assert!(!Error::InvalidQuery("empty query".into()).is_source_failure());
        assert!(!Error::Setup("locked".into()).is_source_failure());
    }

    #[test]
    fn unexpected_status_message_names_url_and_status() {
        let err = Error::Fetch(FetchError::UnexpectedStatus {
            url: "http://example.com/a.opk".into(),
            status: 404,
        });

        let msg = err.to_string();
        assert!(msg.contains("http://example.com/a.opk"));
        assert!(msg.contains("404"));
    }
}
