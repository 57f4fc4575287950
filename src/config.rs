//! Configuration types for opkcat

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Storage locations
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Primary key-value store (default: "./opkcat/catalog.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Search index (default: "./opkcat/index.db")
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Directory for downloaded archives and unpacked trees (None = system temp dir)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            index_path: default_index_path(),
            temp_dir: None,
        }
    }
}

/// Network fetch behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum concurrently in-flight fetch+build operations per cycle (default: 10)
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Per-request timeout enforced by the HTTP transport (default: 60s)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Archive unpacking and manifest discovery
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Path to unsquashfs executable (auto-detected if None)
    #[serde(default)]
    pub unsquashfs_path: Option<PathBuf>,

    /// Filename suffix identifying manifests inside an unpacked archive
    #[serde(default = "default_manifest_suffix")]
    pub manifest_suffix: String,

    /// Link suffix identifying package archives in the source document
    #[serde(default = "default_archive_suffix")]
    pub archive_suffix: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            unsquashfs_path: None,
            manifest_suffix: default_manifest_suffix(),
            archive_suffix: default_archive_suffix(),
        }
    }
}

/// Fetch scheduling and persistence policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Interval between scheduled fetch cycles (default: 12 hours)
    #[serde(default = "default_fetch_interval", with = "duration_serde")]
    pub fetch_interval: Duration,

    /// Start a new cycle even while a previous one is still running (default: false)
    ///
    /// When false, a trigger that arrives while a cycle is in flight is dropped.
    #[serde(default)]
    pub allow_overlapping_cycles: bool,

    /// Advance a source's freshness when its content is already cataloged (default: true)
    ///
    /// When false, a source whose archive hash was already stored keeps its old
    /// validators and is downloaded again on every cycle.
    #[serde(default = "default_true")]
    pub advance_freshness_on_duplicate: bool,

    /// Maximum number of records returned by a catalog query (default: 100)
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fetch_interval: default_fetch_interval(),
            allow_overlapping_cycles: false,
            advance_freshness_on_duplicate: true,
            query_limit: default_query_limit(),
        }
    }
}

/// Main configuration for opkcat
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Network fetch behavior
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Archive unpacking
    #[serde(default)]
    pub extract: ExtractConfig,

    /// Scheduling and persistence policy
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&content).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the pipeline unable to make progress
    pub fn validate(&self) -> Result<()> {
        if self.fetch.max_concurrent_fetches == 0 {
            return Err(Error::Config {
                message: "max_concurrent_fetches must be at least 1".into(),
                key: Some("fetch.max_concurrent_fetches".into()),
            });
        }
        if self.schedule.fetch_interval.is_zero() {
            return Err(Error::Config {
                message: "fetch_interval must be non-zero".into(),
                key: Some("schedule.fetch_interval".into()),
            });
        }
        if self.schedule.query_limit == 0 {
            return Err(Error::Config {
                message: "query_limit must be at least 1".into(),
                key: Some("schedule.query_limit".into()),
            });
        }
        if !self.extract.manifest_suffix.contains('.') {
            return Err(Error::Config {
                message: format!(
                    "manifest_suffix '{}' does not look like a file suffix",
                    self.extract.manifest_suffix
                ),
                key: Some("extract.manifest_suffix".into()),
            });
        }
        Ok(())
    }

    /// Directory for transient files
    pub fn temp_dir(&self) -> PathBuf {
        self.storage
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./opkcat/catalog.db")
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./opkcat/index.db")
}

fn default_max_concurrent_fetches() -> usize {
    10
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_user_agent() -> String {
    format!("opkcat/{}", env!("CARGO_PKG_VERSION"))
}

fn default_manifest_suffix() -> String {
    ".gcw0.desktop".to_string()
}

fn default_archive_suffix() -> String {
    ".opk".to_string()
}

fn default_fetch_interval() -> Duration {
    Duration::from_secs(12 * 60 * 60)
}

fn default_true() -> bool {
    true
}

fn default_query_limit() -> usize {
    100
}

// Durations are written as whole seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
