//! Record Builder: conditional download, hashing, unpacking, manifest reading

use crate::error::{Error, FetchError, Result};
use crate::types::{BuildOutcome, CatalogRecord, ContentHash, SourceFreshness};
use chrono::Utc;
use futures::StreamExt;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use super::extract::PackageExtractor;
use super::manifest::read_entry;
use super::transport::{ConditionalGetter, FetchResponse};

/// Prefix of downloaded archive files in the temp directory
const ARCHIVE_PREFIX: &str = "Fopkcat-";

/// Prefix of unpack directories in the temp directory
const UNPACK_PREFIX: &str = "Dopkcat-";

/// Builds one [`CatalogRecord`] per changed source
///
/// Every temporary file and directory is owned by a guard that removes it on
/// drop, so nothing is left behind on success, failure or cancellation.
pub struct RecordBuilder {
    getter: Arc<dyn ConditionalGetter>,
    extractor: Arc<dyn PackageExtractor>,
    temp_dir: PathBuf,
    manifest_suffix: String,
}

impl RecordBuilder {
    /// Create a builder
    ///
    /// # Arguments
    ///
    /// * `getter` - Conditional fetch transport
    /// * `extractor` - Archive unpacker
    /// * `temp_dir` - Where downloads and unpacked trees are staged
    /// * `manifest_suffix` - Filename suffix of manifests inside an archive
    pub fn new(
        getter: Arc<dyn ConditionalGetter>,
        extractor: Arc<dyn PackageExtractor>,
        temp_dir: PathBuf,
        manifest_suffix: impl Into<String>,
    ) -> Self {
        Self {
            getter,
            extractor,
            temp_dir,
            manifest_suffix: manifest_suffix.into(),
        }
    }

    /// Fetch `source` if it changed and turn the archive into a record
    ///
    /// Returns [`BuildOutcome::Unchanged`] when the server answers
    /// `304 Not Modified`, or answers `200 OK` with the same non-empty entity
    /// tag that is already stored for the source.
    pub async fn build(&self, source: &SourceFreshness) -> Result<BuildOutcome> {
        let url = source.url.as_str();
        let stored_etag = source.freshness.etag.as_str();

        let response = self
            .getter
            .get_if_modified(source.freshness.last_fetched, stored_etag, url)
            .await?;

        if response.status == StatusCode::NOT_MODIFIED {
            return Ok(BuildOutcome::Unchanged);
        }
        if response.status != StatusCode::OK {
            return Err(FetchError::UnexpectedStatus {
                url: url.to_string(),
                status: response.status.as_u16(),
            }
            .into());
        }

        let etag = response.etag.clone().unwrap_or_default();
        // Servers that ignore If-None-Match still echo the tag
        if !stored_etag.is_empty() && etag == stored_etag {
            return Ok(BuildOutcome::Unchanged);
        }

        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let (archive, hash) = self.download(url, response).await?;
        tracing::debug!(url = %url, hash = %hash, "Archive downloaded");

        let unpack_dir = tempfile::Builder::new()
            .prefix(UNPACK_PREFIX)
            .tempdir_in(&self.temp_dir)?;
        let root = unpack_dir.path().join("root");
        self.extractor.unpack(&archive, &root).await?;
        tracing::debug!(url = %url, extractor = self.extractor.name(), "Archive unpacked");

        let mut entries = Vec::new();
        for manifest in find_manifests(&root, &self.manifest_suffix).await? {
            entries.push(read_entry(&manifest).await?);
        }

        if entries.is_empty() {
            tracing::warn!(url = %url, hash = %hash, "Archive contains no manifests");
        }

        Ok(BuildOutcome::Built(CatalogRecord {
            hash,
            source_url: url.to_string(),
            fetched_at: Utc::now(),
            etag,
            entries,
        }))
    }

    /// Stream the body into a temp file while hashing it
    async fn download(&self, url: &str, response: FetchResponse) -> Result<(TempPath, ContentHash)> {
        let (file, path) = tempfile::Builder::new()
            .prefix(ARCHIVE_PREFIX)
            .suffix(".opk")
            .tempfile_in(&self.temp_dir)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut hasher = Sha256::new();

        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| FetchError::Transport {
                url: url.to_string(),
                reason: format!("failed reading body: {}", e),
            })?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        Ok((path, ContentHash::new(hasher.finalize().to_vec())))
    }
}

/// Files directly inside `dir` whose name ends with `suffix`, sorted by name
async fn find_manifests(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut manifests = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to list unpacked archive {}: {}", dir.display(), e),
        ))
    })?;

    while let Some(entry) = entries.next_entry().await? {
        let is_manifest = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(suffix));
        if is_manifest && entry.file_type().await?.is_file() {
            manifests.push(entry.path());
        }
    }

    manifests.sort();
    Ok(manifests)
}
