//! Package archive unpacking using the external `unsquashfs` binary

use crate::config::ExtractConfig;
use crate::error::{Error, ExtractError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Unpacks a package archive into a directory
#[async_trait]
pub trait PackageExtractor: Send + Sync {
    /// Unpack `archive` into `dest`
    ///
    /// `dest` must not exist yet; the extractor creates it.
    async fn unpack(&self, archive: &Path, dest: &Path) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// [`PackageExtractor`] that shells out to `unsquashfs`
///
/// OPK archives are squashfs images, so this is the production extractor.
#[derive(Debug, Clone)]
pub struct UnsquashfsExtractor {
    binary_path: PathBuf,
}

impl UnsquashfsExtractor {
    /// Create an extractor with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find `unsquashfs` in PATH
    pub fn from_path() -> Option<Self> {
        which::which("unsquashfs").ok().map(Self::new)
    }

    /// Use the configured binary, falling back to PATH discovery
    pub fn from_config(config: &ExtractConfig) -> Result<Self> {
        match &config.unsquashfs_path {
            Some(path) => Ok(Self::new(path.clone())),
            None => Self::from_path().ok_or_else(|| {
                Error::NotSupported(
                    "unsquashfs not found in PATH; install squashfs-tools or set extract.unsquashfs_path"
                        .into(),
                )
            }),
        }
    }

    /// Path of the binary this extractor runs
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }
}

#[async_trait]
impl PackageExtractor for UnsquashfsExtractor {
    async fn unpack(&self, archive: &Path, dest: &Path) -> Result<()> {
        let output = Command::new(&self.binary_path)
            .arg("-no-xattrs")
            .arg("-d")
            .arg(dest)
            .arg(archive)
            .output()
            .await
            .map_err(|e| ExtractError::UnpackFailed {
                archive: archive.to_path_buf(),
                output: format!("failed to execute {}: {}", self.binary_path.display(), e),
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(ExtractError::UnpackFailed {
                archive: archive.to_path_buf(),
                output: format!("{} ({})", combined.trim(), output.status),
            }
            .into());
        }

        tracing::debug!(archive = %archive.display(), dest = %dest.display(), "Archive unpacked");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "unsquashfs"
    }
}
