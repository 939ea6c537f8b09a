//! Turns a local deployment archive into an [`ArtifactReference`].
//!
//! [`ArtifactLocator`] delegates placement to an [`ArtifactStore`]; it does not retry.
//! Keys are content addressed (`<sha256>.zip`) so identical archives map to the
//! same object.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::contract::{ArtifactReference, ArtifactStore};
use crate::error::PackagingError;

/// Locates archives through an [`ArtifactStore`].
pub struct ArtifactLocator<S> {
    store: S,
}

impl<S: ArtifactStore> ArtifactLocator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn locate(&self, archive_path: &Path) -> Result<ArtifactReference, PackagingError> {
        if !archive_path.is_file() {
            error!(archive = %archive_path.display(), "[ASSET][ERROR] Archive missing");
            return Err(PackagingError::UploadFailed {
                reason: format!("archive {} does not exist", archive_path.display()),
            });
        }
        match self.store.upload(archive_path).await {
            Ok(reference) => {
                info!(
                    archive = %archive_path.display(),
                    location = %reference.location,
                    key = %reference.key,
                    "[ASSET] Archive located"
                );
                Ok(reference)
            }
            Err(e) => {
                error!(archive = %archive_path.display(), error = %e, "[ASSET][ERROR] Upload failed");
                Err(match e {
                    failed @ PackagingError::UploadFailed { .. } => failed,
                    other => PackagingError::UploadFailed {
                        reason: other.to_string(),
                    },
                })
            }
        }
    }
}

/// Content-addressed object key for an archive: `<sha256-hex>.<extension>`.
pub fn content_key(archive_path: &Path) -> io::Result<String> {
    let mut file = File::open(archive_path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let digest = format!("{:x}", hasher.finalize());
    let extension = archive_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("zip");
    Ok(format!("{digest}.{extension}"))
}

/// Stores archives in a local staging directory, mirroring an object store layout.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    staging_dir: PathBuf,
    bucket: String,
}

impl LocalAssetStore {
    pub fn new(staging_dir: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            bucket: bucket.into(),
        }
    }

    /// Where an object with `key` ends up on disk.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.staging_dir.join(&self.bucket).join(key)
    }
}

#[async_trait]
impl ArtifactStore for LocalAssetStore {
    async fn upload(&self, archive_path: &Path) -> Result<ArtifactReference, PackagingError> {
        let upload_failed = |e: io::Error| PackagingError::UploadFailed {
            reason: e.to_string(),
        };
        let key = content_key(archive_path).map_err(upload_failed)?;
        let target = self.object_path(&key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(upload_failed)?;
        }
        fs::copy(archive_path, &target).map_err(upload_failed)?;
        Ok(ArtifactReference {
            location: self.bucket.clone(),
            key,
        })
    }
}
