//! # contract: collaborator interfaces of the packaging pipeline
//!
//! The pipeline talks to two out-of-process collaborators and reaches both through a
//! trait defined here:
//!
//! - [`PackageBuilder`]: runs `chalice package` (as a local process or inside a
//!   container) and hands back a [`BuildOutput`].
//! - [`ArtifactStore`]: places the deployment archive somewhere durable and returns
//!   an [`ArtifactReference`].
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`; with the default `test-export-mocks`
//!   feature `MockPackageBuilder` and `MockArtifactStore` are available to
//!   integration tests.
//!
//! ## Adding New Strategies or Stores
//! - Implement the trait for your executor or storage backend.
//! - Map backend failures onto the [`PackagingError`] kind the pipeline documents
//!   for that stage (`PackagingFailed`/`ImageNotFound` for builders, `UploadFailed`
//!   for stores).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PackagingError;
use crate::stage::StageName;

/// Archive file name inside a build output directory.
pub const ARCHIVE_FILE_NAME: &str = "deployment.zip";
/// Generated SAM template file name inside a build output directory.
pub const TEMPLATE_FILE_NAME: &str = "sam.json";

/// A completed build: a uniquely named directory holding the archive and the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// Opaque identifier the directory is named after.
    pub build_id: String,
    pub dir: PathBuf,
}

impl BuildOutput {
    pub fn new(build_id: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            build_id: build_id.into(),
            dir: dir.into(),
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        self.dir.join(ARCHIVE_FILE_NAME)
    }

    pub fn template_path(&self) -> PathBuf {
        self.dir.join(TEMPLATE_FILE_NAME)
    }
}

/// Durable pointer to an uploaded deployment archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReference {
    /// Bucket (or equivalent location) holding the object.
    pub location: String,
    /// Object key within the location.
    pub key: String,
}

/// Runs the external packaging tool for one stage of an application.
#[cfg_attr(any(test, feature = "test-export-mocks"), mockall::automock)]
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    /// Package `source_dir` for `stage` into a fresh output directory.
    ///
    /// Either both [`ARCHIVE_FILE_NAME`] and [`TEMPLATE_FILE_NAME`] exist in the
    /// returned directory, or the call fails.
    async fn build(
        &self,
        source_dir: &Path,
        stage: &StageName,
    ) -> Result<BuildOutput, PackagingError>;
}

/// Storage collaborator that makes a local archive durably addressable.
#[cfg_attr(any(test, feature = "test-export-mocks"), mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload the archive at `archive_path`. Failures are reported as `UploadFailed`.
    async fn upload(&self, archive_path: &Path) -> Result<ArtifactReference, PackagingError>;
}

#[async_trait]
impl<T: PackageBuilder + ?Sized> PackageBuilder for Box<T> {
    async fn build(
        &self,
        source_dir: &Path,
        stage: &StageName,
    ) -> Result<BuildOutput, PackagingError> {
        (**self).build(source_dir, stage).await
    }
}

#[async_trait]
impl<T: ArtifactStore + ?Sized> ArtifactStore for Box<T> {
    async fn upload(&self, archive_path: &Path) -> Result<ArtifactReference, PackagingError> {
        (**self).upload(archive_path).await
    }
}
