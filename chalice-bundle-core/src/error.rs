//! Error taxonomy for the packaging pipeline.
//!
//! Every stage of the pipeline fails with a [`PackagingError`]. The variant is the
//! failure kind; [`PackagingError::kind`] exposes it without the payload so callers
//! can branch on the kind alone (e.g. to tell a configuration mistake such as
//! [`FailureKind::ImageNotFound`] apart from a failing build).

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Library-wide error type for packaging operations.
#[derive(Debug, Error)]
pub enum PackagingError {
    /// The application's config document is missing, unparsable or lacks a required `stages` key.
    #[error("Chalice config not found or unreadable at {path}: {reason}")]
    ConfigNotFound { path: PathBuf, reason: String },

    /// The packaging executable (or container runtime) is not on the search path.
    #[error("Could not find '{tool}' executable on PATH")]
    ToolNotFound { tool: String },

    /// The configured container image could not be resolved or pulled.
    #[error(
        "Could not find the specified Docker image: {image}. When using the default \
         public.ecr.aws/sam/build-python images, make sure your Python version is supported. \
         See AWS Lambda Runtimes documentation for supported versions: \
         https://docs.aws.amazon.com/lambda/latest/dg/lambda-runtimes.html"
    )]
    ImageNotFound { image: String },

    /// The packaging tool ran and failed. Carries its captured output verbatim.
    #[error("Packaging failed:\n{diagnostics}")]
    PackagingFailed { diagnostics: String },

    /// The generated template has no resource of the recognised function type.
    #[error("Generated template contains no resource of type {resource_type}")]
    TemplateMissingResource { resource_type: String },

    /// The storage collaborator could not place the archive.
    #[error("Uploading deployment archive failed: {reason}")]
    UploadFailed { reason: String },

    /// Stage names end up inside a container shell command; only `[A-Za-z0-9_-]+` is accepted.
    #[error("Invalid stage name '{name}': must be non-empty and contain only alphanumerics, hyphens or underscores")]
    InvalidStageName { name: String },

    /// The generated template is not a JSON object with a `Resources` mapping.
    #[error("Generated template is invalid: {reason}")]
    InvalidTemplate { reason: String },

    /// A caller-imposed build timeout elapsed.
    #[error("Packaging timed out after {after:?}")]
    TimedOut { after: Duration },

    /// Unexpected filesystem failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

/// Payload-free discriminant of [`PackagingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    ConfigNotFound,
    ToolNotFound,
    ImageNotFound,
    PackagingFailed,
    TemplateMissingResource,
    UploadFailed,
    InvalidStageName,
    InvalidTemplate,
    TimedOut,
    Io,
}

impl PackagingError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PackagingError::ConfigNotFound { .. } => FailureKind::ConfigNotFound,
            PackagingError::ToolNotFound { .. } => FailureKind::ToolNotFound,
            PackagingError::ImageNotFound { .. } => FailureKind::ImageNotFound,
            PackagingError::PackagingFailed { .. } => FailureKind::PackagingFailed,
            PackagingError::TemplateMissingResource { .. } => FailureKind::TemplateMissingResource,
            PackagingError::UploadFailed { .. } => FailureKind::UploadFailed,
            PackagingError::InvalidStageName { .. } => FailureKind::InvalidStageName,
            PackagingError::InvalidTemplate { .. } => FailureKind::InvalidTemplate,
            PackagingError::TimedOut { .. } => FailureKind::TimedOut,
            PackagingError::Io { .. } => FailureKind::Io,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        PackagingError::Io {
            context: context.into(),
            source,
        }
    }
}
