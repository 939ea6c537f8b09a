#![doc = "chalice-bundle-core: packaging pipeline for Chalice applications."]

//! Merges a stage into `.chalice/config.json`, runs `chalice package` (locally or in a
//! container), uploads the resulting `deployment.zip` through an [`contract::ArtifactStore`]
//! and rewrites the generated SAM template to reference the uploaded object.
//!
//! # Usage
//! Build a [`pipeline::PackagingPipeline`] from a [`contract::PackageBuilder`] (see
//! [`build::PackageConfig::into_builder`]) and an artifact store, then call
//! [`pipeline::PackagingPipeline::run`].

pub mod artifact;
pub mod build;
pub mod contract;
pub mod error;
pub mod pipeline;
pub mod stage;
pub mod stage_config;
pub mod template;

pub use error::{FailureKind, PackagingError};
pub use stage::StageName;
