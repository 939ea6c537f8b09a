//! High-level pipeline: merge stage config → package → locate archive → rewrite template.
//!
//! [`PackagingPipeline`] runs the four stages strictly in order, once each, with no
//! retries. The first failing stage ends the run and its [`PackagingError`] is
//! returned unchanged, so the caller sees exactly the failure kind of the stage that
//! ran.
//!
//! # Major Types
//! - [`PackagingRequest`]: what to package (source dir, stage, stage config, overrides)
//! - [`PackagedApp`]: the rewritten template plus where everything ended up
//! - [`PipelineState`]: the run's state machine, logged on every transition
//!
//! # Concurrency
//! Runs for distinct source directories/stages may proceed concurrently: output
//! directories are unique per build and config merges are serialised per file
//! within the process.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{error, info};

use crate::artifact::ArtifactLocator;
use crate::contract::{ArtifactReference, ArtifactStore, BuildOutput, PackageBuilder};
use crate::error::{FailureKind, PackagingError};
use crate::stage::StageName;
use crate::stage_config::{merge_stage_config, StagesPolicy};
use crate::template::{self, GeneratedTemplate, TemplateOverrides};

/// Suffix of the rewritten template written next to the build directory.
pub const REWRITTEN_TEMPLATE_SUFFIX: &str = "sam_with_assets.json";

/// Input for one pipeline run.
#[derive(Debug, Clone)]
pub struct PackagingRequest {
    pub source_dir: PathBuf,
    pub stage: StageName,
    /// Written verbatim to `stages.<stage>` of `.chalice/config.json`.
    pub stage_config: Value,
    pub overrides: TemplateOverrides,
    pub stages_policy: StagesPolicy,
}

impl PackagingRequest {
    pub fn new(source_dir: impl Into<PathBuf>, stage: StageName, stage_config: Value) -> Self {
        Self {
            source_dir: source_dir.into(),
            stage,
            stage_config,
            overrides: TemplateOverrides::default(),
            stages_policy: StagesPolicy::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: TemplateOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_stages_policy(mut self, policy: StagesPolicy) -> Self {
        self.stages_policy = policy;
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct PackagedApp {
    pub stage: StageName,
    pub build: BuildOutput,
    pub artifact: ArtifactReference,
    pub template: GeneratedTemplate,
    /// `<output_root>/<build_id>.sam_with_assets.json`
    pub template_path: PathBuf,
}

/// States of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ConfigMerged,
    Packaged,
    ArtifactLocated,
    TemplateRewritten,
    Failed(FailureKind),
}

impl PipelineState {
    /// The state reached when the stage run from `self` succeeds, or `None` if terminal.
    pub fn next(self) -> Option<PipelineState> {
        match self {
            PipelineState::Idle => Some(PipelineState::ConfigMerged),
            PipelineState::ConfigMerged => Some(PipelineState::Packaged),
            PipelineState::Packaged => Some(PipelineState::ArtifactLocated),
            PipelineState::ArtifactLocated => Some(PipelineState::TemplateRewritten),
            PipelineState::TemplateRewritten | PipelineState::Failed(_) => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

/// Orchestrates one packaging run per [`PackagingPipeline::run`] call.
pub struct PackagingPipeline<B, S> {
    builder: B,
    locator: ArtifactLocator<S>,
}

impl<B, S> PackagingPipeline<B, S>
where
    B: PackageBuilder,
    S: ArtifactStore,
{
    pub fn new(builder: B, store: S) -> Self {
        Self {
            builder,
            locator: ArtifactLocator::new(store),
        }
    }

    pub async fn run(&self, request: &PackagingRequest) -> Result<PackagedApp, PackagingError> {
        let mut state = PipelineState::Idle;
        info!(
            stage = %request.stage,
            source_dir = %request.source_dir.display(),
            "[PIPELINE] Packaging Chalice app"
        );

        let merged = merge_stage_config(
            &request.source_dir,
            &request.stage,
            &request.stage_config,
            request.stages_policy,
        );
        track(&mut state, merged)?;

        let build = self
            .builder
            .build(&request.source_dir, &request.stage)
            .await;
        let build = track(&mut state, build)?;

        let artifact = self.locator.locate(&build.archive_path()).await;
        let artifact = track(&mut state, artifact)?;

        let rewritten = template::rewrite_file(&build.template_path(), &artifact, &request.overrides)
            .and_then(|template| {
                let template_path = rewritten_template_path(&build);
                template.write_to(&template_path)?;
                Ok((template, template_path))
            });
        let (template, template_path) = track(&mut state, rewritten)?;

        Ok(PackagedApp {
            stage: request.stage.clone(),
            build,
            artifact,
            template,
            template_path,
        })
    }
}

/// `<output_root>/<build_id>.sam_with_assets.json` for a build in `<output_root>/<build_id>`.
pub fn rewritten_template_path(build: &BuildOutput) -> PathBuf {
    let file_name = format!("{}.{REWRITTEN_TEMPLATE_SUFFIX}", build.build_id);
    build
        .dir
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(file_name)
}

fn track<T>(state: &mut PipelineState, result: Result<T, PackagingError>) -> Result<T, PackagingError> {
    let from = *state;
    match result {
        Ok(value) => {
            // `next` is only None for terminal states, which never run a stage.
            let to = from.next().unwrap_or(from);
            *state = to;
            info!(from = ?from, to = ?to, "[PIPELINE] Stage complete");
            Ok(value)
        }
        Err(e) => {
            let to = PipelineState::Failed(e.kind());
            *state = to;
            error!(from = ?from, to = ?to, error = %e, "[PIPELINE][ERROR] Stage failed");
            Err(e)
        }
    }
}
