/// `load_config` module: Loads a static YAML run config and adapts it into the core's
/// `PackagingRequest` and `PackageConfig`.
///
/// This module is the only place where user-supplied YAML is parsed and mapped to the
/// strongly-typed pipeline inputs.
///
/// # Responsibilities
/// - Parse the YAML run config into intermediate serde structs
/// - Validate the stage name and map `package` / `assets` / `overrides` onto core types
/// - Inject secrets from the environment (`ASSET_STORE_API_KEY` for the HTTP store)
///
/// # Errors
/// All errors use `anyhow::Error` with context and are surfaced at the CLI boundary.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chalice_bundle_core::build::{
    default_container_image, default_init_commands, detect_python_version, BuildStrategy,
    PackageConfig, DEFAULT_OUTPUT_ROOT,
};
use chalice_bundle_core::pipeline::PackagingRequest;
use chalice_bundle_core::stage_config::StagesPolicy;
use chalice_bundle_core::template::TemplateOverrides;
use chalice_bundle_core::StageName;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

/// Environment variable holding the bearer token for the HTTP asset store.
pub const ASSET_STORE_API_KEY_VAR: &str = "ASSET_STORE_API_KEY";

/// Fully resolved CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub request: PackagingRequest,
    pub package: PackageConfig,
    pub assets: AssetsConfig,
}

/// Where the deployment archive is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetsConfig {
    Local {
        staging_dir: PathBuf,
        bucket: String,
    },
    Http {
        endpoint: String,
        bucket: String,
        api_key: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    source_dir: PathBuf,
    stage: String,
    #[serde(default = "empty_object")]
    stage_config: Value,
    #[serde(default)]
    stages_policy: RawStagesPolicy,
    #[serde(default)]
    package: PackageSection,
    assets: AssetsSection,
    #[serde(default)]
    overrides: OverridesSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawStagesPolicy {
    #[default]
    AutoCreate,
    RequireExisting,
}

#[derive(Debug, Deserialize)]
struct PackageSection {
    #[serde(default)]
    use_container: bool,
    #[serde(default)]
    image: Option<String>,
    /// Commands run in the container before `chalice package`.
    #[serde(default)]
    init_commands: Option<Vec<String>>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default = "inherit_env_default")]
    inherit_env: bool,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum AssetsSection {
    Local { staging_dir: PathBuf, bucket: String },
    Http { endpoint: String, bucket: String },
}

#[derive(Debug, Default, Deserialize)]
struct OverridesSection {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    environment_variables: Option<BTreeMap<String, String>>,
}

impl Default for PackageSection {
    fn default() -> Self {
        Self {
            use_container: false,
            image: None,
            init_commands: None,
            env: BTreeMap::new(),
            inherit_env: inherit_env_default(),
            timeout_secs: None,
            output_dir: None,
        }
    }
}

fn inherit_env_default() -> bool {
    true
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Loads a static YAML run config and injects secrets from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading run configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let raw: RawConfig = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;

    let stage = StageName::new(raw.stage).context("Invalid 'stage' in config")?;

    let strategy = if raw.package.use_container {
        BuildStrategy::Container {
            image: raw
                .package
                .image
                .unwrap_or_else(|| default_container_image(&detect_python_version())),
            init_commands: raw
                .package
                .init_commands
                .unwrap_or_else(default_init_commands),
        }
    } else {
        BuildStrategy::LocalProcess
    };
    info!(strategy = ?strategy, "Selected build strategy from config");

    let package = PackageConfig::with_env(strategy, raw.package.env)
        .output_root(
            raw.package
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT)),
        )
        .timeout(raw.package.timeout_secs.map(Duration::from_secs))
        .inherit_env(raw.package.inherit_env);

    let assets = match raw.assets {
        AssetsSection::Local {
            staging_dir,
            bucket,
        } => AssetsConfig::Local {
            staging_dir,
            bucket,
        },
        AssetsSection::Http { endpoint, bucket } => {
            let api_key = std::env::var(ASSET_STORE_API_KEY_VAR).ok();
            info!(
                endpoint = %endpoint,
                api_key_set = api_key.is_some(),
                "HTTP asset store configured"
            );
            AssetsConfig::Http {
                endpoint,
                bucket,
                api_key,
            }
        }
    };

    let stages_policy = match raw.stages_policy {
        RawStagesPolicy::AutoCreate => StagesPolicy::AutoCreate,
        RawStagesPolicy::RequireExisting => StagesPolicy::RequireExisting,
    };

    let request = PackagingRequest::new(raw.source_dir, stage, raw.stage_config)
        .with_overrides(TemplateOverrides {
            role: raw.overrides.role,
            environment_variables: raw.overrides.environment_variables,
        })
        .with_stages_policy(stages_policy);

    info!(
        stage = %request.stage,
        source_dir = %request.source_dir.display(),
        output_root = %package.output_root.display(),
        "Config loaded successfully"
    );

    Ok(CliConfig {
        request,
        package,
        assets,
    })
}
