//! Packaging strategies: run `chalice package` as a local process or inside a container.
//!
//! Both strategies allocate a fresh output directory per call from an [`OutputArena`]
//! and return it only once `deployment.zip` and `sam.json` are both present. A failed
//! build removes its own output directory.
//!
//! # Major Types
//! - [`PackageConfig`]: strategy, environment, output root and optional timeout
//! - [`LocalProcessBuilder`]: resolves `chalice` on `PATH` and runs it directly
//! - [`ContainerBuilder`]: runs the init commands then `chalice package` in a throwaway container

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::contract::{BuildOutput, PackageBuilder};
use crate::error::PackagingError;
use crate::stage::StageName;

/// `chalice package` refuses to run without a region.
pub const REGION_ENV_VAR: &str = "AWS_DEFAULT_REGION";
pub const DEFAULT_REGION: &str = "us-east-1";

pub const DEFAULT_TOOL: &str = "chalice";
pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";
pub const DEFAULT_OUTPUT_ROOT: &str = "chalice.out";
/// Used for the default image when the host interpreter cannot be queried.
pub const DEFAULT_PYTHON_VERSION: &str = "3.12";

pub const CONTAINER_APP_DIR: &str = "/app";
pub const CONTAINER_OUTPUT_DIR: &str = "/chalice.out";
/// Run in the container before `chalice package` unless the caller supplies its own list.
pub const DEFAULT_INIT_COMMAND: &str = "pip install --no-cache-dir -r requirements.txt";

/// `$0` placeholder for the container's `bash -c` script; the stage name follows as `$1`.
const CONTAINER_SCRIPT_NAME: &str = "chalice-bundle";

/// How `chalice package` is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStrategy {
    /// Run the executable found on the caller's `PATH`.
    LocalProcess,
    /// Run inside a container created from `image`, removed afterwards.
    ///
    /// `init_commands` run in order, in the application directory, before `chalice package`.
    Container {
        image: String,
        init_commands: Vec<String>,
    },
}

impl BuildStrategy {
    /// Container strategy for `image` that installs `requirements.txt` first.
    pub fn container(image: impl Into<String>) -> Self {
        BuildStrategy::Container {
            image: image.into(),
            init_commands: default_init_commands(),
        }
    }
}

pub fn default_init_commands() -> Vec<String> {
    vec![DEFAULT_INIT_COMMAND.to_string()]
}

/// Configuration shared by both strategies.
#[derive(Debug, Clone)]
pub struct PackageConfig {
    pub strategy: BuildStrategy,
    /// Environment for the packaging tool. Always contains [`REGION_ENV_VAR`].
    pub env: BTreeMap<String, String>,
    /// Parent of the per-build output directories.
    pub output_root: PathBuf,
    pub timeout: Option<Duration>,
    /// Whether the local process sees the caller's environment under `env`.
    /// When false it gets only `env` plus `PATH`.
    pub inherit_env: bool,
}

impl PackageConfig {
    pub fn new(strategy: BuildStrategy) -> Self {
        Self::with_env(strategy, BTreeMap::new())
    }

    /// Injects the default region into `env` unless the caller already set one.
    pub fn with_env(strategy: BuildStrategy, mut env: BTreeMap<String, String>) -> Self {
        env.entry(REGION_ENV_VAR.to_string())
            .or_insert_with(|| DEFAULT_REGION.to_string());
        Self {
            strategy,
            env,
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            timeout: None,
            inherit_env: true,
        }
    }

    pub fn output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = output_root.into();
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn inherit_env(mut self, inherit_env: bool) -> Self {
        self.inherit_env = inherit_env;
        self
    }

    /// Build the [`PackageBuilder`] selected by [`PackageConfig::strategy`].
    pub fn into_builder(self) -> Box<dyn PackageBuilder> {
        let arena = OutputArena::new(self.output_root);
        match self.strategy {
            BuildStrategy::LocalProcess => Box::new(LocalProcessBuilder {
                tool: DEFAULT_TOOL.to_string(),
                env: self.env,
                inherit_env: self.inherit_env,
                arena,
                timeout: self.timeout,
            }),
            BuildStrategy::Container {
                image,
                init_commands,
            } => Box::new(ContainerBuilder {
                image,
                init_commands,
                runtime: DEFAULT_CONTAINER_RUNTIME.to_string(),
                env: self.env,
                arena,
                timeout: self.timeout,
            }),
        }
    }
}

/// `public.ecr.aws/sam/build-python<major.minor>`
pub fn default_container_image(python_version: &str) -> String {
    format!("public.ecr.aws/sam/build-python{python_version}")
}

/// `major.minor` of the host's `python3`, or [`DEFAULT_PYTHON_VERSION`].
pub fn detect_python_version() -> String {
    let detected = std::process::Command::new("python3")
        .arg("--version")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| {
            // Older interpreters print the version on stderr.
            let text = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            parse_python_version(&text)
        });
    match detected {
        Some(version) => version,
        None => {
            warn!(
                fallback = DEFAULT_PYTHON_VERSION,
                "[BUILD] Could not detect host Python version"
            );
            DEFAULT_PYTHON_VERSION.to_string()
        }
    }
}

/// Parses `Python 3.11.4` into `3.11`.
pub fn parse_python_version(text: &str) -> Option<String> {
    let version = text.trim().strip_prefix("Python ")?;
    let mut parts = version.split('.');
    let major = parts.next()?.trim();
    let minor = parts.next()?.trim();
    let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if numeric(major) && numeric(minor) {
        Some(format!("{major}.{minor}"))
    } else {
        None
    }
}

/// Hands out one never-reused directory per build, named by a random UUID.
#[derive(Debug, Clone)]
pub struct OutputArena {
    root: PathBuf,
}

impl OutputArena {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create `<root>/<uuid>` and return it as an absolute path.
    pub fn allocate(&self) -> Result<BuildOutput, PackagingError> {
        fs::create_dir_all(&self.root).map_err(|e| {
            PackagingError::io(
                format!("Failed to create output root {}", self.root.display()),
                e,
            )
        })?;
        let root = self.root.canonicalize().map_err(|e| {
            PackagingError::io(
                format!("Failed to resolve output root {}", self.root.display()),
                e,
            )
        })?;
        let build_id = Uuid::new_v4().simple().to_string();
        let dir = root.join(&build_id);
        // create_dir (not _all) so an existing directory is never adopted.
        fs::create_dir(&dir).map_err(|e| {
            PackagingError::io(format!("Failed to create build directory {}", dir.display()), e)
        })?;
        debug!(build_dir = %dir.display(), "[BUILD] Allocated build directory");
        Ok(BuildOutput::new(build_id, dir))
    }

    /// Drop a failed build's directory. Failure to do so is logged, not returned.
    pub fn discard(&self, output: &BuildOutput) {
        if let Err(e) = fs::remove_dir_all(&output.dir) {
            warn!(error = ?e, build_dir = %output.dir.display(), "[BUILD] Failed to remove build directory");
        }
    }
}

/// Runs the packaging executable found on `PATH` with `source_dir` as working directory.
///
/// By default the process inherits the caller's environment with the configured mapping
/// laid over it, so credentials and virtualenv settings reach `chalice`. With
/// `PackageConfig::inherit_env` set to false it sees only the mapping and `PATH`.
#[derive(Debug, Clone)]
pub struct LocalProcessBuilder {
    tool: String,
    env: BTreeMap<String, String>,
    inherit_env: bool,
    arena: OutputArena,
    timeout: Option<Duration>,
}

impl LocalProcessBuilder {
    pub fn new(config: &PackageConfig) -> Self {
        Self {
            tool: DEFAULT_TOOL.to_string(),
            env: config.env.clone(),
            inherit_env: config.inherit_env,
            arena: OutputArena::new(&config.output_root),
            timeout: config.timeout,
        }
    }

    /// Use another executable name or path instead of `chalice`.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }
}

#[async_trait]
impl PackageBuilder for LocalProcessBuilder {
    async fn build(
        &self,
        source_dir: &Path,
        stage: &StageName,
    ) -> Result<BuildOutput, PackagingError> {
        let executable = resolve_executable(&self.tool)?;
        let output = self.arena.allocate()?;

        info!(
            stage = %stage,
            source_dir = %source_dir.display(),
            build_dir = %output.dir.display(),
            "[BUILD] Packaging Chalice app in local process"
        );

        let mut command = Command::new(&executable);
        command
            .arg("package")
            .arg("--stage")
            .arg(stage.as_str())
            .arg(&output.dir)
            .current_dir(source_dir);
        if !self.inherit_env {
            command.env_clear();
            if let Some(path) = std::env::var_os("PATH") {
                command.env("PATH", path);
            }
        }
        command.envs(&self.env);
        debug!(command = ?command, "[BUILD] Launching packaging tool");

        let result = run_captured(&mut command, self.timeout, &self.tool)
            .await
            .and_then(|run| check_exit(run, &self.tool))
            .and_then(|_| verify_output(&output));
        finish(&self.arena, output, result)
    }
}

/// Runs the init commands and `chalice package` inside a container that is always removed.
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    image: String,
    init_commands: Vec<String>,
    runtime: String,
    env: BTreeMap<String, String>,
    arena: OutputArena,
    timeout: Option<Duration>,
}

impl ContainerBuilder {
    pub fn new(image: impl Into<String>, config: &PackageConfig) -> Self {
        Self {
            image: image.into(),
            init_commands: default_init_commands(),
            runtime: DEFAULT_CONTAINER_RUNTIME.to_string(),
            env: config.env.clone(),
            arena: OutputArena::new(&config.output_root),
            timeout: config.timeout,
        }
    }

    /// Use another container CLI (name or path) instead of `docker`.
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Replace the commands run before `chalice package`; an empty list runs none.
    pub fn with_init_commands(mut self, init_commands: Vec<String>) -> Self {
        self.init_commands = init_commands;
        self
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn init_commands(&self) -> &[String] {
        &self.init_commands
    }

    /// `bash -c` script run in the container's working directory.
    ///
    /// The stage name is never part of the script text; it is passed as `$1`.
    pub fn container_script(&self) -> String {
        let package = format!("chalice package --stage \"$1\" {CONTAINER_OUTPUT_DIR}");
        self.init_commands
            .iter()
            .cloned()
            .chain(std::iter::once(package))
            .collect::<Vec<_>>()
            .join("; ")
    }

    async fn ensure_image(&self, runtime: &Path) -> Result<(), PackagingError> {
        let mut inspect = Command::new(runtime);
        inspect.args(["image", "inspect", self.image.as_str()]);
        if let Ok(run) = run_captured(&mut inspect, None, &self.runtime).await {
            if run.status.success() {
                debug!(image = %self.image, "[BUILD] Container image present locally");
                return Ok(());
            }
        }

        info!(image = %self.image, "[BUILD] Pulling container image");
        let mut pull = Command::new(runtime);
        pull.args(["pull", self.image.as_str()]);
        let run = run_captured(&mut pull, self.timeout, &self.runtime).await?;
        if run.status.success() {
            return Ok(());
        }
        let diagnostics = diagnostics(&run);
        if image_missing(&run) {
            error!(
                image = %self.image,
                diagnostics = %diagnostics,
                "[BUILD][ERROR] Container image could not be resolved"
            );
            return Err(PackagingError::ImageNotFound {
                image: self.image.clone(),
            });
        }
        // Daemon, network and auth failures are not configuration errors.
        error!(
            image = %self.image,
            diagnostics = %diagnostics,
            "[BUILD][ERROR] Container runtime failed to pull image"
        );
        Err(PackagingError::PackagingFailed { diagnostics })
    }

    async fn remove_container(&self, runtime: &Path, name: &str) {
        let mut remove = Command::new(runtime);
        remove.args(["rm", "--force", name]);
        match run_captured(&mut remove, None, &self.runtime).await {
            Ok(run) if run.status.success() => {
                debug!(container = name, "[BUILD] Removed container");
            }
            Ok(run) => {
                warn!(container = name, diagnostics = %diagnostics(&run), "[BUILD] Container removal reported failure");
            }
            Err(e) => {
                warn!(container = name, error = %e, "[BUILD] Could not run container removal");
            }
        }
    }
}

#[async_trait]
impl PackageBuilder for ContainerBuilder {
    async fn build(
        &self,
        source_dir: &Path,
        stage: &StageName,
    ) -> Result<BuildOutput, PackagingError> {
        let runtime = resolve_executable(&self.runtime)?;
        let source_dir = source_dir.canonicalize().map_err(|e| {
            PackagingError::io(
                format!("Failed to resolve source directory {}", source_dir.display()),
                e,
            )
        })?;
        self.ensure_image(&runtime).await?;
        let output = self.arena.allocate()?;
        let container_name = format!("chalice-bundle-{}", output.build_id);

        info!(
            stage = %stage,
            image = %self.image,
            container = %container_name,
            build_dir = %output.dir.display(),
            "[BUILD] Packaging Chalice app in container"
        );

        let mut command = Command::new(&runtime);
        command
            .arg("run")
            .arg("--name")
            .arg(&container_name)
            .arg("--volume")
            .arg(format!("{}:{CONTAINER_APP_DIR}:rw", source_dir.display()))
            .arg("--volume")
            .arg(format!("{}:{CONTAINER_OUTPUT_DIR}:rw", output.dir.display()))
            .arg("--workdir")
            .arg(CONTAINER_APP_DIR);
        for (key, value) in &self.env {
            command.arg("--env").arg(format!("{key}={value}"));
        }
        command
            .arg(&self.image)
            .arg("bash")
            .arg("-c")
            .arg(self.container_script())
            .arg(CONTAINER_SCRIPT_NAME)
            .arg(stage.as_str());
        debug!(command = ?command, "[BUILD] Launching container");

        let run = run_captured(&mut command, self.timeout, &self.runtime).await;
        self.remove_container(&runtime, &container_name).await;

        let result = run
            .and_then(|run| {
                if !run.status.success() && image_missing(&run) {
                    return Err(PackagingError::ImageNotFound {
                        image: self.image.clone(),
                    });
                }
                check_exit(run, &self.runtime)
            })
            .and_then(|_| verify_output(&output));
        finish(&self.arena, output, result)
    }
}

fn resolve_executable(tool: &str) -> Result<PathBuf, PackagingError> {
    which::which(tool).map_err(|e| {
        error!(tool = tool, error = %e, "[BUILD][ERROR] Executable not found on PATH");
        PackagingError::ToolNotFound {
            tool: tool.to_string(),
        }
    })
}

async fn run_captured(
    command: &mut Command,
    timeout: Option<Duration>,
    program: &str,
) -> Result<Output, PackagingError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = command
        .spawn()
        .map_err(|e| PackagingError::io(format!("Failed to launch '{program}'"), e))?;
    let waiting = child.wait_with_output();
    let finished = match timeout {
        // Dropping the timed-out future drops the child, which kills it.
        Some(limit) => tokio::time::timeout(limit, waiting).await.map_err(|_| {
            error!(program = program, timeout = ?limit, "[BUILD][ERROR] Packaging timed out");
            PackagingError::TimedOut { after: limit }
        })?,
        None => waiting.await,
    };
    finished.map_err(|e| PackagingError::io(format!("Failed to wait for '{program}'"), e))
}

fn check_exit(run: Output, program: &str) -> Result<Output, PackagingError> {
    if run.status.success() {
        return Ok(run);
    }
    let diagnostics = diagnostics(&run);
    error!(
        program = program,
        status = %run.status,
        diagnostics = %diagnostics,
        "[BUILD][ERROR] Packaging tool exited with failure"
    );
    Err(PackagingError::PackagingFailed { diagnostics })
}

fn verify_output(output: &BuildOutput) -> Result<(), PackagingError> {
    let missing: Vec<String> = [output.archive_path(), output.template_path()]
        .into_iter()
        .filter(|path| !path.is_file())
        .map(|path| path.display().to_string())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    error!(missing = ?missing, "[BUILD][ERROR] Packaging output incomplete");
    Err(PackagingError::PackagingFailed {
        diagnostics: format!(
            "packaging tool exited successfully but did not produce: {}",
            missing.join(", ")
        ),
    })
}

fn finish(
    arena: &OutputArena,
    output: BuildOutput,
    result: Result<(), PackagingError>,
) -> Result<BuildOutput, PackagingError> {
    match result {
        Ok(()) => {
            info!(build_dir = %output.dir.display(), "[BUILD] Packaging succeeded");
            Ok(output)
        }
        Err(e) => {
            arena.discard(&output);
            Err(e)
        }
    }
}

fn diagnostics(run: &Output) -> String {
    let stdout = String::from_utf8_lossy(&run.stdout);
    let stderr = String::from_utf8_lossy(&run.stderr);
    [stdout.trim(), stderr.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn image_missing(run: &Output) -> bool {
    let stderr = String::from_utf8_lossy(&run.stderr);
    [
        "Unable to find image",
        "pull access denied",
        "manifest unknown",
        "repository does not exist",
        "not found: manifest",
    ]
        .iter()
        .any(|marker| stderr.contains(marker))
}
