//! Merges a stage's settings into the application's `.chalice/config.json`.
//!
//! The config document is rewritten in place. Merges against the same file are
//! serialised through a process-wide lock per canonical path; writers in other
//! processes are not coordinated.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::error::PackagingError;
use crate::stage::StageName;

/// Location of the config document relative to the application source directory.
pub const CONFIG_RELATIVE_PATH: &str = ".chalice/config.json";

/// What to do when the config document has no `stages` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagesPolicy {
    /// Create an empty `stages` mapping.
    #[default]
    AutoCreate,
    /// Fail with `ConfigNotFound`.
    RequireExisting,
}

pub fn config_path(source_dir: &Path) -> PathBuf {
    source_dir.join(CONFIG_RELATIVE_PATH)
}

/// Set `stages[stage] = stage_config` in the config document under `source_dir`.
pub fn merge_stage_config(
    source_dir: &Path,
    stage: &StageName,
    stage_config: &Value,
    policy: StagesPolicy,
) -> Result<(), PackagingError> {
    merge_into_file(&config_path(source_dir), stage, stage_config, policy)
}

/// Same as [`merge_stage_config`] for an explicit config document path.
pub fn merge_into_file(
    path: &Path,
    stage: &StageName,
    stage_config: &Value,
    policy: StagesPolicy,
) -> Result<(), PackagingError> {
    let not_found = |reason: String| {
        error!(config_path = %path.display(), reason = %reason, "[CONFIG][ERROR] Chalice config unusable");
        PackagingError::ConfigNotFound {
            path: path.to_path_buf(),
            reason,
        }
    };

    let canonical = path
        .canonicalize()
        .map_err(|e| not_found(e.to_string()))?;
    let lock = file_lock(&canonical);
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&canonical)
        .map_err(|e| not_found(e.to_string()))?;

    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|e| not_found(e.to_string()))?;

    let mut document: Value =
        serde_json::from_str(&content).map_err(|e| not_found(format!("invalid JSON: {e}")))?;
    let root = document
        .as_object_mut()
        .ok_or_else(|| not_found("top-level value is not a JSON object".to_string()))?;

    apply_stage(root, stage, stage_config, policy).map_err(not_found)?;

    let serialized = serde_json::to_string_pretty(&document)
        .map_err(|e| not_found(format!("could not serialise config: {e}")))?;
    let rewrite = |file: &mut std::fs::File| -> std::io::Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serialized.as_bytes())?;
        file.set_len(serialized.len() as u64)?;
        file.flush()
    };
    rewrite(&mut file)
        .map_err(|e| PackagingError::io(format!("Failed to rewrite {}", path.display()), e))?;

    info!(config_path = %path.display(), stage = %stage, "[CONFIG] Merged stage configuration");
    debug!(document = %serialized, "[CONFIG] Config document after merge");
    Ok(())
}

fn apply_stage(
    root: &mut Map<String, Value>,
    stage: &StageName,
    stage_config: &Value,
    policy: StagesPolicy,
) -> Result<(), String> {
    if !root.contains_key("stages") {
        match policy {
            StagesPolicy::AutoCreate => {
                root.insert("stages".to_string(), Value::Object(Map::new()));
            }
            StagesPolicy::RequireExisting => {
                return Err("config has no 'stages' key".to_string());
            }
        }
    }
    let stages = root
        .get_mut("stages")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| "'stages' is not a JSON object".to_string())?;
    stages.insert(stage.to_string(), stage_config.clone());
    Ok(())
}

fn file_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let registry = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    locks
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}
