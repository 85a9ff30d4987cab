//! Engine state file — load, save (atomic), path derivation.
//!
//! The local engine persists one YAML state file per deployment: the signing
//! seed, the logical-to-physical name map, generated secrets, and the last
//! emitted outputs. Reusing the file across runs is what makes repeated
//! applies reconcile instead of duplicate.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use indexmap::IndexMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::provider::EngineError;

/// Persisted engine state for one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    /// Schema version
    pub schema: String,

    /// Per-deployment signing seed (base64, 32 bytes)
    pub seed: String,

    /// Logical name → physical name
    #[serde(default)]
    pub physical_names: IndexMap<String, String>,

    /// Logical name → generated secret
    #[serde(default)]
    pub secrets: IndexMap<String, String>,

    /// Outputs from the last successful apply
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

impl EngineState {
    /// Decode the seed. A corrupt seed is a state error, not a panic.
    pub fn seed_bytes(&self) -> Result<[u8; 32], EngineError> {
        let raw = STANDARD
            .decode(&self.seed)
            .map_err(|e| EngineError::State(format!("corrupt seed: {}", e)))?;
        raw.try_into()
            .map_err(|_| EngineError::State("seed must be 32 bytes".to_string()))
    }
}

/// Derive the state file path within the state directory.
pub fn state_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join("engine.state.yaml")
}

/// Load the state file. Returns None if it doesn't exist.
pub fn load_state(state_dir: &Path) -> Result<Option<EngineState>, EngineError> {
    let path = state_file_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| EngineError::State(format!("cannot read {}: {}", path.display(), e)))?;
    let state: EngineState = serde_yaml_ng::from_str(&content)
        .map_err(|e| EngineError::State(format!("invalid state file {}: {}", path.display(), e)))?;
    Ok(Some(state))
}

/// Save the state file atomically (write to temp, then rename).
pub fn save_state(state_dir: &Path, state: &EngineState) -> Result<(), EngineError> {
    let path = state_file_path(state_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| EngineError::State(format!("cannot create dir {}: {}", parent.display(), e)))?;
    }

    let yaml = serde_yaml_ng::to_string(state)
        .map_err(|e| EngineError::State(format!("serialize error: {}", e)))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| EngineError::State(format!("cannot write {}: {}", tmp_path.display(), e)))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        EngineError::State(format!(
            "cannot rename {} -> {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })?;

    Ok(())
}

/// Create a fresh state with a newly drawn seed.
pub fn new_state() -> EngineState {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    EngineState {
        schema: "1.0".to_string(),
        seed: STANDARD.encode(seed),
        physical_names: IndexMap::new(),
        secrets: IndexMap::new(),
        outputs: IndexMap::new(),
    }
}
