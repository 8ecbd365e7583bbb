//! Files a run reads and writes, all resolved against one working directory.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use zazu_types::{load_json, ZazuResult};

pub const MODEL_FILE: &str = "model.txt";
pub const BEST_TRIAL_FILE: &str = "best_trial.json";
pub const CHECKPOINT_FILE: &str = "checkpoint.pt";
pub const MODELS_SPEC_FILE: &str = "models.json";
pub const CONFIGS_FILE: &str = "configs.json";
pub const GLOBAL_CONFIGS_FILE: &str = "global_configs.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    root: PathBuf,
}

impl ArtifactPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model(&self) -> PathBuf {
        self.root.join(MODEL_FILE)
    }

    pub fn best_trial(&self) -> PathBuf {
        self.root.join(BEST_TRIAL_FILE)
    }

    pub fn checkpoint(&self) -> PathBuf {
        self.root.join(CHECKPOINT_FILE)
    }

    pub fn models_spec(&self) -> PathBuf {
        self.root.join(MODELS_SPEC_FILE)
    }

    pub fn configs(&self) -> PathBuf {
        self.root.join(CONFIGS_FILE)
    }

    pub fn global_configs(&self) -> PathBuf {
        self.root.join(GLOBAL_CONFIGS_FILE)
    }

    pub fn read_model_name(&self) -> ZazuResult<String> {
        let raw = fs::read_to_string(self.model())?;
        Ok(raw.trim().to_string())
    }

    pub fn write_model_name(&self, name: &str) -> ZazuResult<()> {
        write_atomic(&self.model(), name.as_bytes())
    }

    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> ZazuResult<T> {
        load_json(path)
    }

    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> ZazuResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        write_atomic(path, &bytes)
    }
}

/// Replace `path` wholesale: write a temporary sibling, then rename it over
/// the target.
pub fn write_atomic(path: &Path, contents: &[u8]) -> ZazuResult<()> {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".tmp");
    let tmp = path.with_file_name(name);

    if path.exists() {
        info!(path = %path.display(), "overwriting existing artifact");
    }
    fs::write(&tmp, contents)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    debug!(path = %path.display(), bytes = contents.len(), "artifact written");
    Ok(())
}
