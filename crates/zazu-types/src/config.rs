//! Run configuration loaded from `configs.json` and `global_configs.json`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{ConfigError, ZazuResult};

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

impl ObjectiveDirection {
    /// `true` when `candidate` is strictly better than `incumbent`.
    pub fn improves(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            ObjectiveDirection::Maximize => candidate > incumbent,
            ObjectiveDirection::Minimize => candidate < incumbent,
        }
    }

    /// Map a metric onto a "higher is better" scale.
    pub fn score(&self, metric: f64) -> f64 {
        match self {
            ObjectiveDirection::Maximize => metric,
            ObjectiveDirection::Minimize => -metric,
        }
    }
}

/// Which search strategy drives trial proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    #[default]
    Grid,
    Random,
    Bayesian,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Grid => "grid",
            SearchMethod::Random => "random",
            SearchMethod::Bayesian => "bayesian",
        }
    }
}

/// Relative weights the model selector gives to each catalog rating. The
/// memory weight counts against a model, since its rating is a footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Priority {
    pub accuracy: f64,
    pub speed: f64,
    pub memory: f64,
}

impl Default for Priority {
    fn default() -> Self {
        Self {
            accuracy: 1.0,
            speed: 1.0,
            memory: 1.0,
        }
    }
}

/// How the local executor launches the trainer process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Program and leading arguments; the mode (`trial`, `train`, `predict`)
    /// is appended as the last argument.
    pub command: Vec<String>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            command: vec!["zazu-trainer".to_string()],
        }
    }
}

/// Contents of `configs.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Task type the selected model must support (e.g. "detection").
    pub task: String,

    #[serde(default)]
    pub priority: Priority,

    /// Pin a catalog entry by name instead of ranking.
    #[serde(default)]
    pub preferred_model: Option<String>,

    #[serde(default)]
    pub preferred_tags: Vec<String>,

    /// Largest memory footprint rating a candidate may have.
    #[serde(default)]
    pub max_memory_rating: Option<f64>,

    /// Maximum number of trials to run.
    #[serde(default = "default_max_trials")]
    pub max_trials: usize,

    /// How many trials to run in parallel.
    #[serde(default = "default_max_instances")]
    pub max_instances_at_once: usize,

    #[serde(default)]
    pub search_method: SearchMethod,

    #[serde(default)]
    pub direction: ObjectiveDirection,

    #[serde(default = "default_objective_metric")]
    pub objective_metric: String,

    /// Stop after this many consecutive batches without improvement.
    #[serde(default)]
    pub patience: Option<usize>,

    /// Seed for reproducible proposals and final training.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Number of steps per continuous dimension for grid search.
    #[serde(default = "default_grid_steps")]
    pub grid_steps: usize,

    /// Exploration weight for Bayesian search (ignored for grid/random).
    #[serde(default = "default_exploration_weight")]
    pub exploration_weight: f64,

    /// Opaque dataset reference understood by the platform.
    #[serde(default, alias = "dataloop")]
    pub dataset: serde_json::Value,

    #[serde(default)]
    pub trainer: TrainerConfig,
}

fn default_max_trials() -> usize {
    20
}

fn default_max_instances() -> usize {
    1
}

fn default_objective_metric() -> String {
    "val_accuracy".to_string()
}

fn default_grid_steps() -> usize {
    5
}

fn default_exploration_weight() -> f64 {
    0.3
}

impl RunConfig {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            priority: Priority::default(),
            preferred_model: None,
            preferred_tags: Vec::new(),
            max_memory_rating: None,
            max_trials: default_max_trials(),
            max_instances_at_once: default_max_instances(),
            search_method: SearchMethod::default(),
            direction: ObjectiveDirection::default(),
            objective_metric: default_objective_metric(),
            patience: None,
            seed: None,
            grid_steps: default_grid_steps(),
            exploration_weight: default_exploration_weight(),
            dataset: serde_json::Value::Null,
            trainer: TrainerConfig::default(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> ZazuResult<Self> {
        let config: Self = load_json(path.as_ref())?;
        config.validate().map_err(|message| ConfigError::InvalidSpec {
            path: path.as_ref().to_path_buf(),
            message,
        })?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.task.trim().is_empty() {
            return Err("'task' must not be empty".into());
        }
        if self.max_trials == 0 {
            return Err("'max_trials' must be at least 1".into());
        }
        if self.max_instances_at_once == 0 {
            return Err("'max_instances_at_once' must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.exploration_weight) {
            return Err("'exploration_weight' must be within [0, 1]".into());
        }
        if self.trainer.command.is_empty() {
            return Err("'trainer.command' must name a program".into());
        }
        Ok(())
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_max_instances(mut self, n: usize) -> Self {
        self.max_instances_at_once = n;
        self
    }

    pub fn with_search_method(mut self, method: SearchMethod) -> Self {
        self.search_method = method;
        self
    }

    pub fn with_objective(mut self, metric: &str, direction: ObjectiveDirection) -> Self {
        self.objective_metric = metric.to_string();
        self.direction = direction;
        self
    }

    pub fn with_patience(mut self, batches: usize) -> Self {
        self.patience = Some(batches);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Contents of `global_configs.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Platform project that hosts the deployed services.
    pub project: String,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_platform_url")]
    pub platform_url: String,
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_platform_url() -> String {
    "http://localhost:8080".to_string()
}

impl GlobalConfig {
    pub fn load(path: impl AsRef<Path>) -> ZazuResult<Self> {
        load_json(path.as_ref())
    }
}

/// Read and deserialize a JSON spec file, mapping absence and parse failures
/// to configuration errors.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> ZazuResult<T> {
    if !path.exists() {
        return Err(ConfigError::MissingSpec {
            path: path.to_path_buf(),
        }
        .into());
    }
    let raw = std::fs::read_to_string(path)?;
    let value = serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidSpec {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    tracing::debug!(path = %path.display(), "loaded spec file");
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ZazuError;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn run_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "configs.json", r#"{"task": "classification"}"#);

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.max_trials, 20);
        assert_eq!(config.max_instances_at_once, 1);
        assert_eq!(config.search_method, SearchMethod::Grid);
        assert_eq!(config.direction, ObjectiveDirection::Maximize);
        assert_eq!(config.trainer.command, vec!["zazu-trainer".to_string()]);
    }

    #[test]
    fn run_config_accepts_dataloop_alias() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "configs.json",
            r#"{"task": "detection", "dataloop": {"dataset": "cats"}, "direction": "minimize"}"#,
        );

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.dataset["dataset"], "cats");
        assert_eq!(config.direction, ObjectiveDirection::Minimize);
    }

    #[test]
    fn run_config_rejects_zero_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "configs.json",
            r#"{"task": "detection", "max_instances_at_once": 0}"#,
        );

        match RunConfig::load(&path) {
            Err(ZazuError::Config(ConfigError::InvalidSpec { message, .. })) => {
                assert!(message.contains("max_instances_at_once"))
            }
            other => panic!("expected invalid spec, got {other:?}"),
        }
    }

    #[test]
    fn missing_spec_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = GlobalConfig::load(dir.path().join("global_configs.json"));
        assert!(matches!(
            result,
            Err(ZazuError::Config(ConfigError::MissingSpec { .. }))
        ));
    }

    #[test]
    fn direction_comparisons() {
        assert!(ObjectiveDirection::Maximize.improves(0.9, 0.8));
        assert!(!ObjectiveDirection::Maximize.improves(0.8, 0.8));
        assert!(ObjectiveDirection::Minimize.improves(0.1, 0.2));
        assert_eq!(ObjectiveDirection::Minimize.score(0.5), -0.5);
    }
}
