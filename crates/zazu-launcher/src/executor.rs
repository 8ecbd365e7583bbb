//! The execution seam: everything the launcher needs from whoever actually
//! trains models.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use zazu_catalog::SelectedModel;
use zazu_optimizer::{HyperParameters, SearchId, TrialId};
use zazu_types::{RunConfig, TrialError, ZazuError, ZazuResult};

/// Describes a single training job handed to an executor.
///
/// Trial jobs train and evaluate one hyperparameter assignment; the final
/// training and prediction jobs reuse the same shape without a trial id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    /// Unique job id.
    pub job_id: Uuid,

    /// Search this job belongs to, for trial jobs.
    pub search_id: Option<SearchId>,

    pub trial_id: Option<TrialId>,

    /// Catalog name of the model to train.
    pub model_name: String,

    pub hyperparameters: HyperParameters,

    /// Fixed training settings from the catalog (epochs, input size, ...).
    pub training_configs: serde_json::Map<String, serde_json::Value>,

    /// Opaque dataset reference from the run configuration.
    pub dataset: serde_json::Value,

    /// The metric the trainer must report.
    pub objective_metric: String,

    pub seed: Option<u64>,

    /// Accelerator the job is pinned to, in local mode.
    pub device: Option<String>,

    /// Where the checkpoint is written (train) or read from (predict).
    pub checkpoint_path: Option<PathBuf>,

    /// Platform artifact holding the checkpoint, for remote predictions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_artifact: Option<String>,
}

impl TrainingJob {
    pub fn new(model: &SelectedModel, configs: &RunConfig, hyperparameters: HyperParameters) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            search_id: None,
            trial_id: None,
            model_name: model.name.clone(),
            hyperparameters,
            training_configs: model.training_configs.clone(),
            dataset: configs.dataset.clone(),
            objective_metric: configs.objective_metric.clone(),
            seed: configs.seed,
            device: None,
            checkpoint_path: None,
            checkpoint_artifact: None,
        }
    }

    pub fn for_trial(mut self, search_id: SearchId, trial_id: TrialId) -> Self {
        self.search_id = Some(search_id);
        self.trial_id = Some(trial_id);
        self
    }

    pub fn on_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }

    pub fn with_checkpoint(mut self, path: &Path) -> Self {
        self.checkpoint_path = Some(path.to_path_buf());
        self
    }

    pub fn with_checkpoint_artifact(mut self, reference: impl Into<String>) -> Self {
        self.checkpoint_artifact = Some(reference.into());
        self
    }

    /// Error for a failed run of this job: trial jobs fail their trial only,
    /// other jobs fail the step that launched them.
    pub fn failure(&self, kind: &str, message: impl Into<String>) -> ZazuError {
        match self.trial_id {
            Some(trial_id) => TrialError::Execution {
                trial_id,
                message: message.into(),
            }
            .into(),
            None => ZazuError::JobFailed {
                job: kind.to_string(),
                message: message.into(),
            },
        }
    }

    /// Pull the objective out of a trainer's JSON report. Accepts either the
    /// configured metric name or a plain `metric` key.
    pub fn extract_metric(&self, report: &serde_json::Value) -> ZazuResult<f64> {
        report
            .get(&self.objective_metric)
            .or_else(|| report.get("metric"))
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| {
                self.failure(
                    "trial",
                    format!("report has no numeric '{}' or 'metric': {report}", self.objective_metric),
                )
            })
    }
}

/// Runs training jobs. Satisfied interchangeably by a local process executor
/// and the remote platform executor.
#[async_trait]
pub trait TrialExecutor: Send + Sync {
    /// Train and evaluate one trial, returning its objective metric.
    async fn run_trial(&self, job: &TrainingJob) -> ZazuResult<f64>;

    /// Train to completion and write the checkpoint to `destination`.
    async fn train(&self, job: &TrainingJob, destination: &Path) -> ZazuResult<()>;

    /// Run inference from the checkpoint at `checkpoint`.
    async fn predict(&self, job: &TrainingJob, checkpoint: &Path)
        -> ZazuResult<serde_json::Value>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use zazu_optimizer::SearchSpace;

    fn model() -> SelectedModel {
        let mut training_configs = serde_json::Map::new();
        training_configs.insert("epochs".into(), serde_json::json!(5));
        SelectedModel {
            name: "resnet".into(),
            hp_space: SearchSpace::new(),
            training_configs,
        }
    }

    #[test]
    fn job_carries_run_settings() {
        let configs = RunConfig::new("classification").with_seed(11);
        let job = TrainingJob::new(&model(), &configs, HyperParameters::new())
            .for_trial(Uuid::new_v4(), 4)
            .on_device(Some("1".into()));

        assert_eq!(job.model_name, "resnet");
        assert_eq!(job.training_configs["epochs"], 5);
        assert_eq!(job.seed, Some(11));
        assert_eq!(job.trial_id, Some(4));
        assert_eq!(job.device.as_deref(), Some("1"));

        let json = serde_json::to_string(&job).unwrap();
        let back: TrainingJob = serde_json::from_str(&json).unwrap();
        assert_eq!(job, back);
    }

    #[test]
    fn metric_extraction() {
        let configs = RunConfig::new("classification");
        let job = TrainingJob::new(&model(), &configs, HyperParameters::new()).for_trial(Uuid::new_v4(), 0);

        assert_eq!(job.extract_metric(&serde_json::json!({"val_accuracy": 0.8})).unwrap(), 0.8);
        assert_eq!(job.extract_metric(&serde_json::json!({"metric": 0.7})).unwrap(), 0.7);
        assert!(matches!(
            job.extract_metric(&serde_json::json!({"loss": "nan"})),
            Err(ZazuError::Trial(TrialError::Execution { trial_id: 0, .. }))
        ));
    }

    #[test]
    fn non_trial_failures_name_the_job() {
        let configs = RunConfig::new("classification");
        let job = TrainingJob::new(&model(), &configs, HyperParameters::new());
        let error = job.failure("train", "exit status 2");
        assert!(matches!(error, ZazuError::JobFailed { ref job, .. } if job == "train"));
    }
}
