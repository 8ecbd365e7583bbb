//! Runs a batch of trials concurrently, then the final training and
//! inference jobs for the chosen model.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use zazu_catalog::SelectedModel;
use zazu_optimizer::{OngoingTrials, Trial, TrialId};
use zazu_types::{internal_error, RunConfig, ZazuError, ZazuResult};

use crate::devices::Accelerators;
use crate::executor::{TrainingJob, TrialExecutor};

/// Where trials run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// On this machine, one trial per accelerator.
    Local(Accelerators),
    /// As platform service executions; capacity is the platform's concern.
    Remote,
}

pub struct Launcher {
    model: SelectedModel,
    configs: RunConfig,
    executor: Arc<dyn TrialExecutor>,
    mode: LaunchMode,
    tracker: Option<Arc<OngoingTrials>>,
}

impl Launcher {
    pub fn new(
        model: SelectedModel,
        configs: RunConfig,
        executor: Arc<dyn TrialExecutor>,
        mode: LaunchMode,
    ) -> Self {
        Self {
            model,
            configs,
            executor,
            mode,
            tracker: None,
        }
    }

    /// Attach the search whose PENDING trials [`Launcher::launch_trials`] runs.
    pub fn with_tracker(mut self, tracker: Arc<OngoingTrials>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn mode(&self) -> &LaunchMode {
        &self.mode
    }

    /// Local runs need one device per concurrent trial.
    pub fn check_capacity(&self) -> ZazuResult<()> {
        match &self.mode {
            LaunchMode::Local(devices) => {
                devices.check_capacity(self.configs.max_instances_at_once)
            }
            LaunchMode::Remote => Ok(()),
        }
    }

    fn default_device(&self) -> Option<String> {
        match &self.mode {
            LaunchMode::Local(devices) => devices.ids().first().cloned(),
            LaunchMode::Remote => None,
        }
    }

    /// Run up to `max_instances_at_once` PENDING trials concurrently and wait
    /// for all of them to finish. Returns how many trials were launched.
    ///
    /// A trial that fails (including a worker that panics) is recorded as
    /// FAILED and does not affect the others. Nothing is claimed when the
    /// capacity check fails.
    pub async fn launch_trials(&self) -> ZazuResult<usize> {
        let tracker = self
            .tracker
            .clone()
            .ok_or_else(|| internal_error!("launch_trials called without an ongoing search"))?;
        self.check_capacity()?;

        let batch = tracker.claim_pending(self.configs.max_instances_at_once);
        if batch.is_empty() {
            debug!("no pending trials to launch");
            return Ok(0);
        }

        let mut handles: Vec<(TrialId, JoinHandle<()>)> = Vec::with_capacity(batch.len());
        for (slot, trial) in batch.into_iter().enumerate() {
            let (worker_id, device) = match &self.mode {
                LaunchMode::Local(devices) => {
                    let device = devices.ids()[slot].clone();
                    (format!("device-{device}"), Some(device))
                }
                LaunchMode::Remote => (format!("remote-{}", trial.id), None),
            };
            tracker.assign_worker(trial.id, &worker_id)?;

            let job = TrainingJob::new(&self.model, &self.configs, trial.parameters.clone())
                .for_trial(tracker.search_id(), trial.id)
                .on_device(device);
            info!(
                trial = trial.id,
                worker = %worker_id,
                executor = self.executor.name(),
                "launching trial"
            );

            let executor = Arc::clone(&self.executor);
            let tracker = Arc::clone(&tracker);
            let trial_id = trial.id;
            handles.push((
                trial_id,
                tokio::spawn(async move {
                    let outcome = executor.run_trial(&job).await;
                    record_outcome(&tracker, trial_id, outcome);
                }),
            ));
        }

        let launched = handles.len();
        for (trial_id, handle) in handles {
            if let Err(e) = handle.await {
                warn!(trial = trial_id, error = %e, "trial worker aborted");
                // The worker may have recorded an outcome before it died.
                let _ = tracker.record_failure(trial_id, format!("worker aborted: {e}"));
            }
        }
        debug!(launched, "trial batch finished");
        Ok(launched)
    }

    /// Train the model with `trial`'s hyperparameters and store the
    /// checkpoint at `path`.
    ///
    /// The checkpoint is written to a sibling `.partial` file first and moved
    /// into place only on success, so `path` never holds a truncated file.
    pub async fn train_and_save_best_trial(&self, trial: &Trial, path: &Path) -> ZazuResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(path);
        let job = TrainingJob::new(&self.model, &self.configs, trial.parameters.clone())
            .on_device(self.default_device());

        info!(
            model = %self.model.name,
            trial = trial.id,
            executor = self.executor.name(),
            "training final model"
        );
        if let Err(e) = self.executor.train(&job, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        if path.exists() {
            warn!(path = %path.display(), "overwriting existing checkpoint");
        }
        tokio::fs::rename(&partial, path).await?;
        info!(path = %path.display(), "checkpoint saved");
        Ok(())
    }

    /// Run inference with the checkpoint at `checkpoint`.
    pub async fn predict(&self, checkpoint: &Path) -> ZazuResult<serde_json::Value> {
        if !checkpoint.is_file() {
            return Err(ZazuError::MissingCheckpoint {
                path: checkpoint.to_path_buf(),
            });
        }
        let job = TrainingJob::new(&self.model, &self.configs, Default::default())
            .on_device(self.default_device());
        info!(model = %self.model.name, checkpoint = %checkpoint.display(), "running inference");
        self.executor.predict(&job, checkpoint).await
    }
}

fn record_outcome(tracker: &OngoingTrials, trial_id: TrialId, outcome: ZazuResult<f64>) {
    let recorded = match outcome {
        Ok(metric) => {
            info!(trial = trial_id, metric, "trial finished");
            tracker.record_result(trial_id, metric)
        }
        Err(e) => {
            if e.is_fatal() {
                // Not the trainer's doing; the search still carries on.
                error!(trial = trial_id, error = %e, "trial could not be run");
            } else {
                warn!(trial = trial_id, error = %e, "trial failed");
            }
            tracker.record_failure(trial_id, e.to_string())
        }
    };
    if let Err(e) = recorded {
        warn!(trial = trial_id, error = %e, "trial outcome not recorded");
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("checkpoint"));
    name.push(".partial");
    path.with_file_name(name)
}
