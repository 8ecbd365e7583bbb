//! The ZaZu pipeline: select a model, search its hyperparameters, train the
//! winner and serve predictions from its checkpoint.
//!
//! Each step persists its result in the working directory, so steps can run
//! in separate invocations: `model.txt` after selection, `best_trial.json`
//! after the search and `checkpoint.pt` after training.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use zazu_catalog::{find_model, ModelsSpec, OptModel, SelectedModel};
use zazu_launcher::{
    Accelerators, LaunchMode, Launcher, Platform, ProcessExecutor, RemoteExecutor, TrialExecutor,
};
use zazu_optimizer::{OngoingTrials, Trial, Tuner};
use zazu_types::{ConfigError, PipelineStep, RunConfig, ZazuResult};

use crate::artifacts::ArtifactPaths;

pub struct ZaZu {
    opt_model: OptModel,
    models: ModelsSpec,
    paths: ArtifactPaths,
    executor: Arc<dyn TrialExecutor>,
    mode: LaunchMode,
}

impl ZaZu {
    pub fn new(
        opt_model: OptModel,
        models: ModelsSpec,
        paths: ArtifactPaths,
        executor: Arc<dyn TrialExecutor>,
        mode: LaunchMode,
    ) -> Self {
        Self {
            opt_model,
            models,
            paths,
            executor,
            mode,
        }
    }

    /// Load `configs.json` and `models.json` from `workdir` and run trials with
    /// the configured trainer on this machine's accelerators.
    pub fn open_local(workdir: impl Into<PathBuf>) -> ZazuResult<Self> {
        let paths = ArtifactPaths::new(workdir);
        let configs = RunConfig::load(paths.configs())?;
        let models = ModelsSpec::load(paths.models_spec())?;
        let executor = ProcessExecutor::new(&configs.trainer.command)?;
        let devices = Accelerators::detect();
        info!(devices = devices.count(), models = models.len(), "opened local run");

        Ok(Self::new(
            OptModel::new(configs),
            models,
            paths,
            Arc::new(executor),
            LaunchMode::Local(devices),
        ))
    }

    /// Like [`ZaZu::open_local`], but every job runs on the platform's
    /// `trial` and `trainer` services, billed to `project_id`.
    pub fn open_remote(
        workdir: impl Into<PathBuf>,
        platform: Arc<dyn Platform>,
        project_id: &str,
    ) -> ZazuResult<Self> {
        let paths = ArtifactPaths::new(workdir);
        let configs = RunConfig::load(paths.configs())?;
        let models = ModelsSpec::load(paths.models_spec())?;
        info!(project = project_id, models = models.len(), "opened remote run");

        Ok(Self::new(
            OptModel::new(configs),
            models,
            paths,
            Arc::new(RemoteExecutor::new(platform, project_id)),
            LaunchMode::Remote,
        ))
    }

    pub fn opt_model(&self) -> &OptModel {
        &self.opt_model
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    fn configs(&self) -> &RunConfig {
        self.opt_model.configs()
    }

    /// Pick the catalog model closest to the run configuration, persist it to
    /// `model.txt` and load it as the current selection.
    pub fn find_best_model(&mut self) -> ZazuResult<String> {
        let name = find_model(&self.opt_model, &self.models)?;
        info!(model = %name, "selected model");
        self.paths.write_model_name(&name)?;
        self.update_optimal_model()?;
        Ok(name)
    }

    /// Load the selection persisted in `model.txt` into the run.
    pub fn update_optimal_model(&mut self) -> ZazuResult<()> {
        let path = self.paths.model();
        if !path.exists() {
            return Err(ConfigError::MissingArtifact {
                path,
                step: PipelineStep::Selection,
            }
            .into());
        }
        let name = self.paths.read_model_name()?;
        self.opt_model.apply_selection(&name, &self.models)?;
        info!(model = %name, "model selection loaded");
        Ok(())
    }

    /// The model selection `step` works on: the one in memory, else the one
    /// persisted by an earlier selection.
    pub fn load_or_require(&mut self, step: PipelineStep) -> ZazuResult<SelectedModel> {
        if !self.opt_model.is_selected() {
            info!(%step, "no model selected yet, reading model.txt");
            let path = self.paths.model();
            if !path.exists() {
                return Err(ConfigError::MissingSelection { step, path }.into());
            }
            self.update_optimal_model()?;
        }
        self.opt_model.selected(step)
    }

    /// Run the hyperparameter search for the selected model and persist the
    /// best trial to `best_trial.json`.
    pub async fn hp_search(&mut self) -> ZazuResult<Trial> {
        if let LaunchMode::Local(devices) = &self.mode {
            devices.check_capacity(self.configs().max_instances_at_once)?;
        }
        let model = self.load_or_require(PipelineStep::Search)?;
        let configs = self.configs().clone();

        let tracker = Arc::new(OngoingTrials::new(configs.direction));
        let mut tuner = Tuner::from_run_config(&configs, model.hp_space.clone(), Arc::clone(&tracker))?;
        let launcher = Launcher::new(
            model.clone(),
            configs.clone(),
            Arc::clone(&self.executor),
            self.mode.clone(),
        )
        .with_tracker(Arc::clone(&tracker));

        info!(
            model = %model.name,
            search = %tracker.search_id(),
            strategy = tuner.strategy_name(),
            max_trials = configs.max_trials,
            parallel = configs.max_instances_at_once,
            "commencing hyperparameter search"
        );
        while !tracker.is_stopped() {
            tuner.search_hp();
            launcher.launch_trials().await?;
            tuner.end_trial();
        }

        let best = tuner.get_best_trial()?;
        let summary = tracker.summary();
        info!(
            trial = best.id,
            metric = ?best.metric,
            done = summary.done,
            failed = summary.failed,
            reason = ?tuner.stop_reason(),
            "search finished"
        );
        self.paths.write_json(&self.paths.best_trial(), &best)?;
        info!(path = %self.paths.best_trial().display(), "best trial saved");
        Ok(best)
    }

    /// Train the selected model with the persisted best trial and save the
    /// checkpoint to `checkpoint.pt`.
    pub async fn train_new_model(&mut self) -> ZazuResult<PathBuf> {
        let model = self.load_or_require(PipelineStep::Train)?;
        let best_trial_path = self.paths.best_trial();
        if !best_trial_path.exists() {
            return Err(ConfigError::MissingArtifact {
                path: best_trial_path,
                step: PipelineStep::Search,
            }
            .into());
        }
        let best: Trial = self.paths.read_json(&best_trial_path)?;

        let checkpoint = self.paths.checkpoint();
        self.launcher(model)
            .train_and_save_best_trial(&best, &checkpoint)
            .await?;
        Ok(checkpoint)
    }

    /// Run inference with the saved checkpoint.
    pub async fn run_inference(&mut self) -> ZazuResult<serde_json::Value> {
        let model = self.load_or_require(PipelineStep::Predict)?;
        let checkpoint = self.paths.checkpoint();
        let predictions = self.launcher(model).predict(&checkpoint).await?;
        info!("inference finished");
        Ok(predictions)
    }

    fn launcher(&self, model: SelectedModel) -> Launcher {
        Launcher::new(
            model,
            self.configs().clone(),
            Arc::clone(&self.executor),
            self.mode.clone(),
        )
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.paths.checkpoint()
    }

    pub fn workdir(&self) -> &Path {
        self.paths.root()
    }
}
