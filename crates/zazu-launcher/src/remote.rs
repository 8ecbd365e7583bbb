//! Remote execution: jobs run as functions of the deployed `trial` and
//! `trainer` services on the platform.
//!
//! Checkpoints cross the boundary as project artifacts: `train` downloads the
//! artifact the trainer reports, and `predict` uploads the local checkpoint
//! so the service never sees a path on this machine.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use zazu_types::ZazuResult;

use crate::executor::{TrainingJob, TrialExecutor};
use crate::platform::{ExecutionRequest, Platform};

pub const TRIAL_SERVICE: &str = "trial";
pub const TRAINER_SERVICE: &str = "trainer";

/// [`TrialExecutor`] that forwards every job to the platform.
pub struct RemoteExecutor {
    platform: Arc<dyn Platform>,
    project_id: String,
    trial_service: String,
    trainer_service: String,
}

impl RemoteExecutor {
    pub fn new(platform: Arc<dyn Platform>, project_id: impl Into<String>) -> Self {
        Self {
            platform,
            project_id: project_id.into(),
            trial_service: TRIAL_SERVICE.to_string(),
            trainer_service: TRAINER_SERVICE.to_string(),
        }
    }

    async fn call(
        &self,
        service: &str,
        function: &str,
        job: &TrainingJob,
    ) -> ZazuResult<serde_json::Value> {
        let request = ExecutionRequest {
            service: service.to_string(),
            function: function.to_string(),
            payload: serde_json::to_value(job)?,
            project_id: self.project_id.clone(),
        };
        debug!(job = %job.job_id, service, function, "remote execution");
        self.platform
            .execute(&request)
            .await
            .map_err(|e| job.failure(function, e.to_string()))
    }
}

#[async_trait]
impl TrialExecutor for RemoteExecutor {
    async fn run_trial(&self, job: &TrainingJob) -> ZazuResult<f64> {
        let report = self.call(&self.trial_service, "run", job).await?;
        job.extract_metric(&report)
    }

    async fn train(&self, job: &TrainingJob, destination: &Path) -> ZazuResult<()> {
        let report = self.call(&self.trainer_service, "train", job).await?;
        let remote_path = report
            .get("checkpoint")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| job.failure("train", format!("no checkpoint path in report: {report}")))?;

        let bytes = self
            .platform
            .download_artifact(&self.project_id, remote_path)
            .await?;
        tokio::fs::write(destination, &bytes).await?;
        info!(
            remote = remote_path,
            local = %destination.display(),
            bytes = bytes.len(),
            "checkpoint downloaded"
        );
        Ok(())
    }

    async fn predict(
        &self,
        job: &TrainingJob,
        checkpoint: &Path,
    ) -> ZazuResult<serde_json::Value> {
        let bytes = tokio::fs::read(checkpoint).await?;
        let file_name = checkpoint
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoint".to_string());
        let target = format!("checkpoints/{}/{}", job.model_name, file_name);
        let reference = self
            .platform
            .upload_artifact(&self.project_id, &target, bytes)
            .await?;
        info!(local = %checkpoint.display(), remote = %reference, "checkpoint uploaded");

        let job = job.clone().with_checkpoint_artifact(reference);
        self.call(&self.trainer_service, "predict", &job).await
    }

    fn name(&self) -> &str {
        "remote"
    }
}
