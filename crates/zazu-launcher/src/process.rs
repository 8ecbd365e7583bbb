//! Local execution: each job runs the configured trainer program as a child
//! process pinned to one accelerator.
//!
//! Protocol: `<command...> <mode>` with the job as JSON on stdin, where mode is
//! `trial`, `train` or `predict`. The last non-empty stdout line must be a
//! JSON object; for `trial` it carries the metric, for `train` the checkpoint
//! is written to the job's `checkpoint_path`.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use zazu_types::{config_error, ZazuResult};

use crate::executor::{TrainingJob, TrialExecutor};

/// Environment variable the trainer reads its device assignment from.
const DEVICE_ENV: &str = "CUDA_VISIBLE_DEVICES";

#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: String,
    args: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(command: &[String]) -> ZazuResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| config_error!("trainer command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    async fn invoke(&self, mode: &str, job: &TrainingJob) -> ZazuResult<serde_json::Value> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(mode)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(device) = &job.device {
            command.env(DEVICE_ENV, device);
        }

        let mut child = command
            .spawn()
            .map_err(|e| job.failure(mode, format!("cannot start '{}': {e}", self.program)))?;

        // Feed stdin while stdout and stderr drain, so a chatty trainer cannot
        // block on a full pipe before reading its job.
        let payload = serde_json::to_vec(job)?;
        let feeder = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move { stdin.write_all(&payload).await })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| job.failure(mode, format!("trainer did not finish: {e}")))?;

        if let Some(feeder) = feeder {
            match feeder.await {
                // A trainer that takes its job from elsewhere may close stdin early.
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(job.failure(mode, format!("cannot send job to trainer: {e}")));
                }
                Err(e) => {
                    return Err(job.failure(mode, format!("job writer aborted: {e}")));
                }
                _ => {}
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(job.failure(
                mode,
                format!("trainer exited with {}: {}", output.status, tail(&stderr)),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("{}");
        debug!(job = %job.job_id, mode, report, "trainer finished");

        serde_json::from_str(report)
            .map_err(|e| job.failure(mode, format!("unreadable trainer report '{report}': {e}")))
    }
}

/// Last few lines of a process's stderr, for error messages.
fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("\n")
}

#[async_trait]
impl TrialExecutor for ProcessExecutor {
    async fn run_trial(&self, job: &TrainingJob) -> ZazuResult<f64> {
        let report = self.invoke("trial", job).await?;
        job.extract_metric(&report)
    }

    async fn train(&self, job: &TrainingJob, destination: &Path) -> ZazuResult<()> {
        let job = job.clone().with_checkpoint(destination);
        self.invoke("train", &job).await?;
        if !destination.exists() {
            return Err(job.failure(
                "train",
                format!("trainer reported success but wrote no checkpoint at {}", destination.display()),
            ));
        }
        Ok(())
    }

    async fn predict(
        &self,
        job: &TrainingJob,
        checkpoint: &Path,
    ) -> ZazuResult<serde_json::Value> {
        let job = job.clone().with_checkpoint(checkpoint);
        self.invoke("predict", &job).await
    }

    fn name(&self) -> &str {
        "local"
    }
}
