use std::path::PathBuf;

use thiserror::Error;

use crate::steps::PipelineStep;

/// Main error type for the ZaZu system
#[derive(Error, Debug)]
pub enum ZazuError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No catalog model matches task '{task}': {reason}")]
    NoMatch { task: String, reason: String },

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("No completed trials to choose from ({failed} of {total} trials failed)")]
    NoCompletedTrials { total: usize, failed: usize },

    #[error("Checkpoint not found at {}; run the train step first", .path.display())]
    MissingCheckpoint { path: PathBuf },

    #[error("{job} job failed: {message}")]
    JobFailed { job: String, message: String },

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors. All of these are fatal and raised before any work starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{} not found; run the {step} step to produce it", .path.display())]
    MissingArtifact { path: PathBuf, step: PipelineStep },

    #[error("spec file {} not found", .path.display())]
    MissingSpec { path: PathBuf },

    #[error("invalid spec file {}: {message}", .path.display())]
    InvalidSpec { path: PathBuf, message: String },

    #[error("no model selected for the {step} step: {} not found; run the {} step first", .path.display(), PipelineStep::Selection)]
    MissingSelection { step: PipelineStep, path: PathBuf },

    #[error("model '{name}' is not in the catalog")]
    UnknownModel { name: String },

    #[error("'max_instances_at_once' ({requested}) must be smaller or equal to the number of available devices ({available})")]
    ResourceCap { requested: usize, available: usize },

    #[error("invalid search space for '{parameter}': {message}")]
    InvalidSearchSpace { parameter: String, message: String },

    #[error("{0}")]
    Invalid(String),
}

/// Trial-level errors. Execution failures are isolated to their trial.
#[derive(Error, Debug)]
pub enum TrialError {
    #[error("trial {trial_id} failed: {message}")]
    Execution { trial_id: usize, message: String },

    #[error("trial {trial_id} is not tracked")]
    Unknown { trial_id: usize },

    #[error("trial {trial_id} already finished with status {status}")]
    Conflict { trial_id: usize, status: String },

    #[error("trial {trial_id} reported a non-finite metric: {value}")]
    InvalidMetric { trial_id: usize, value: f64 },
}

/// Result type alias for ZaZu operations
pub type ZazuResult<T> = Result<T, ZazuError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::ZazuError::Config($crate::ConfigError::Invalid(format!($($arg)*)))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::ZazuError::Internal(format!($($arg)*))
    };
}

/// Macro for creating platform errors
#[macro_export]
macro_rules! platform_error {
    ($($arg:tt)*) => {
        $crate::ZazuError::Platform(format!($($arg)*))
    };
}

impl ZazuError {
    /// Whether this error should abort the current top-level command.
    ///
    /// Only trial execution failures are recoverable: they are recorded on the
    /// trial and the search carries on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ZazuError::Trial(TrialError::Execution { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_selection_names_step() {
        let error: ZazuError = ConfigError::MissingSelection {
            step: PipelineStep::Train,
            path: PathBuf::from("model.txt"),
        }
        .into();

        let message = error.to_string();
        assert!(message.contains("model.txt"));
        assert!(message.contains("train"));
        assert!(message.contains("selection"));
    }

    #[test]
    fn test_resource_cap_display() {
        let error = ConfigError::ResourceCap {
            requested: 4,
            available: 2,
        };
        assert!(error.to_string().contains("max_instances_at_once"));
        assert!(error.to_string().contains('4'));
    }

    #[test]
    fn test_error_conversion() {
        let trial_error = TrialError::Unknown { trial_id: 3 };
        let error: ZazuError = trial_error.into();

        match error {
            ZazuError::Trial(TrialError::Unknown { trial_id: 3 }) => (),
            _ => panic!("Expected Trial error"),
        }
    }

    #[test]
    fn test_only_execution_errors_are_isolated() {
        let execution: ZazuError = TrialError::Execution {
            trial_id: 0,
            message: "cuda oom".into(),
        }
        .into();
        assert!(!execution.is_fatal());
        assert!(ZazuError::NoCompletedTrials { total: 3, failed: 3 }.is_fatal());
        assert!(ZazuError::MissingCheckpoint {
            path: PathBuf::from("checkpoint.pt")
        }
        .is_fatal());
    }

    #[test]
    fn test_macros() {
        let config_err = config_error!("Missing required field: {}", "task");
        assert!(matches!(config_err, ZazuError::Config(ConfigError::Invalid(_))));
        let _internal_err = internal_error!("Something went wrong");
        let _platform_err = platform_error!("service {} unavailable", "trial");
    }
}
