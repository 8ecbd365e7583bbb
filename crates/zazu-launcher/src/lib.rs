//! # zazu-launcher
//!
//! Executes ZaZu's training work. The [`Launcher`] runs batches of search
//! trials concurrently and the final training and inference jobs, through a
//! [`TrialExecutor`]: a local trainer process per accelerator, or functions of
//! services deployed on the ML [`Platform`].

pub mod devices;
pub mod executor;
pub mod launcher;
pub mod platform;
pub mod process;
pub mod remote;

pub use devices::Accelerators;
pub use executor::{TrainingJob, TrialExecutor};
pub use launcher::{LaunchMode, Launcher};
pub use platform::{
    ensure_session, DatasetHandle, ExecutionRequest, PackageHandle, PackageSpec, Platform,
    ProjectHandle, RestPlatform, ServiceHandle,
};
pub use process::ProcessExecutor;
pub use remote::{RemoteExecutor, TRAINER_SERVICE, TRIAL_SERVICE};
