//! # zazu-engine
//!
//! Drives a ZaZu run end to end: model selection, hyperparameter search,
//! final training and inference, plus the platform deployment flows used by
//! the `zazu` command-line tool.

pub mod artifacts;
pub mod deploy;
pub mod logging;
pub mod pipeline;

pub use artifacts::ArtifactPaths;
pub use deploy::{deploy, execute_remote, update, PACKAGE_NAME, SERVICES, ZAZU_SERVICE};
pub use logging::init_logging;
pub use pipeline::ZaZu;
