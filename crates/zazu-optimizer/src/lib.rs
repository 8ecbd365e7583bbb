//! # zazu-optimizer
//!
//! Hyperparameter search for ZaZu.
//!
//! Provides search space definitions, sweep strategies (grid, random,
//! Bayesian), the shared trial tracker, and the tuner that drives the
//! propose → launch → evaluate loop.

mod search;
mod tracker;
mod trial;
mod tuner;

pub use search::{
    build_strategy, BayesianSearch, GridSearch, HyperParameters, ParameterDef, ParameterKind,
    ParameterValue, RandomSearch, SearchSpace, SearchStrategy,
};
pub use tracker::OngoingTrials;
pub use trial::{SearchId, SearchStatus, Trial, TrialId, TrialStatus, TrialSummary};
pub use tuner::{StopReason, Tuner, TunerConfig, TunerState};
pub use zazu_types::ObjectiveDirection;
