//! Trial records and search lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::search::HyperParameters;

/// Unique search run identifier.
pub type SearchId = Uuid;

/// Trial identifier, sequential in proposal order within one search.
pub type TrialId = usize;

/// Status of the search as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchStatus {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrialStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl TrialStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrialStatus::Done | TrialStatus::Failed)
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrialStatus::Pending => "PENDING",
            TrialStatus::Running => "RUNNING",
            TrialStatus::Done => "DONE",
            TrialStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A single trial (one hyperparameter assignment evaluated by a training run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: TrialId,
    pub search_id: SearchId,
    pub parameters: HyperParameters,
    pub status: TrialStatus,
    /// Objective value, present iff the trial is `Done`.
    pub metric: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(search_id: SearchId, id: TrialId, parameters: HyperParameters) -> Self {
        Self {
            id,
            search_id,
            parameters,
            status: TrialStatus::Pending,
            metric: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            worker_id: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self, worker_id: Option<String>) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
        self.worker_id = worker_id;
    }

    pub fn mark_done(&mut self, metric: f64) {
        self.status = TrialStatus::Done;
        self.finished_at = Some(Utc::now());
        self.metric = Some(metric);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Wall-clock duration of the run, once finished.
    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}

/// Aggregate counts over a search's trials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

impl TrialSummary {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.done + self.failed
    }

    /// Trials that have been proposed but have not reached a terminal state.
    pub fn in_flight(&self) -> usize {
        self.pending + self.running
    }
}
