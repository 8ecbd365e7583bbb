//! Shared record of a search's trials.
//!
//! [`OngoingTrials`] is the single source of truth for search progress. The
//! tuner proposes trials and decides when to stop; launcher workers claim
//! trials and write their outcomes back concurrently. Every access goes
//! through one mutex, so a trial's transitions are serialized.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use zazu_types::{ObjectiveDirection, TrialError, ZazuError, ZazuResult};

use crate::search::HyperParameters;
use crate::trial::{SearchId, SearchStatus, Trial, TrialId, TrialStatus, TrialSummary};

#[derive(Debug)]
struct TrackerState {
    status: SearchStatus,
    trials: BTreeMap<TrialId, Trial>,
    best: Option<TrialId>,
    next_id: TrialId,
}

#[derive(Debug)]
pub struct OngoingTrials {
    search_id: SearchId,
    direction: ObjectiveDirection,
    state: Mutex<TrackerState>,
}

impl OngoingTrials {
    /// Start tracking a new search. The comparison direction is fixed for the
    /// lifetime of the tracker.
    pub fn new(direction: ObjectiveDirection) -> Self {
        Self {
            search_id: Uuid::new_v4(),
            direction,
            state: Mutex::new(TrackerState {
                status: SearchStatus::Running,
                trials: BTreeMap::new(),
                best: None,
                next_id: 0,
            }),
        }
    }

    pub fn search_id(&self) -> SearchId {
        self.search_id
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    /// Add a PENDING trial and return its id.
    pub fn enqueue(&self, parameters: HyperParameters) -> TrialId {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state
            .trials
            .insert(id, Trial::new(self.search_id, id, parameters));
        debug!(trial = id, "trial enqueued");
        id
    }

    /// Move up to `limit` PENDING trials to RUNNING, oldest first, and return
    /// snapshots of them.
    pub fn claim_pending(&self, limit: usize) -> Vec<Trial> {
        let mut state = self.state.lock();
        state
            .trials
            .values_mut()
            .filter(|t| t.status == TrialStatus::Pending)
            .take(limit)
            .map(|trial| {
                trial.mark_running(None);
                trial.clone()
            })
            .collect()
    }

    /// Record which worker a running trial was placed on.
    pub fn assign_worker(&self, trial_id: TrialId, worker_id: &str) -> ZazuResult<()> {
        let mut state = self.state.lock();
        let trial = state
            .trials
            .get_mut(&trial_id)
            .ok_or(TrialError::Unknown { trial_id })?;
        trial.worker_id = Some(worker_id.to_string());
        Ok(())
    }

    /// Transition a trial to DONE and update the best trial if it improves.
    ///
    /// A trial's metric is written at most once: recording into a trial that
    /// already finished is rejected and leaves the tracker untouched. A
    /// non-finite metric fails the trial instead.
    pub fn record_result(&self, trial_id: TrialId, metric: f64) -> ZazuResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let trial = state
            .trials
            .get_mut(&trial_id)
            .ok_or(TrialError::Unknown { trial_id })?;

        if trial.status.is_terminal() {
            warn!(
                trial = trial_id,
                status = %trial.status,
                metric,
                "conflicting result for finished trial rejected"
            );
            return Err(TrialError::Conflict {
                trial_id,
                status: trial.status.to_string(),
            }
            .into());
        }

        if !metric.is_finite() {
            trial.mark_failed(format!("non-finite metric {metric}"));
            warn!(trial = trial_id, metric, "trial reported a non-finite metric");
            return Err(TrialError::InvalidMetric {
                trial_id,
                value: metric,
            }
            .into());
        }

        trial.mark_done(metric);
        debug!(trial = trial_id, metric, seconds = ?trial.duration_seconds(), "trial done");

        let improves = match state.best.and_then(|id| state.trials.get(&id)) {
            None => true,
            Some(best) => {
                let best_metric = best.metric.unwrap_or(f64::NAN);
                self.direction.improves(metric, best_metric)
                    || (metric == best_metric && trial_id < best.id)
            }
        };
        if improves {
            state.best = Some(trial_id);
            debug!(trial = trial_id, metric, "new best trial");
        }
        Ok(())
    }

    /// Transition a trial to FAILED. Failed trials never become the best trial.
    pub fn record_failure(&self, trial_id: TrialId, error: impl Into<String>) -> ZazuResult<()> {
        let mut state = self.state.lock();
        let trial = state
            .trials
            .get_mut(&trial_id)
            .ok_or(TrialError::Unknown { trial_id })?;

        if trial.status.is_terminal() {
            warn!(trial = trial_id, status = %trial.status, "failure for finished trial ignored");
            return Err(TrialError::Conflict {
                trial_id,
                status: trial.status.to_string(),
            }
            .into());
        }
        trial.mark_failed(error.into());
        debug!(trial = trial_id, seconds = ?trial.duration_seconds(), "trial failed");
        Ok(())
    }

    pub fn mark_stopped(&self) {
        let mut state = self.state.lock();
        if state.status != SearchStatus::Stopped {
            state.status = SearchStatus::Stopped;
            debug!(search = %self.search_id, "search marked stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().status == SearchStatus::Stopped
    }

    pub fn status(&self) -> SearchStatus {
        self.state.lock().status
    }

    /// The best completed trial so far.
    pub fn best_trial(&self) -> ZazuResult<Trial> {
        let state = self.state.lock();
        state
            .best
            .and_then(|id| state.trials.get(&id))
            .cloned()
            .ok_or_else(|| {
                let failed = state
                    .trials
                    .values()
                    .filter(|t| t.status == TrialStatus::Failed)
                    .count();
                ZazuError::NoCompletedTrials {
                    total: state.trials.len(),
                    failed,
                }
            })
    }

    pub fn trial(&self, trial_id: TrialId) -> Option<Trial> {
        self.state.lock().trials.get(&trial_id).cloned()
    }

    /// Snapshot of every trial, in id order.
    pub fn trials(&self) -> Vec<Trial> {
        self.state.lock().trials.values().cloned().collect()
    }

    /// Snapshot of the trials that reached DONE or FAILED, in id order.
    pub fn finished_trials(&self) -> Vec<Trial> {
        self.state
            .lock()
            .trials
            .values()
            .filter(|t| t.status.is_terminal())
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> TrialSummary {
        let state = self.state.lock();
        let mut summary = TrialSummary::default();
        for trial in state.trials.values() {
            match trial.status {
                TrialStatus::Pending => summary.pending += 1,
                TrialStatus::Running => summary.running += 1,
                TrialStatus::Done => summary.done += 1,
                TrialStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}
