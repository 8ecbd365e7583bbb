//! Search-strategy state machine: proposes batches, folds results back into
//! the strategy, and decides when the search is over.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use zazu_types::{RunConfig, ZazuResult};

use crate::search::{build_strategy, SearchSpace, SearchStrategy};
use crate::tracker::OngoingTrials;
use crate::trial::{Trial, TrialId, TrialStatus};

/// Lifecycle of a [`Tuner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunerState {
    Initialized,
    Searching,
    Stopped,
}

/// Why the tuner ended the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    BudgetExhausted,
    SpaceExhausted,
    NoImprovement,
}

/// Limits that bound a search.
#[derive(Debug, Clone, PartialEq)]
pub struct TunerConfig {
    /// Largest batch proposed at once.
    pub max_instances_at_once: usize,
    /// Total trial budget.
    pub max_trials: usize,
    /// Consecutive batches without improvement before stopping.
    pub patience: Option<usize>,
}

impl TunerConfig {
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            max_instances_at_once: config.max_instances_at_once,
            max_trials: config.max_trials,
            patience: config.patience,
        }
    }
}

pub struct Tuner {
    config: TunerConfig,
    strategy: Box<dyn SearchStrategy>,
    tracker: Arc<OngoingTrials>,
    state: TunerState,
    proposed: usize,
    reported: HashSet<TrialId>,
    best_score: Option<f64>,
    stale_batches: usize,
    stop_reason: Option<StopReason>,
}

impl Tuner {
    pub fn new(
        config: TunerConfig,
        strategy: Box<dyn SearchStrategy>,
        tracker: Arc<OngoingTrials>,
    ) -> Self {
        Self {
            config,
            strategy,
            tracker,
            state: TunerState::Initialized,
            proposed: 0,
            reported: HashSet::new(),
            best_score: None,
            stale_batches: 0,
            stop_reason: None,
        }
    }

    /// Build a tuner with the strategy named by the run configuration.
    pub fn from_run_config(
        config: &RunConfig,
        space: SearchSpace,
        tracker: Arc<OngoingTrials>,
    ) -> ZazuResult<Self> {
        space.validate()?;
        let strategy = build_strategy(
            config.search_method,
            space,
            config.grid_steps,
            config.exploration_weight,
            config.seed,
        );
        Ok(Self::new(
            TunerConfig::from_run_config(config),
            strategy,
            tracker,
        ))
    }

    pub fn state(&self) -> TunerState {
        self.state
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Propose the next batch and enqueue it as PENDING trials.
    ///
    /// Does nothing once the search is stopped. Stops the search when the
    /// budget is spent or the strategy has nothing left to offer.
    pub fn search_hp(&mut self) -> Vec<TrialId> {
        if self.state == TunerState::Stopped || self.tracker.is_stopped() {
            self.state = TunerState::Stopped;
            return Vec::new();
        }

        let remaining = self.config.max_trials.saturating_sub(self.proposed);
        if remaining == 0 {
            self.stop(StopReason::BudgetExhausted);
            return Vec::new();
        }

        let count = self.config.max_instances_at_once.min(remaining);
        let batch = self.strategy.suggest(count);
        if batch.is_empty() {
            self.stop(StopReason::SpaceExhausted);
            return Vec::new();
        }

        let ids: Vec<TrialId> = batch
            .into_iter()
            .map(|params| self.tracker.enqueue(params))
            .collect();
        self.proposed += ids.len();
        self.state = TunerState::Searching;

        debug!(
            strategy = self.strategy.name(),
            batch = ids.len(),
            proposed = self.proposed,
            "proposed trials"
        );
        ids
    }

    /// Fold newly finished trials into the strategy and evaluate the stopping
    /// criteria.
    pub fn end_trial(&mut self) {
        let direction = self.tracker.direction();
        let fresh: Vec<Trial> = self
            .tracker
            .finished_trials()
            .into_iter()
            .filter(|t| !self.reported.contains(&t.id))
            .collect();

        let mut improved = false;
        for trial in &fresh {
            self.reported.insert(trial.id);
            if let (TrialStatus::Done, Some(metric)) = (trial.status, trial.metric) {
                let score = direction.score(metric);
                self.strategy.report(&trial.parameters, score);
                if self.best_score.map_or(true, |best| score > best) {
                    self.best_score = Some(score);
                    improved = true;
                }
            }
        }

        if !fresh.is_empty() {
            if improved {
                self.stale_batches = 0;
            } else {
                self.stale_batches += 1;
            }
        }

        let summary = self.tracker.summary();
        info!(
            done = summary.done,
            failed = summary.failed,
            in_flight = summary.in_flight(),
            best = ?self.best_score.map(|s| direction.score(s)),
            "batch finished"
        );

        if summary.in_flight() > 0 {
            return;
        }
        if self.proposed >= self.config.max_trials {
            self.stop(StopReason::BudgetExhausted);
        } else if self.strategy.is_exhausted() {
            self.stop(StopReason::SpaceExhausted);
        } else if matches!(self.config.patience, Some(p) if self.stale_batches >= p) {
            self.stop(StopReason::NoImprovement);
        }
    }

    /// The best completed trial, as recorded by the tracker.
    pub fn get_best_trial(&self) -> ZazuResult<Trial> {
        self.tracker.best_trial()
    }

    fn stop(&mut self, reason: StopReason) {
        if self.state == TunerState::Stopped {
            return;
        }
        self.state = TunerState::Stopped;
        self.stop_reason = Some(reason);
        self.tracker.mark_stopped();
        info!(reason = ?reason, trials = self.proposed, "search stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{GridSearch, HyperParameters, ParameterValue, RandomSearch};
    use zazu_types::ObjectiveDirection;

    fn lr_space() -> SearchSpace {
        SearchSpace::new().add_choice(
            "lr",
            vec![
                serde_json::json!(0.001),
                serde_json::json!(0.01),
                serde_json::json!(0.1),
            ],
        )
    }

    fn config(max_instances: usize, max_trials: usize, patience: Option<usize>) -> TunerConfig {
        TunerConfig {
            max_instances_at_once: max_instances,
            max_trials,
            patience,
        }
    }

    fn lr_of(params: &HyperParameters) -> f64 {
        params["lr"].as_f64().unwrap()
    }

    /// Run every pending trial with `objective` as the metric function.
    fn execute(tracker: &OngoingTrials, objective: impl Fn(f64) -> f64) {
        for trial in tracker.claim_pending(usize::MAX) {
            tracker
                .record_result(trial.id, objective(lr_of(&trial.parameters)))
                .unwrap();
        }
    }

    #[test]
    fn batch_size_is_capped() {
        let tracker = Arc::new(OngoingTrials::new(ObjectiveDirection::Maximize));
        let strategy = Box::new(RandomSearch::with_seed(lr_space(), Some(1)));
        let mut tuner = Tuner::new(config(2, 10, None), strategy, tracker.clone());

        assert_eq!(tuner.state(), TunerState::Initialized);
        assert_eq!(tuner.search_hp().len(), 2);
        assert_eq!(tuner.state(), TunerState::Searching);
        assert_eq!(tracker.summary().pending, 2);
    }

    #[test]
    fn grid_search_stops_when_space_is_exhausted() {
        let tracker = Arc::new(OngoingTrials::new(ObjectiveDirection::Maximize));
        let strategy = Box::new(GridSearch::new(lr_space(), 5));
        let mut tuner = Tuner::new(config(1, 20, None), strategy, tracker.clone());

        while !tracker.is_stopped() {
            tuner.search_hp();
            execute(&tracker, |lr| 1.0 - (lr - 0.01).abs());
            tuner.end_trial();
        }

        assert_eq!(tracker.trials().len(), 3);
        assert_eq!(tuner.stop_reason(), Some(StopReason::SpaceExhausted));
        let best = tuner.get_best_trial().unwrap();
        assert_eq!(best.parameters["lr"], ParameterValue::Float(0.01));
    }

    #[test]
    fn budget_bounds_total_trials() {
        let tracker = Arc::new(OngoingTrials::new(ObjectiveDirection::Minimize));
        let space = SearchSpace::new().add_float("lr", 0.0, 1.0);
        let strategy = Box::new(RandomSearch::with_seed(space, Some(3)));
        let mut tuner = Tuner::new(config(3, 7, None), strategy, tracker.clone());

        while !tracker.is_stopped() {
            tuner.search_hp();
            execute(&tracker, |lr| lr);
            tuner.end_trial();
        }

        assert_eq!(tracker.trials().len(), 7);
        assert_eq!(tuner.stop_reason(), Some(StopReason::BudgetExhausted));
    }

    #[test]
    fn patience_stops_a_stalled_search() {
        let tracker = Arc::new(OngoingTrials::new(ObjectiveDirection::Maximize));
        let space = SearchSpace::new().add_float("lr", 0.0, 1.0);
        let strategy = Box::new(RandomSearch::with_seed(space, Some(5)));
        let mut tuner = Tuner::new(config(1, 100, Some(2)), strategy, tracker.clone());

        while !tracker.is_stopped() {
            tuner.search_hp();
            execute(&tracker, |_| 0.5);
            tuner.end_trial();
        }

        // First batch improves, the next two are stale.
        assert_eq!(tracker.trials().len(), 3);
        assert_eq!(tuner.stop_reason(), Some(StopReason::NoImprovement));
    }

    #[test]
    fn search_after_stop_is_a_no_op() {
        let tracker = Arc::new(OngoingTrials::new(ObjectiveDirection::Maximize));
        let strategy = Box::new(GridSearch::new(lr_space(), 5));
        let mut tuner = Tuner::new(config(1, 20, None), strategy, tracker.clone());

        tracker.mark_stopped();
        assert!(tuner.search_hp().is_empty());
        assert_eq!(tuner.state(), TunerState::Stopped);
        assert!(tracker.trials().is_empty());
    }

    #[test]
    fn failed_trials_do_not_count_as_improvement() {
        let tracker = Arc::new(OngoingTrials::new(ObjectiveDirection::Maximize));
        let strategy = Box::new(GridSearch::new(lr_space(), 5));
        let mut tuner = Tuner::new(config(3, 3, None), strategy, tracker.clone());

        tuner.search_hp();
        let claimed = tracker.claim_pending(3);
        tracker.record_failure(claimed[0].id, "boom").unwrap();
        tracker.record_result(claimed[1].id, 0.2).unwrap();
        tracker.record_result(claimed[2].id, 0.4).unwrap();
        tuner.end_trial();

        assert!(tracker.is_stopped());
        assert_eq!(tuner.get_best_trial().unwrap().id, claimed[2].id);
    }

    #[test]
    fn from_run_config_rejects_invalid_space() {
        let tracker = Arc::new(OngoingTrials::new(ObjectiveDirection::Maximize));
        let run = RunConfig::new("classification");
        let space = SearchSpace::new().add_int("layers", 4, 2);
        assert!(Tuner::from_run_config(&run, space, tracker).is_err());
    }
}
