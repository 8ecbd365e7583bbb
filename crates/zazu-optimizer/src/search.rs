//! Search space definitions and hyperparameter sweep strategies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use zazu_types::{ConfigError, SearchMethod, ZazuResult};

/// One concrete hyperparameter assignment, keyed by parameter name.
pub type HyperParameters = BTreeMap<String, ParameterValue>;

/// One tunable hyperparameter and the domain it is drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    pub kind: ParameterKind,
}

/// Domain of a hyperparameter, as declared in the model catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Uniform over `[low, high]`.
    FloatRange { low: f64, high: f64 },
    /// Every integer in `[low, high]`.
    IntRange { low: i64, high: i64 },
    /// Uniform in log space; for learning rates and weight decay.
    LogUniform { low: f64, high: f64 },
    /// An explicit list of values (`"lr": [0.001, 0.01]` in the catalog).
    Choice { values: Vec<ParameterValue> },
}

/// The value a trial assigns to one hyperparameter.
///
/// Variant order matters for the untagged representation: integers must be
/// tried before floats so that `5` reads back as `Int(5)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    /// Normalize a raw JSON value so numbers get their numeric variant.
    pub fn from_json(value: serde_json::Value) -> Self {
        if let Some(i) = value.as_i64() {
            return Self::Int(i);
        }
        if value.is_f64() {
            if let Some(f) = value.as_f64() {
                return Self::Float(f);
            }
        }
        Self::Json(value)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Json(v) => v.as_f64(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Hyperparameters tuned for one model, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice {
                values: values.into_iter().map(ParameterValue::from_json).collect(),
            },
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Number of grid points when continuous dimensions get `float_steps`
    /// points each, or `None` when the product does not fit in a `u128`.
    pub fn grid_size(&self, float_steps: usize) -> Option<u128> {
        if self.is_empty() {
            return Some(0);
        }
        self.parameters.iter().try_fold(1u128, |total, param| {
            total.checked_mul(GridAxis::new(&param.kind, float_steps).len())
        })
    }

    /// Reject ranges that cannot be sampled.
    pub fn validate(&self) -> ZazuResult<()> {
        for param in &self.parameters {
            let problem = match &param.kind {
                ParameterKind::FloatRange { low, high } if !(low <= high) => {
                    Some(format!("low {low} is above high {high}"))
                }
                ParameterKind::IntRange { low, high } if low > high => {
                    Some(format!("low {low} is above high {high}"))
                }
                ParameterKind::LogUniform { low, high } if *low <= 0.0 || low > high => {
                    Some(format!("log range needs 0 < low <= high, got [{low}, {high}]"))
                }
                ParameterKind::Choice { values } if values.is_empty() => {
                    Some("no values to choose from".to_string())
                }
                _ => None,
            };
            if let Some(message) = problem {
                return Err(ConfigError::InvalidSearchSpace {
                    parameter: param.name.clone(),
                    message,
                }
                .into());
            }
        }
        Ok(())
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}


/// Proposes hyperparameter assignments for the tuner.
pub trait SearchStrategy: Send + Sync {
    /// Up to `count` new assignments. Fewer (or none) means the strategy is
    /// running out of candidates.
    fn suggest(&mut self, count: usize) -> Vec<HyperParameters>;

    /// Feed back a finished trial. `score` is oriented so that higher is
    /// better regardless of the objective direction.
    fn report(&mut self, _params: &HyperParameters, _score: f64) {}

    fn is_exhausted(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}

/// Instantiate the strategy selected by `search_method`.
pub fn build_strategy(
    method: SearchMethod,
    space: SearchSpace,
    grid_steps: usize,
    exploration_weight: f64,
    seed: Option<u64>,
) -> Box<dyn SearchStrategy> {
    match method {
        SearchMethod::Grid => Box::new(GridSearch::new(space, grid_steps)),
        SearchMethod::Random => Box::new(RandomSearch::with_seed(space, seed)),
        SearchMethod::Bayesian => {
            Box::new(BayesianSearch::new(space, exploration_weight).seeded(seed))
        }
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// `steps` evenly spaced points from `low` to `high`, both included.
fn linspace(low: f64, high: f64, steps: usize) -> impl Iterator<Item = f64> {
    let steps = steps.max(2);
    (0..steps).map(move |i| low + (high - low) * i as f64 / (steps - 1) as f64)
}

// ---- Grid ----

/// Walks the cartesian product of all dimensions in a fixed order, the last
/// dimension varying fastest. Continuous dimensions are discretized into
/// `float_steps` points.
///
/// Points are decoded from a running index on demand, so the size of the
/// product only bounds the index.
#[derive(Debug, Clone)]
pub struct GridSearch {
    axes: Vec<(String, GridAxis)>,
    /// `None` when the product overflows; such a grid never runs out.
    total: Option<u128>,
    next: u128,
}

impl GridSearch {
    pub fn new(space: SearchSpace, float_steps: usize) -> Self {
        let total = space.grid_size(float_steps);
        let axes = space
            .parameters
            .iter()
            .map(|param| (param.name.clone(), GridAxis::new(&param.kind, float_steps)))
            .collect();
        Self {
            axes,
            total,
            next: 0,
        }
    }

    /// Mixed-radix decode of `index`, last axis as the lowest digit.
    fn point(&self, mut index: u128) -> HyperParameters {
        let mut point = HyperParameters::new();
        for (name, axis) in self.axes.iter().rev() {
            let len = axis.len().max(1);
            point.insert(name.clone(), axis.value(index % len));
            index /= len;
        }
        point
    }
}

#[derive(Debug, Clone)]
enum GridAxis {
    Values(Vec<ParameterValue>),
    Ints { low: i64, len: u128 },
}

impl GridAxis {
    fn new(kind: &ParameterKind, float_steps: usize) -> Self {
        match kind {
            ParameterKind::Choice { values } => Self::Values(values.clone()),
            ParameterKind::IntRange { low, high } => Self::Ints {
                low: *low,
                len: u128::try_from(i128::from(*high) - i128::from(*low) + 1).unwrap_or(0),
            },
            ParameterKind::FloatRange { low, high } => Self::Values(
                linspace(*low, *high, float_steps)
                    .map(ParameterValue::Float)
                    .collect(),
            ),
            ParameterKind::LogUniform { low, high } => Self::Values(
                linspace(low.ln(), high.ln(), float_steps)
                    .map(|x| ParameterValue::Float(x.exp()))
                    .collect(),
            ),
        }
    }

    fn len(&self) -> u128 {
        match self {
            Self::Values(values) => values.len() as u128,
            Self::Ints { len, .. } => *len,
        }
    }

    /// `offset` must be below `len()`.
    fn value(&self, offset: u128) -> ParameterValue {
        match self {
            Self::Values(values) => values[offset as usize].clone(),
            Self::Ints { low, .. } => ParameterValue::Int((i128::from(*low) + offset as i128) as i64),
        }
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<HyperParameters> {
        let mut batch = Vec::with_capacity(count.min(64));
        while batch.len() < count && !self.is_exhausted() {
            batch.push(self.point(self.next));
            self.next += 1;
        }
        batch
    }

    fn is_exhausted(&self) -> bool {
        self.total.is_some_and(|total| self.next >= total)
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random ----

/// Draws every dimension independently.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace) -> Self {
        Self::with_seed(space, None)
    }

    /// A fixed seed makes the proposal sequence reproducible.
    pub fn with_seed(space: SearchSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            rng: make_rng(seed),
        }
    }

    fn draw(&mut self) -> HyperParameters {
        let rng = &mut self.rng;
        self.space
            .parameters
            .iter()
            .filter_map(|param| sample_param(rng, &param.kind).map(|v| (param.name.clone(), v)))
            .collect()
    }
}

fn sample_param(rng: &mut StdRng, kind: &ParameterKind) -> Option<ParameterValue> {
    let value = match kind {
        ParameterKind::FloatRange { low, high } => {
            ParameterValue::Float(rng.random_range(*low..=*high))
        }
        ParameterKind::IntRange { low, high } => {
            ParameterValue::Int(rng.random_range(*low..=*high))
        }
        ParameterKind::LogUniform { low, high } => {
            let exponent: f64 = rng.random_range(low.ln()..=high.ln());
            ParameterValue::Float(exponent.exp())
        }
        ParameterKind::Choice { values } => {
            if values.is_empty() {
                return None;
            }
            values[rng.random_range(0..values.len())].clone()
        }
    };
    Some(value)
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<HyperParameters> {
        if self.space.is_empty() {
            return Vec::new();
        }
        (0..count).map(|_| self.draw()).collect()
    }

    fn is_exhausted(&self) -> bool {
        self.space.is_empty()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian ----

/// Model-guided search with a nearest-best surrogate: with probability
/// `exploration_weight` (and always before the first report) it draws at
/// random, otherwise it proposes a neighbour of the best trial seen so far.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    sampler: RandomSearch,
    observations: Vec<(HyperParameters, f64)>,
    exploration_weight: f64,
}

impl BayesianSearch {
    pub fn new(space: SearchSpace, exploration_weight: f64) -> Self {
        Self {
            sampler: RandomSearch::new(space),
            observations: Vec::new(),
            exploration_weight,
        }
    }

    pub fn seeded(mut self, seed: Option<u64>) -> Self {
        if seed.is_some() {
            self.sampler.rng = make_rng(seed);
        }
        self
    }

    fn incumbent(&self) -> Option<&HyperParameters> {
        self.observations
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(params, _)| params)
    }

    fn neighbour(&mut self) -> HyperParameters {
        let Some(base) = self.incumbent().cloned() else {
            return self.sampler.draw();
        };

        let rng = &mut self.sampler.rng;
        let mut proposal = HyperParameters::new();
        for param in &self.sampler.space.parameters {
            let keep_choice = rng.random::<f64>() >= 0.5;
            let value = match (&param.kind, base.get(&param.name)) {
                // Jitter by up to a tenth of the range.
                (ParameterKind::FloatRange { low, high }, Some(ParameterValue::Float(v))) => {
                    let jitter = rng.random_range(-0.1..0.1) * (high - low);
                    Some(ParameterValue::Float((v + jitter).clamp(*low, *high)))
                }
                (ParameterKind::LogUniform { low, high }, Some(ParameterValue::Float(v))) => {
                    let jitter = rng.random_range(-0.1..0.1) * (high.ln() - low.ln());
                    Some(ParameterValue::Float((v.ln() + jitter).exp().clamp(*low, *high)))
                }
                (ParameterKind::IntRange { low, high }, Some(ParameterValue::Int(v))) => {
                    let step: i64 = rng.random_range(-2..=2);
                    Some(ParameterValue::Int((v + step).clamp(*low, *high)))
                }
                // Categorical values have no neighbours: keep or redraw.
                (ParameterKind::Choice { .. }, Some(v)) if keep_choice => Some(v.clone()),
                (kind, _) => sample_param(rng, kind),
            };
            if let Some(value) = value {
                proposal.insert(param.name.clone(), value);
            }
        }
        proposal
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, count: usize) -> Vec<HyperParameters> {
        if self.sampler.space.is_empty() {
            return Vec::new();
        }
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            let explore = self.observations.is_empty()
                || self.sampler.rng.random::<f64>() < self.exploration_weight;
            batch.push(if explore {
                self.sampler.draw()
            } else {
                self.neighbour()
            });
        }
        batch
    }

    fn report(&mut self, params: &HyperParameters, score: f64) {
        self.observations.push((params.clone(), score));
    }

    fn is_exhausted(&self) -> bool {
        self.sampler.space.is_empty()
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cnn_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("batch", 8, 32)
            .add_log_uniform("wd", 1e-6, 1e-2)
            .add_float("dropout", 0.0, 0.5)
    }

    fn lr_choices() -> SearchSpace {
        SearchSpace::new().add_choice(
            "lr",
            vec![
                serde_json::json!(0.001),
                serde_json::json!(0.01),
                serde_json::json!(0.1),
            ],
        )
    }

    fn float(params: &HyperParameters, name: &str) -> f64 {
        match params.get(name) {
            Some(ParameterValue::Float(v)) => *v,
            other => panic!("{name} should be a float, got {other:?}"),
        }
    }

    #[test]
    fn grid_enumerates_choices_in_order() {
        let mut grid = GridSearch::new(lr_choices(), 5);
        assert_eq!(lr_choices().grid_size(5), Some(3));

        let lrs: Vec<f64> = grid.suggest(10).iter().map(|p| float(p, "lr")).collect();
        assert_eq!(lrs, [0.001, 0.01, 0.1]);
        assert!(grid.is_exhausted());
        assert!(grid.suggest(1).is_empty());
    }

    #[test]
    fn grid_is_a_cartesian_product() {
        let space = lr_choices().add_int("epochs", 3, 4);
        assert_eq!(space.grid_size(5), Some(6));

        let mut grid = GridSearch::new(space, 5);
        let first = grid.suggest(4);
        assert_eq!(first.len(), 4);
        assert_eq!(first[0]["epochs"], ParameterValue::Int(3));
        assert_eq!(first[1]["epochs"], ParameterValue::Int(4));
        assert_eq!(grid.suggest(4).len(), 2);
    }

    #[test]
    fn grid_discretizes_continuous_ranges() {
        let space = SearchSpace::new().add_log_uniform("wd", 1e-4, 1e-2);
        assert_eq!(space.grid_size(3), Some(3));

        let mut grid = GridSearch::new(space, 3);
        let values: Vec<f64> = grid.suggest(3).iter().map(|p| float(p, "wd")).collect();
        assert!((values[0] - 1e-4).abs() < 1e-12);
        assert!((values[1] - 1e-3).abs() < 1e-12);
        assert!((values[2] - 1e-2).abs() < 1e-12);
    }

    #[test]
    fn huge_grids_are_walked_lazily() {
        let space = SearchSpace::new()
            .add_int("a", 1, 1_000_000)
            .add_int("b", 1, 1_000_000);
        assert_eq!(space.grid_size(5), Some(1_000_000_000_000));

        let mut grid = GridSearch::new(space, 5);
        let batch = grid.suggest(3);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0]["a"], ParameterValue::Int(1));
        assert_eq!(batch[2]["b"], ParameterValue::Int(3));
        assert!(!grid.is_exhausted());
    }

    #[test]
    fn overflowing_grid_never_runs_out() {
        let space = SearchSpace::new()
            .add_int("a", i64::MIN, i64::MAX)
            .add_int("b", i64::MIN, i64::MAX)
            .add_int("c", 0, 1);
        assert_eq!(space.grid_size(5), None);

        let mut grid = GridSearch::new(space, 5);
        let batch = grid.suggest(2);
        assert_eq!(batch[0]["a"], ParameterValue::Int(i64::MIN));
        assert_eq!(batch[1]["c"], ParameterValue::Int(1));
        assert!(!grid.is_exhausted());
    }

    #[test]
    fn random_draws_stay_inside_the_domain() {
        let mut search = RandomSearch::new(cnn_space());
        for params in search.suggest(100) {
            match params["batch"] {
                ParameterValue::Int(b) => assert!((8..=32).contains(&b)),
                ref other => panic!("batch should be an int, got {other:?}"),
            }
            assert!((1e-6..=1e-2).contains(&float(&params, "wd")));
            assert!((0.0..=0.5).contains(&float(&params, "dropout")));
        }
    }

    #[test]
    fn seeded_strategies_repeat_themselves() {
        let mut a = RandomSearch::with_seed(cnn_space(), Some(7));
        let mut b = RandomSearch::with_seed(cnn_space(), Some(7));
        assert_eq!(a.suggest(10), b.suggest(10));

        let mut c = BayesianSearch::new(cnn_space(), 0.3).seeded(Some(3));
        let mut d = BayesianSearch::new(cnn_space(), 0.3).seeded(Some(3));
        assert_eq!(c.suggest(5), d.suggest(5));
    }

    #[test]
    fn bayesian_explores_until_first_report() {
        let mut search = BayesianSearch::new(cnn_space(), 0.0);
        assert_eq!(search.suggest(8).len(), 8);
    }

    #[test]
    fn bayesian_stays_near_the_best_trial() {
        let mut search = BayesianSearch::new(SearchSpace::new().add_float("dropout", 0.0, 1.0), 0.0);
        let mut best = HyperParameters::new();
        best.insert("dropout".into(), ParameterValue::Float(0.5));
        search.report(&best, 0.9);
        let mut worse = HyperParameters::new();
        worse.insert("dropout".into(), ParameterValue::Float(0.0));
        search.report(&worse, 0.2);

        for params in search.suggest(20) {
            let dropout = float(&params, "dropout");
            assert!((0.4..=0.6).contains(&dropout), "dropout {dropout} strayed from 0.5");
        }
    }

    #[test]
    fn empty_space_proposes_nothing() {
        let mut random = RandomSearch::new(SearchSpace::new());
        assert!(random.suggest(4).is_empty());
        assert!(random.is_exhausted());
        assert!(GridSearch::new(SearchSpace::new(), 5).is_exhausted());
    }

    #[test]
    fn validate_rejects_unusable_domains() {
        assert!(SearchSpace::new().add_float("dropout", 0.9, 0.1).validate().is_err());
        assert!(SearchSpace::new().add_log_uniform("lr", 0.0, 1.0).validate().is_err());
        assert!(SearchSpace::new().add_choice("optimizer", vec![]).validate().is_err());
        assert!(cnn_space().validate().is_ok());
    }

    #[test]
    fn assignments_survive_json() {
        let mut params = HyperParameters::new();
        params.insert("lr".into(), ParameterValue::Float(0.01));
        params.insert("epochs".into(), ParameterValue::Int(5));
        params.insert("optimizer".into(), ParameterValue::Json(serde_json::json!("adam")));

        let json = serde_json::to_string(&params).unwrap();
        let back: HyperParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }
}
