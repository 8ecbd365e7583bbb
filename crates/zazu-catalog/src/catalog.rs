use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use zazu_optimizer::SearchSpace;
use zazu_types::{load_json, ConfigError, ZazuResult};

/// Domain of one tunable hyperparameter as written in `models.json`.
///
/// A JSON array is a categorical choice; an object with `low`/`high` is a
/// range whose `type` defaults to `float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomainDescriptor {
    Values(Vec<serde_json::Value>),
    Range(RangeDescriptor),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeDescriptor {
    #[serde(rename = "type", default)]
    pub kind: RangeKind,
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeKind {
    #[default]
    Float,
    Int,
    Log,
}

/// Catalog ratings. Accuracy and speed are higher-is-better; memory is the
/// model's footprint, so lower is lighter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRatings {
    pub accuracy: f64,
    pub speed: f64,
    pub memory: f64,
}

/// One entry of `models.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Task this model solves. Entries without a task are task-agnostic.
    #[serde(default)]
    pub task: Option<String>,

    #[serde(default, alias = "model_space")]
    pub ratings: ModelRatings,

    #[serde(default)]
    pub tags: Vec<String>,

    pub hp_search_space: BTreeMap<String, DomainDescriptor>,

    #[serde(default)]
    pub training_configs: serde_json::Map<String, serde_json::Value>,
}

impl ModelEntry {
    /// Translate the declared domains into a search space, ordered by name.
    pub fn search_space(&self) -> ZazuResult<SearchSpace> {
        let mut space = SearchSpace::new();
        for (name, domain) in &self.hp_search_space {
            space = match domain {
                DomainDescriptor::Values(values) => space.add_choice(name, values.clone()),
                DomainDescriptor::Range(range) => match range.kind {
                    RangeKind::Float => space.add_float(name, range.low, range.high),
                    RangeKind::Log => space.add_log_uniform(name, range.low, range.high),
                    RangeKind::Int => {
                        if range.low.fract() != 0.0 || range.high.fract() != 0.0 {
                            return Err(ConfigError::InvalidSearchSpace {
                                parameter: name.clone(),
                                message: "int range bounds must be whole numbers".into(),
                            }
                            .into());
                        }
                        space.add_int(name, range.low as i64, range.high as i64)
                    }
                },
            };
        }
        space.validate()?;
        Ok(space)
    }

    pub fn supports_task(&self, task: &str) -> bool {
        self.task
            .as_deref()
            .map_or(true, |own| own.eq_ignore_ascii_case(task))
    }
}

/// The static model catalog: model name → entry. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelsSpec {
    spec_data: BTreeMap<String, ModelEntry>,
}

impl ModelsSpec {
    pub fn load(path: impl AsRef<Path>) -> ZazuResult<Self> {
        let spec: Self = load_json(path.as_ref())?;
        for (name, entry) in &spec.spec_data {
            entry.search_space().map_err(|e| ConfigError::InvalidSpec {
                path: path.as_ref().to_path_buf(),
                message: format!("model '{name}': {e}"),
            })?;
        }
        tracing::info!(models = spec.len(), "loaded model catalog");
        Ok(spec)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, ModelEntry)>) -> Self {
        Self {
            spec_data: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelEntry> {
        self.spec_data.get(name)
    }

    /// Look up an entry that must exist.
    pub fn require(&self, name: &str) -> ZazuResult<&ModelEntry> {
        self.get(name).ok_or_else(|| {
            ConfigError::UnknownModel {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModelEntry)> {
        self.spec_data.iter()
    }

    pub fn len(&self) -> usize {
        self.spec_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spec_data.is_empty()
    }
}
