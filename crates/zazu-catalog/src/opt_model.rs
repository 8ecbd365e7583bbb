//! The run's composite configuration, filled in as the pipeline progresses.

use serde::{Deserialize, Serialize};

use zazu_optimizer::SearchSpace;
use zazu_types::{ConfigError, PipelineStep, RunConfig, ZazuResult};

use crate::catalog::ModelsSpec;

/// Run configuration plus the model selection once one is made.
///
/// The selection fields stay `None` until a model is chosen (or reloaded from
/// a persisted selection); [`OptModel::selected`] validates them before any
/// step that needs a model.
#[derive(Debug, Clone, PartialEq)]
pub struct OptModel {
    configs: RunConfig,
    name: Option<String>,
    hp_space: Option<SearchSpace>,
    training_configs: Option<serde_json::Map<String, serde_json::Value>>,
}

/// A complete, validated model selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedModel {
    pub name: String,
    pub hp_space: SearchSpace,
    pub training_configs: serde_json::Map<String, serde_json::Value>,
}

impl OptModel {
    pub fn new(configs: RunConfig) -> Self {
        Self {
            configs,
            name: None,
            hp_space: None,
            training_configs: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_hp_space(mut self, hp_space: SearchSpace) -> Self {
        self.hp_space = Some(hp_space);
        self
    }

    pub fn with_training_configs(
        mut self,
        training_configs: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.training_configs = Some(training_configs);
        self
    }

    /// Fill the selection fields from the catalog entry named `name`.
    pub fn apply_selection(&mut self, name: &str, models: &ModelsSpec) -> ZazuResult<()> {
        let entry = models.require(name)?;
        self.hp_space = Some(entry.search_space()?);
        self.training_configs = Some(entry.training_configs.clone());
        self.name = Some(name.to_string());
        Ok(())
    }

    pub fn configs(&self) -> &RunConfig {
        &self.configs
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_selected(&self) -> bool {
        self.name.is_some()
    }

    /// The complete selection required by `step`.
    pub fn selected(&self, step: PipelineStep) -> ZazuResult<SelectedModel> {
        let missing = |field: &str| {
            ConfigError::Invalid(format!(
                "the {step} step needs a model selection but '{field}' is not set"
            ))
        };
        let name = self.name.clone().ok_or_else(|| missing("name"))?;
        let hp_space = self.hp_space.clone().ok_or_else(|| missing("hp_space"))?;
        let training_configs = self
            .training_configs
            .clone()
            .ok_or_else(|| missing("training_configs"))?;
        Ok(SelectedModel {
            name,
            hp_space,
            training_configs,
        })
    }
}
