use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level pipeline steps, in the order a full run executes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStep {
    Selection,
    Search,
    Train,
    Predict,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStep::Selection => "selection",
            PipelineStep::Search => "search",
            PipelineStep::Train => "train",
            PipelineStep::Predict => "predict",
        };
        f.write_str(name)
    }
}
