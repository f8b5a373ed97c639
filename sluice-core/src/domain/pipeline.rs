//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Settings key on the input step that carries its polling interval
pub const POLLING_INTERVAL_SETTING: &str = "polling_interval_seconds";

/// Pipeline definition
///
/// Immutable per version. Owned by configuration storage and read-only to
/// the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub id: Uuid,
    pub name: String,
    pub version: i32,
    pub enabled: bool,
    /// Id of the step that discovers content
    pub input_executor: String,
    pub steps: Vec<StepDefinition>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A single executor step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub settings: serde_json::Value,
    /// Ids of the steps fed by this one
    #[serde(default)]
    pub next: Vec<String>,
}

impl PipelineDefinition {
    /// Returns the designated input step, if it is part of the graph
    pub fn input_step(&self) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == self.input_executor)
    }

    /// Polling interval of the input step, or `default` when unset
    pub fn polling_interval(&self, default: Duration) -> Duration {
        self.input_step()
            .and_then(|step| step.settings.get(POLLING_INTERVAL_SETTING))
            .and_then(|v| v.as_u64())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// Returns a copy of this pipeline with `step_id` and every edge into it removed
    pub fn without_step(&self, step_id: &str) -> PipelineDefinition {
        let steps = self
            .steps
            .iter()
            .filter(|s| s.id != step_id)
            .map(|s| StepDefinition {
                next: s.next.iter().filter(|n| *n != step_id).cloned().collect(),
                ..s.clone()
            })
            .collect();

        PipelineDefinition {
            steps,
            ..self.clone()
        }
    }
}
