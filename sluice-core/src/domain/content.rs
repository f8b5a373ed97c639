//! Content discovered by an input executor and the outcome of processing it

use serde::{Deserialize, Serialize};

/// A single discovered content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub content_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Result of running a pipeline over one content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(output: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}
