//! Content processing task
//!
//! The unit of work carried by the task queue. Created by a source scheduler,
//! consumed and deleted by a processing worker.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::content::ContentItem;
use crate::domain::pipeline::PipelineDefinition;

/// Value of `task_type` for every task the engine emits
pub const CONTENT_PROCESSING_TASK: &str = "content_processing";

/// Queue message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentProcessingTask {
    pub task_id: Uuid,
    pub task_type: String,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub execution_id: Uuid,
    pub content_id: String,
    pub content_data: serde_json::Value,
    /// Step already run by the scheduler; skipped on execution
    pub executed_input_executor: String,
    #[serde(default)]
    pub priority: i32,
    pub max_retries: u32,
    /// Failed deliveries so far
    #[serde(default)]
    pub attempt_count: u32,
}

impl ContentProcessingTask {
    /// Builds a task for one discovered item
    pub fn for_content(pipeline: &PipelineDefinition, item: ContentItem, max_retries: u32) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            task_type: CONTENT_PROCESSING_TASK.to_string(),
            pipeline_id: pipeline.id,
            pipeline_name: pipeline.name.clone(),
            execution_id: Uuid::new_v4(),
            content_id: item.content_id,
            content_data: item.data,
            executed_input_executor: pipeline.input_executor.clone(),
            priority: 0,
            max_retries,
            attempt_count: 0,
        }
    }

    /// The content item this task carries
    pub fn content_item(&self) -> ContentItem {
        ContentItem {
            content_id: self.content_id.clone(),
            data: self.content_data.clone(),
        }
    }

    /// Whether a failure of the current attempt exhausts the retry budget
    pub fn is_final_attempt(&self) -> bool {
        self.attempt_count + 1 >= self.max_retries
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ContentProcessingTask {
        ContentProcessingTask {
            task_id: Uuid::new_v4(),
            task_type: CONTENT_PROCESSING_TASK.to_string(),
            pipeline_id: Uuid::new_v4(),
            pipeline_name: "ingest".to_string(),
            execution_id: Uuid::new_v4(),
            content_id: "blob/a.pdf".to_string(),
            content_data: json!({ "size": 12 }),
            executed_input_executor: "poll".to_string(),
            priority: 0,
            max_retries: 3,
            attempt_count: 0,
        }
    }

    #[test]
    fn test_wire_format_field_names() {
        let value: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        for key in [
            "task_id",
            "task_type",
            "pipeline_id",
            "pipeline_name",
            "execution_id",
            "content_id",
            "content_data",
            "executed_input_executor",
            "priority",
            "max_retries",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_attempt_count_defaults_when_absent() {
        let task = sample();
        let mut value = serde_json::to_value(&task).unwrap();
        value.as_object_mut().unwrap().remove("attempt_count");
        value.as_object_mut().unwrap().remove("priority");

        let parsed = ContentProcessingTask::from_json(&value.to_string()).unwrap();
        assert_eq!(parsed.attempt_count, 0);
        assert_eq!(parsed.priority, 0);
        assert_eq!(parsed.task_id, task.task_id);
    }

    #[test]
    fn test_final_attempt() {
        let mut task = sample();
        assert!(!task.is_final_attempt());
        task.attempt_count = 2;
        assert!(task.is_final_attempt());

        task.max_retries = 0;
        task.attempt_count = 0;
        assert!(task.is_final_attempt());
    }
}
