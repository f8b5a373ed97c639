//! Execution monitoring endpoints

use crate::EngineClient;
use crate::error::Result;
use sluice_core::domain::execution::ExecutionRecord;
use uuid::Uuid;

impl EngineClient {
    // =============================================================================
    // Executions
    // =============================================================================

    /// Get an execution record by ID
    ///
    /// # Arguments
    /// * `execution_id` - The execution UUID
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<ExecutionRecord> {
        let url = format!("{}/executions/{}", self.base_url, execution_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List the most recent executions of a pipeline, newest first
    ///
    /// # Arguments
    /// * `pipeline_id` - The pipeline UUID
    /// * `limit` - Maximum number of records (engine default when `None`)
    pub async fn list_executions(
        &self,
        pipeline_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionRecord>> {
        let mut url = format!("{}/executions/pipeline/{}", self.base_url, pipeline_id);
        if let Some(limit) = limit {
            url.push_str(&format!("?limit={}", limit));
        }
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
