//! Health and status endpoints

use crate::EngineClient;
use crate::error::Result;
use sluice_core::dto::status::EngineStatus;

impl EngineClient {
    // =============================================================================
    // Health
    // =============================================================================

    /// Check that the engine's status API is up
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// Get the supervisor's view of both worker pools
    ///
    /// # Example
    /// ```no_run
    /// # use sluice_client::EngineClient;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = EngineClient::new("http://localhost:8090");
    /// let status = client.status().await?;
    /// println!("{} processing worker(s) alive", status.processing_workers.active);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn status(&self) -> Result<EngineStatus> {
        let url = format!("{}/status", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
