//! Pipeline store
//!
//! Read access to pipeline definitions owned by configuration storage.

use async_trait::async_trait;
use sluice_core::domain::pipeline::PipelineDefinition;
use uuid::Uuid;

use crate::error::StoreResult;

/// Store trait for pipeline definitions
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Finds a pipeline by ID
    async fn get(&self, id: Uuid) -> StoreResult<Option<PipelineDefinition>>;

    /// Lists pipelines with `enabled = true`
    async fn list_enabled(&self) -> StoreResult<Vec<PipelineDefinition>>;

    /// Inserts or replaces a pipeline definition
    async fn upsert(&self, pipeline: &PipelineDefinition) -> StoreResult<()>;
}
