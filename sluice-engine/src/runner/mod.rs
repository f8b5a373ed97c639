//! Pipeline runner adapter
//!
//! The engine never interprets pipeline steps itself. Discovery and execution
//! are delegated to an external pipeline runner behind [`PipelineRunner`].

mod http;

pub use http::HttpPipelineRunner;

use anyhow::Result;
use async_trait::async_trait;
use sluice_core::domain::content::{ContentItem, ExecutionOutcome};
use sluice_core::domain::pipeline::PipelineDefinition;

/// External pipeline runner
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Runs the pipeline's input executor and returns the discovered items
    async fn discover(&self, pipeline: &PipelineDefinition) -> Result<Vec<ContentItem>>;

    /// Runs the pipeline over one content item, skipping `skip_step`
    async fn execute(
        &self,
        pipeline: &PipelineDefinition,
        skip_step: Option<&str>,
        content: &ContentItem,
    ) -> Result<ExecutionOutcome>;
}
