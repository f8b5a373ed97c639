//! HTTP pipeline runner
//!
//! Talks to a pipeline runner service over JSON:
//! - `POST {base}/discover` with `{pipeline}` returns `{items: [ContentItem]}`
//! - `POST {base}/execute` with `{pipeline, skip_step, content}` returns an `ExecutionOutcome`

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sluice_core::domain::content::{ContentItem, ExecutionOutcome};
use sluice_core::domain::pipeline::PipelineDefinition;
use std::time::Duration;
use tracing::debug;

use super::PipelineRunner;

#[derive(Serialize)]
struct DiscoverRequest<'a> {
    pipeline: &'a PipelineDefinition,
}

#[derive(Deserialize)]
struct DiscoverResponse {
    items: Vec<ContentItem>,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    pipeline: &'a PipelineDefinition,
    skip_step: Option<&'a str>,
    content: &'a ContentItem,
}

/// [`PipelineRunner`] backed by a remote runner service
#[derive(Debug, Clone)]
pub struct HttpPipelineRunner {
    base_url: String,
    client: Client,
}

impl HttpPipelineRunner {
    /// Creates a runner client whose requests time out after `request_timeout`
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            anyhow::bail!("Pipeline runner returned {} for {}: {}", status, path, text);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Invalid response body from {}", url))
    }
}

#[async_trait]
impl PipelineRunner for HttpPipelineRunner {
    async fn discover(&self, pipeline: &PipelineDefinition) -> Result<Vec<ContentItem>> {
        debug!(pipeline_id = %pipeline.id, "Requesting discovery");
        let response: DiscoverResponse = self
            .post("/discover", &DiscoverRequest { pipeline })
            .await?;
        Ok(response.items)
    }

    async fn execute(
        &self,
        pipeline: &PipelineDefinition,
        skip_step: Option<&str>,
        content: &ContentItem,
    ) -> Result<ExecutionOutcome> {
        debug!(
            pipeline_id = %pipeline.id,
            content_id = %content.content_id,
            "Requesting execution"
        );
        self.post(
            "/execute",
            &ExecuteRequest {
                pipeline,
                skip_step,
                content,
            },
        )
        .await
    }
}
