//! Pipeline collection
//!
//! Handles all database operations related to pipeline definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::domain::pipeline::{PipelineDefinition, StepDefinition};
use uuid::Uuid;

use super::PgStore;
use crate::error::StoreResult;
use crate::pipeline::PipelineStore;

#[async_trait]
impl PipelineStore for PgStore {
    async fn get(&self, id: Uuid) -> StoreResult<Option<PipelineDefinition>> {
        let row = sqlx::query_as::<_, PipelineRow>(
            r#"
            SELECT id, name, version, enabled, input_executor, steps, updated_at
            FROM pipelines
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PipelineDefinition::try_from).transpose()
    }

    async fn list_enabled(&self) -> StoreResult<Vec<PipelineDefinition>> {
        let rows = sqlx::query_as::<_, PipelineRow>(
            r#"
            SELECT id, name, version, enabled, input_executor, steps, updated_at
            FROM pipelines
            WHERE enabled = TRUE
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PipelineDefinition::try_from).collect()
    }

    async fn upsert(&self, pipeline: &PipelineDefinition) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipelines (id, name, version, enabled, input_executor, steps, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                version = EXCLUDED.version,
                enabled = EXCLUDED.enabled,
                input_executor = EXCLUDED.input_executor,
                steps = EXCLUDED.steps,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(pipeline.id)
        .bind(&pipeline.name)
        .bind(pipeline.version)
        .bind(pipeline.enabled)
        .bind(&pipeline.input_executor)
        .bind(serde_json::to_value(&pipeline.steps)?)
        .bind(pipeline.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    name: String,
    version: i32,
    enabled: bool,
    input_executor: String,
    steps: serde_json::Value,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PipelineRow> for PipelineDefinition {
    type Error = crate::error::StoreError;

    fn try_from(row: PipelineRow) -> Result<Self, Self::Error> {
        let steps: Vec<StepDefinition> = serde_json::from_value(row.steps)?;

        Ok(PipelineDefinition {
            id: row.id,
            name: row.name,
            version: row.version,
            enabled: row.enabled,
            input_executor: row.input_executor,
            steps,
            updated_at: row.updated_at,
        })
    }
}
