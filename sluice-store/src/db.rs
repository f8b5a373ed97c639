use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create pipelines collection
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            input_executor VARCHAR(255) NOT NULL,
            steps JSONB NOT NULL DEFAULT '[]',
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create schedules collection
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedules (
            pipeline_id UUID PRIMARY KEY,
            polling_interval_secs BIGINT NOT NULL,
            next_due_at TIMESTAMPTZ NOT NULL,
            last_run_at TIMESTAMPTZ,
            last_run_outcome VARCHAR(20),
            last_error TEXT,
            fencing_token BIGINT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create locks collection
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS locks (
            name VARCHAR(255) PRIMARY KEY,
            holder_id VARCHAR(255) NOT NULL,
            acquired_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            fencing_token BIGINT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create executions collection
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            execution_id UUID PRIMARY KEY,
            task_id UUID NOT NULL,
            pipeline_id UUID NOT NULL,
            content_id TEXT NOT NULL,
            status VARCHAR(20) NOT NULL,
            attempt INTEGER NOT NULL,
            worker_id VARCHAR(255),
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            error TEXT,
            events JSONB NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create task queue
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_queue (
            id UUID PRIMARY KEY,
            body TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            enqueued_at TIMESTAMPTZ NOT NULL,
            visible_at TIMESTAMPTZ NOT NULL,
            receive_count INTEGER NOT NULL DEFAULT 0,
            receipt UUID
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for the hot paths
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_schedules_next_due_at ON schedules(next_due_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_executions_pipeline_id ON executions(pipeline_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_task_queue_visible ON task_queue(visible_at, priority DESC, enqueued_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
