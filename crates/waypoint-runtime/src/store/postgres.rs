use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use waypoint_core::config::StoreConfig;
use waypoint_core::workflow::{StateStore, WorkflowRecord, WorkflowStatus};
use waypoint_core::{Result, WaypointError};

/// PostgreSQL-backed state store. One row per workflow instance.
#[derive(Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using store configuration.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| WaypointError::Database(format!("Failed to connect: {}", e)))?;
        Ok(Self { pool })
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the state table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS waypoint_workflow_runs (
                workflow_name VARCHAR(255) NOT NULL,
                workflow_id VARCHAR(255) NOT NULL,
                status VARCHAR(32) NOT NULL,
                current_step VARCHAR(255),
                step_input JSONB,
                user_state JSONB,
                attempt BIGINT NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                recovering BOOLEAN NOT NULL DEFAULT FALSE,
                failure TEXT,
                started_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (workflow_name, workflow_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn load(&self, workflow: &str, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        let row = sqlx::query(
            r#"
            SELECT workflow_id, status, current_step, step_input, user_state,
                   attempt, retry_count, recovering, failure, started_at
            FROM waypoint_workflow_runs
            WHERE workflow_name = $1 AND workflow_id = $2
            "#,
        )
        .bind(workflow)
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status")?;
        let attempt: i64 = row.try_get("attempt")?;
        let retry_count: i32 = row.try_get("retry_count")?;

        Ok(Some(WorkflowRecord {
            workflow_id: row.try_get("workflow_id")?,
            status: status.parse::<WorkflowStatus>()?,
            current_step: row.try_get("current_step")?,
            step_input: row.try_get("step_input")?,
            user_state: row.try_get("user_state")?,
            attempt: attempt as u64,
            retry_count: retry_count as u32,
            recovering: row.try_get("recovering")?,
            failure: row.try_get("failure")?,
            started_at: row.try_get("started_at")?,
        }))
    }

    async fn save(&self, workflow: &str, record: &WorkflowRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO waypoint_workflow_runs (
                workflow_name, workflow_id, status, current_step, step_input, user_state,
                attempt, retry_count, recovering, failure, started_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (workflow_name, workflow_id) DO UPDATE SET
                status = EXCLUDED.status,
                current_step = EXCLUDED.current_step,
                step_input = EXCLUDED.step_input,
                user_state = EXCLUDED.user_state,
                attempt = EXCLUDED.attempt,
                retry_count = EXCLUDED.retry_count,
                recovering = EXCLUDED.recovering,
                failure = EXCLUDED.failure,
                started_at = COALESCE(waypoint_workflow_runs.started_at, EXCLUDED.started_at),
                updated_at = NOW()
            "#,
        )
        .bind(workflow)
        .bind(&record.workflow_id)
        .bind(record.status.as_str())
        .bind(&record.current_step)
        .bind(&record.step_input)
        .bind(&record.user_state)
        .bind(record.attempt as i64)
        .bind(record.retry_count as i32)
        .bind(record.recovering)
        .bind(&record.failure)
        .bind(record.started_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
