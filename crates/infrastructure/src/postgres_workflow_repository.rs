use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use jitgate_application::{GrantExecution, WorkflowRepository};
use jitgate_core::{AppError, AppResult};
use jitgate_domain::GrantStep;

/// PostgreSQL-backed repository for durable grant-workflow executions.
///
/// The primary key on `request_id` makes the start idempotent and guarantees
/// a request is never in two executions; claims lease rows with
/// `FOR UPDATE SKIP LOCKED` so concurrent workers never double-run a step.
#[derive(Clone)]
pub struct PostgresWorkflowRepository {
    pool: PgPool,
}

impl PostgresWorkflowRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ExecutionRow {
    request_id: Uuid,
    step: String,
    attempt: i32,
    wake_at: DateTime<Utc>,
    last_error: Option<String>,
}

impl ExecutionRow {
    fn into_execution(self) -> AppResult<GrantExecution> {
        Ok(GrantExecution {
            request_id: self.request_id,
            step: GrantStep::parse(self.step.as_str())?,
            attempt: self.attempt,
            wake_at: self.wake_at,
            last_error: self.last_error,
        })
    }
}

#[async_trait]
impl WorkflowRepository for PostgresWorkflowRepository {
    async fn start(&self, request_id: Uuid, wake_at: DateTime<Utc>) -> AppResult<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO grant_workflows (request_id, step, wake_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (request_id)
            DO NOTHING
            "#,
        )
        .bind(request_id)
        .bind(GrantStep::Validate.as_str())
        .bind(wake_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to start grant workflow for request '{request_id}': {error}"
            ))
        })?;

        Ok(inserted.rows_affected() == 1)
    }

    async fn claim_due(
        &self,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<GrantExecution>> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to start workflow claim transaction: {error}"
            ))
        })?;

        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"
            WITH due_executions AS (
                SELECT request_id
                FROM grant_workflows
                WHERE state = 'running'
                  AND wake_at <= $3
                  AND (lease_expires_at IS NULL OR lease_expires_at < now())
                ORDER BY wake_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE grant_workflows workflows
            SET
                leased_by = $2,
                lease_expires_at = now() + make_interval(secs => $4::INT),
                updated_at = now()
            FROM due_executions
            WHERE workflows.request_id = due_executions.request_id
            RETURNING
                workflows.request_id,
                workflows.step,
                workflows.attempt,
                workflows.wake_at,
                workflows.last_error
            "#,
        )
        .bind(i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid workflow claim limit: {error}"))
        })?)
        .bind(worker_id)
        .bind(now)
        .bind(i32::try_from(lease_seconds).map_err(|error| {
            AppError::Validation(format!("invalid workflow lease_seconds: {error}"))
        })?)
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to claim workflow executions for worker '{worker_id}': {error}"
            ))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit workflow claim transaction: {error}"
            ))
        })?;

        rows.into_iter().map(ExecutionRow::into_execution).collect()
    }

    async fn advance(
        &self,
        request_id: Uuid,
        step: GrantStep,
        wake_at: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE grant_workflows
            SET
                step = $2,
                attempt = 0,
                wake_at = $3,
                last_error = $4,
                leased_by = NULL,
                lease_expires_at = NULL,
                updated_at = now()
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(step.as_str())
        .bind(wake_at)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to advance workflow for request '{request_id}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn reschedule(
        &self,
        request_id: Uuid,
        attempt: i32,
        wake_at: DateTime<Utc>,
        last_error: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE grant_workflows
            SET
                attempt = $2,
                wake_at = $3,
                last_error = $4,
                leased_by = NULL,
                lease_expires_at = NULL,
                updated_at = now()
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(attempt)
        .bind(wake_at)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to reschedule workflow for request '{request_id}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn complete(&self, request_id: Uuid, note: Option<&str>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE grant_workflows
            SET
                state = 'completed',
                note = $2,
                leased_by = NULL,
                lease_expires_at = NULL,
                updated_at = now()
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(note)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to complete workflow for request '{request_id}': {error}"
            ))
        })?;

        Ok(())
    }
}
