use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jitgate_core::AppResult;
use jitgate_domain::GrantStep;
use uuid::Uuid;

/// One claimed grant-workflow execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantExecution {
    /// Request the execution belongs to; also the execution's unique name.
    pub request_id: Uuid,
    /// Step the execution is currently on.
    pub step: GrantStep,
    /// Failed tries of the current step.
    pub attempt: i32,
    /// Earliest instant the execution becomes due.
    pub wake_at: DateTime<Utc>,
    /// Error recorded by the most recent failed try.
    pub last_error: Option<String>,
}

/// Repository port for durable grant-workflow executions.
///
/// Executions are keyed by `request_id`, so a request can never be in two
/// executions at once. `wake_at` is the durable wait primitive: a row simply
/// stays dormant until its wake time passes, surviving process restarts.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Starts an execution at the validate step.
    ///
    /// Returns `false` when an execution for the request already exists.
    async fn start(&self, request_id: Uuid, wake_at: DateTime<Utc>) -> AppResult<bool>;

    /// Leases due executions for one worker.
    ///
    /// Due means running, `wake_at` in the past, and not held by a live
    /// lease. Rows claimed here are invisible to other workers until the
    /// lease expires.
    async fn claim_due(
        &self,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<GrantExecution>>;

    /// Moves an execution to its next step, resetting the attempt counter.
    async fn advance(
        &self,
        request_id: Uuid,
        step: GrantStep,
        wake_at: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> AppResult<()>;

    /// Re-queues the current step after a failed try.
    async fn reschedule(
        &self,
        request_id: Uuid,
        attempt: i32,
        wake_at: DateTime<Utc>,
        last_error: &str,
    ) -> AppResult<()>;

    /// Terminates an execution, optionally recording why.
    async fn complete(&self, request_id: Uuid, note: Option<&str>) -> AppResult<()>;
}
