use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use jitgate_core::{AppError, AppResult};
use jitgate_domain::{AccessRequest, AuditEventType, CallbackPayload, GrantStep, RequestStatus};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit_service::{AuditActor, AuditService};
use crate::identity_ports::IdentityProvider;
use crate::notify_ports::CallbackNotifier;
use crate::store_ports::{RequestRepository, StatusUpdate};
use crate::workflow_ports::{GrantExecution, WorkflowRepository};

/// Tries allowed for the grant and revoke steps before branching to the
/// error handler.
const MAX_STEP_ATTEMPTS: i32 = 3;
/// Base retry delay, doubled on each further try.
const STEP_RETRY_BASE_SECONDS: i64 = 5;
/// Actor label for workflow-driven transitions.
const WORKFLOW_ACTOR: &str = "system";

/// Executes the durable grant→wait→revoke workflow, one step per claim.
///
/// One execution exists per approved request; each step either advances the
/// execution, re-queues itself with backoff, or terminates it through a
/// compensation step.
#[derive(Clone)]
pub struct WorkflowService {
    requests: Arc<dyn RequestRepository>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn CallbackNotifier>,
    workflows: Arc<dyn WorkflowRepository>,
    audit: AuditService,
}

impl WorkflowService {
    /// Creates a workflow service.
    #[must_use]
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn CallbackNotifier>,
        workflows: Arc<dyn WorkflowRepository>,
        audit: AuditService,
    ) -> Self {
        Self {
            requests,
            identity,
            notifier,
            workflows,
            audit,
        }
    }

    /// Claims due executions for one worker and advances each one step.
    ///
    /// A failing execution is logged and left for the next claim cycle; it
    /// never blocks the others.
    pub async fn run_due(
        &self,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<usize> {
        let executions = self
            .workflows
            .claim_due(worker_id, limit, lease_seconds, Utc::now())
            .await?;
        let claimed = executions.len();

        for execution in executions {
            if let Err(error) = self.run_step(&execution).await {
                warn!(
                    request_id = %execution.request_id,
                    step = execution.step.as_str(),
                    error = %error,
                    "workflow step failed"
                );
            }
        }

        Ok(claimed)
    }

    /// Runs exactly one step of one claimed execution.
    pub async fn run_step(&self, execution: &GrantExecution) -> AppResult<()> {
        info!(
            request_id = %execution.request_id,
            step = execution.step.as_str(),
            attempt = execution.attempt,
            "running workflow step"
        );

        match execution.step {
            GrantStep::Validate => self.step_validate(execution).await,
            GrantStep::Grant => self.step_grant(execution).await,
            GrantStep::NotifyGranted => self.step_notify_granted(execution).await,
            GrantStep::Wait => self.step_wait(execution).await,
            GrantStep::Revoke => self.step_revoke(execution).await,
            GrantStep::NotifyRevoked => self.step_notify_revoked(execution).await,
            GrantStep::HandleGrantError => self.step_handle_grant_error(execution).await,
            GrantStep::HandleRevokeError => self.step_handle_revoke_error(execution).await,
        }
    }

    async fn step_validate(&self, execution: &GrantExecution) -> AppResult<()> {
        let Some(request) = self.load_request(execution.request_id).await? else {
            return Ok(());
        };

        if request.status != RequestStatus::Approved {
            // Nothing was granted, and grants are never retried from here.
            warn!(
                request_id = %execution.request_id,
                status = request.status.as_str(),
                "request is no longer APPROVED; abandoning grant workflow"
            );
            return self
                .workflows
                .complete(
                    execution.request_id,
                    Some(&format!(
                        "request is in status {}, expected APPROVED",
                        request.status.as_str()
                    )),
                )
                .await;
        }

        self.workflows
            .advance(execution.request_id, GrantStep::Grant, Utc::now(), None)
            .await
    }

    async fn step_grant(&self, execution: &GrantExecution) -> AppResult<()> {
        let Some(request) = self.load_request(execution.request_id).await? else {
            return Ok(());
        };

        if let Err(error) = self
            .identity
            .grant(
                request.account_id.as_str(),
                request.identity_user_id.as_str(),
            )
            .await
        {
            return self
                .retry_or_branch(execution, GrantStep::HandleGrantError, error)
                .await;
        }

        if let Err(error) = self
            .requests
            .conditional_update_status(
                execution.request_id,
                RequestStatus::Approved,
                StatusUpdate::granted(Utc::now()),
            )
            .await
        {
            // The grant itself is idempotent, so a failed update is retried
            // like any other grant failure.
            return self
                .retry_or_branch(execution, GrantStep::HandleGrantError, error)
                .await;
        }

        info!(
            request_id = %execution.request_id,
            account_id = request.account_id.as_str(),
            requester = request.requester_email.as_str(),
            "access granted"
        );
        self.record_audit(
            &request,
            AuditEventType::Granted,
            BTreeMap::new(),
        )
        .await;

        self.workflows
            .advance(
                execution.request_id,
                GrantStep::NotifyGranted,
                Utc::now(),
                None,
            )
            .await
    }

    async fn step_notify_granted(&self, execution: &GrantExecution) -> AppResult<()> {
        let Some(request) = self.load_request(execution.request_id).await? else {
            return Ok(());
        };

        self.notify(
            &request,
            RequestStatus::Granted,
            Some(BTreeMap::from([
                (
                    "requester_email".to_owned(),
                    request.requester_email.clone(),
                ),
                (
                    "duration_minutes".to_owned(),
                    request.requested_duration_minutes.to_string(),
                ),
            ])),
        )
        .await;

        let wake_at =
            Utc::now() + Duration::minutes(i64::from(request.requested_duration_minutes));
        self.workflows
            .advance(execution.request_id, GrantStep::Wait, wake_at, None)
            .await
    }

    async fn step_wait(&self, execution: &GrantExecution) -> AppResult<()> {
        // Claimed only after wake_at passed; the durable wait is over.
        self.workflows
            .advance(execution.request_id, GrantStep::Revoke, Utc::now(), None)
            .await
    }

    async fn step_revoke(&self, execution: &GrantExecution) -> AppResult<()> {
        let Some(request) = self.load_request(execution.request_id).await? else {
            return Ok(());
        };

        if matches!(
            request.status,
            RequestStatus::Revoked | RequestStatus::Expired
        ) {
            info!(
                request_id = %execution.request_id,
                status = request.status.as_str(),
                "request already revoked or expired, skipping revoke"
            );
            return self
                .workflows
                .advance(
                    execution.request_id,
                    GrantStep::NotifyRevoked,
                    Utc::now(),
                    None,
                )
                .await;
        }

        if let Err(error) = self
            .identity
            .revoke(
                request.account_id.as_str(),
                request.identity_user_id.as_str(),
            )
            .await
        {
            return self
                .retry_or_branch(execution, GrantStep::HandleRevokeError, error)
                .await;
        }

        match self
            .requests
            .conditional_update_status(
                execution.request_id,
                RequestStatus::Granted,
                StatusUpdate::expired(Utc::now()),
            )
            .await
        {
            Ok(()) => {
                info!(
                    request_id = %execution.request_id,
                    account_id = request.account_id.as_str(),
                    "access expired"
                );
                self.record_audit(&request, AuditEventType::Expired, BTreeMap::new())
                    .await;
            }
            Err(error) if error.is_conflict() => {
                // Manual revoke won the race; its transition and audit stand.
                warn!(
                    request_id = %execution.request_id,
                    "conditional update to EXPIRED conflicted, likely revoked already"
                );
            }
            Err(error) => return Err(error),
        }

        self.workflows
            .advance(
                execution.request_id,
                GrantStep::NotifyRevoked,
                Utc::now(),
                None,
            )
            .await
    }

    async fn step_notify_revoked(&self, execution: &GrantExecution) -> AppResult<()> {
        let Some(request) = self.load_request(execution.request_id).await? else {
            return Ok(());
        };

        // Whichever terminal status the store shows is what the plugin sees.
        self.notify(&request, request.status, None).await;
        self.workflows.complete(execution.request_id, None).await
    }

    async fn step_handle_grant_error(&self, execution: &GrantExecution) -> AppResult<()> {
        let Some(request) = self.load_request(execution.request_id).await? else {
            return Ok(());
        };

        let detail = execution
            .last_error
            .clone()
            .unwrap_or_else(|| "grant step failed".to_owned());

        // The grant may or may not have updated the status before failing, so
        // try APPROVED first, then GRANTED.
        let update = StatusUpdate::errored(detail.clone());
        if let Err(error) = self
            .requests
            .conditional_update_status(
                execution.request_id,
                RequestStatus::Approved,
                update.clone(),
            )
            .await
        {
            if !error.is_conflict() {
                return Err(error);
            }
            if let Err(error) = self
                .requests
                .conditional_update_status(execution.request_id, RequestStatus::Granted, update)
                .await
            {
                if !error.is_conflict() {
                    return Err(error);
                }
                warn!(
                    request_id = %execution.request_id,
                    "request left its active states before the ERROR transition"
                );
            }
        }

        let details = BTreeMap::from([
            ("error".to_owned(), detail.clone()),
            ("phase".to_owned(), "grant".to_owned()),
        ]);
        self.record_audit(&request, AuditEventType::Error, details.clone())
            .await;
        self.notify(&request, RequestStatus::Error, Some(details))
            .await;

        warn!(
            request_id = %execution.request_id,
            error_detail = detail.as_str(),
            "grant error handled"
        );
        self.workflows
            .complete(execution.request_id, Some(detail.as_str()))
            .await
    }

    async fn step_handle_revoke_error(&self, execution: &GrantExecution) -> AppResult<()> {
        let Some(request) = self.load_request(execution.request_id).await? else {
            return Ok(());
        };

        let detail = execution
            .last_error
            .clone()
            .unwrap_or_else(|| "revoke step failed".to_owned());

        if let Err(error) = self
            .requests
            .conditional_update_status(
                execution.request_id,
                RequestStatus::Granted,
                StatusUpdate::errored(detail.clone()),
            )
            .await
        {
            if !error.is_conflict() {
                return Err(error);
            }
            warn!(
                request_id = %execution.request_id,
                "request left GRANTED before the ERROR transition"
            );
        }

        let details = BTreeMap::from([
            ("error".to_owned(), detail.clone()),
            ("phase".to_owned(), "revoke".to_owned()),
        ]);
        self.record_audit(&request, AuditEventType::Error, details.clone())
            .await;
        // The reconciler keeps retrying the revoke from ERROR reporting.
        self.notify(&request, RequestStatus::Error, Some(details))
            .await;

        warn!(
            request_id = %execution.request_id,
            error_detail = detail.as_str(),
            "revoke error handled"
        );
        self.workflows
            .complete(execution.request_id, Some(detail.as_str()))
            .await
    }

    /// Re-queues a failed step with exponential backoff, or branches to the
    /// compensation step once the attempt budget is spent.
    async fn retry_or_branch(
        &self,
        execution: &GrantExecution,
        error_step: GrantStep,
        error: AppError,
    ) -> AppResult<()> {
        let attempt = execution.attempt + 1;
        if attempt >= MAX_STEP_ATTEMPTS {
            warn!(
                request_id = %execution.request_id,
                step = execution.step.as_str(),
                attempts = attempt,
                error = %error,
                "step attempts exhausted, branching to error handler"
            );
            return self
                .workflows
                .advance(
                    execution.request_id,
                    error_step,
                    Utc::now(),
                    Some(error.to_string().as_str()),
                )
                .await;
        }

        let delay_seconds = STEP_RETRY_BASE_SECONDS << (attempt - 1);
        warn!(
            request_id = %execution.request_id,
            step = execution.step.as_str(),
            attempt,
            delay_seconds,
            error = %error,
            "step failed, retrying with backoff"
        );
        self.workflows
            .reschedule(
                execution.request_id,
                attempt,
                Utc::now() + Duration::seconds(delay_seconds),
                error.to_string().as_str(),
            )
            .await
    }

    async fn load_request(&self, request_id: Uuid) -> AppResult<Option<AccessRequest>> {
        match self.requests.find(request_id).await? {
            Some(request) => Ok(Some(request)),
            None => {
                warn!(request_id = %request_id, "request not found, terminating workflow");
                self.workflows
                    .complete(request_id, Some("request not found"))
                    .await?;
                Ok(None)
            }
        }
    }

    async fn record_audit(
        &self,
        request: &AccessRequest,
        event_type: AuditEventType,
        details: BTreeMap<String, String>,
    ) {
        if let Err(error) = self
            .audit
            .record(
                request.request_id,
                event_type,
                request.account_id.as_str(),
                request.channel_id.as_str(),
                AuditActor::System(WORKFLOW_ACTOR),
                details,
            )
            .await
        {
            warn!(
                request_id = %request.request_id,
                event_type = event_type.as_str(),
                error = %error,
                "failed to write audit event"
            );
        }
    }

    async fn notify(
        &self,
        request: &AccessRequest,
        status: RequestStatus,
        details: Option<BTreeMap<String, String>>,
    ) {
        let payload = CallbackPayload {
            request_id: request.request_id,
            status,
            account_id: request.account_id.clone(),
            channel_id: request.channel_id.clone(),
            actor: WORKFLOW_ACTOR.to_owned(),
            details,
        };
        if let Err(error) = self.notifier.notify(&payload).await {
            warn!(
                request_id = %request.request_id,
                status = status.as_str(),
                error = %error,
                "callback delivery failed"
            );
        }
    }
}
