use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use jitgate_core::{Actor, AppError, AppResult};
use jitgate_domain::{
    AccessRequest, AuditEventType, CallbackPayload, ChannelBinding, NewAccessRequest,
    RequestStatus,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit_service::{AuditActor, AuditService};
use crate::identity_ports::IdentityProvider;
use crate::notify_ports::CallbackNotifier;
use crate::store_ports::{
    BindingRepository, RequestQuery, RequestRepository, StatusUpdate,
};
use crate::workflow_ports::WorkflowRepository;

/// Page size applied when a reporting query does not name one.
const DEFAULT_QUERY_LIMIT: usize = 50;
/// Hard page-size ceiling for reporting queries.
const MAX_QUERY_LIMIT: usize = 200;

/// Payload for creating an access request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequestInput {
    /// Target cloud account.
    pub account_id: String,
    /// Originating chat channel.
    pub channel_id: String,
    /// Requester chat user id.
    pub requester_chat_id: String,
    /// Requester email.
    pub requester_email: String,
    /// Optional ticket reference.
    pub ticket_ref: Option<String>,
    /// Optional free-text reason.
    pub reason: Option<String>,
    /// Requested duration in minutes.
    pub requested_duration_minutes: i32,
}

/// Payload for approving a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApproveRequestInput {
    /// Request to approve.
    pub request_id: Uuid,
    /// Acting approver.
    pub approver: Actor,
}

/// Payload for denying a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyRequestInput {
    /// Request to deny.
    pub request_id: Uuid,
    /// Acting denier.
    pub denier: Actor,
    /// Optional denial reason.
    pub reason: Option<String>,
}

/// Payload for manually revoking a granted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeRequestInput {
    /// Request to revoke.
    pub request_id: Uuid,
    /// Acting revoker.
    pub actor: Actor,
}

/// One reporting page together with the filters that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestListing {
    /// Requests in reverse creation order.
    pub items: Vec<AccessRequest>,
    /// Token resuming after the last item, when more rows exist.
    pub next_token: Option<String>,
    /// Echo of the applied filters.
    pub filters: BTreeMap<String, String>,
}

/// Enforces the request lifecycle state machine and its authorization rules.
///
/// Every transition goes through the store's conditional status update; the
/// expected-status guard is the only concurrency control.
#[derive(Clone)]
pub struct RequestService {
    requests: Arc<dyn RequestRepository>,
    bindings: Arc<dyn BindingRepository>,
    identity: Arc<dyn IdentityProvider>,
    workflows: Arc<dyn WorkflowRepository>,
    notifier: Arc<dyn CallbackNotifier>,
    audit: AuditService,
}

impl RequestService {
    /// Creates a request service.
    #[must_use]
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        bindings: Arc<dyn BindingRepository>,
        identity: Arc<dyn IdentityProvider>,
        workflows: Arc<dyn WorkflowRepository>,
        notifier: Arc<dyn CallbackNotifier>,
        audit: AuditService,
    ) -> Self {
        Self {
            requests,
            bindings,
            identity,
            workflows,
            notifier,
            audit,
        }
    }

    /// Creates a PENDING request after validating the binding and duration.
    ///
    /// The identity user is resolved exactly once here; creation fails when
    /// the requester cannot be resolved at the provider.
    pub async fn create(&self, input: CreateRequestInput) -> AppResult<AccessRequest> {
        let CreateRequestInput {
            account_id,
            channel_id,
            requester_chat_id,
            requester_email,
            ticket_ref,
            reason,
            requested_duration_minutes,
        } = input;

        if account_id.trim().is_empty() || channel_id.trim().is_empty() {
            return Err(AppError::Validation(
                "account_id and channel_id are required".to_owned(),
            ));
        }
        if requester_chat_id.trim().is_empty() || requester_email.trim().is_empty() {
            return Err(AppError::Validation(
                "requester_chat_id and requester_email are required".to_owned(),
            ));
        }

        let binding = self
            .bindings
            .find(channel_id.as_str(), account_id.as_str())
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no binding found for channel {channel_id} and account {account_id}"
                ))
            })?;

        if requested_duration_minutes > binding.max_duration_minutes() {
            return Err(AppError::Validation(format!(
                "requested duration {requested_duration_minutes} minutes exceeds maximum {} minutes",
                binding.max_duration_minutes()
            )));
        }

        let identity_user_id = self.identity.lookup_user(requester_email.as_str()).await?;

        let request = AccessRequest::new(NewAccessRequest {
            account_id,
            channel_id,
            requester_chat_id,
            requester_email,
            ticket_ref,
            reason,
            requested_duration_minutes,
            identity_user_id,
        })?;

        self.requests.create(&request).await?;

        info!(
            request_id = %request.request_id,
            account_id = request.account_id.as_str(),
            requester = request.requester_email.as_str(),
            "request created"
        );

        let mut details = BTreeMap::from([(
            "requested_duration_minutes".to_owned(),
            request.requested_duration_minutes.to_string(),
        )]);
        if let Some(ticket_ref) = request.ticket_ref.as_deref() {
            details.insert("ticket_ref".to_owned(), ticket_ref.to_owned());
        }
        if let Some(reason) = request.reason.as_deref() {
            details.insert("reason".to_owned(), reason.to_owned());
        }
        let requester = Actor::new(
            request.requester_chat_id.as_str(),
            request.requester_email.as_str(),
        );
        self.record_audit(&request, AuditEventType::Requested, AuditActor::User(&requester), details)
            .await;

        Ok(request)
    }

    /// Approves a PENDING request and hands it to the grant workflow.
    ///
    /// A workflow start failure is logged but does not fail the approval; the
    /// reconciler is the safety net for grants that never start.
    pub async fn approve(&self, input: ApproveRequestInput) -> AppResult<AccessRequest> {
        let ApproveRequestInput {
            request_id,
            approver,
        } = input;

        let request = self.get(request_id).await?;
        if request.status != RequestStatus::Pending {
            return Err(AppError::Conflict(format!(
                "request {request_id} is in status {}, expected PENDING",
                request.status.as_str()
            )));
        }

        let binding = self.authorize_decision(&request, &approver).await?;
        if !binding.allow_self_approval() && approver.chat_user_id() == request.requester_chat_id {
            return Err(AppError::Forbidden(
                "self-approval is not allowed".to_owned(),
            ));
        }

        self.requests
            .conditional_update_status(
                request_id,
                RequestStatus::Pending,
                StatusUpdate::approved(Utc::now(), approver.chat_user_id(), approver.email()),
            )
            .await?;

        info!(
            request_id = %request_id,
            approver = approver.email(),
            "request approved"
        );

        self.record_audit(
            &request,
            AuditEventType::Approved,
            AuditActor::User(&approver),
            BTreeMap::new(),
        )
        .await;

        match self.workflows.start(request_id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(request_id = %request_id, "grant workflow already exists for request");
            }
            Err(error) => {
                warn!(
                    request_id = %request_id,
                    error = %error,
                    "failed to start grant workflow; reconciler will converge"
                );
            }
        }

        self.get(request_id).await
    }

    /// Denies a PENDING request. No callback is sent; the plugin updates its
    /// card in place when the deny dialog completes.
    pub async fn deny(&self, input: DenyRequestInput) -> AppResult<AccessRequest> {
        let DenyRequestInput {
            request_id,
            denier,
            reason,
        } = input;

        let request = self.get(request_id).await?;
        if request.status != RequestStatus::Pending {
            return Err(AppError::Conflict(format!(
                "request {request_id} is in status {}, expected PENDING",
                request.status.as_str()
            )));
        }

        self.authorize_decision(&request, &denier).await?;

        self.requests
            .conditional_update_status(
                request_id,
                RequestStatus::Pending,
                StatusUpdate::denied(Utc::now(), denier.chat_user_id(), denier.email()),
            )
            .await?;

        info!(
            request_id = %request_id,
            denier = denier.email(),
            "request denied"
        );

        let mut details = BTreeMap::new();
        if let Some(reason) = reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            details.insert("reason".to_owned(), reason.to_owned());
        }
        self.record_audit(
            &request,
            AuditEventType::Denied,
            AuditActor::User(&denier),
            details,
        )
        .await;

        self.get(request_id).await
    }

    /// Manually revokes a GRANTED request.
    ///
    /// A request already in REVOKED or EXPIRED is success without a second
    /// audit event. Identity failure moves the request to ERROR and the
    /// failure is returned to the caller.
    pub async fn revoke(&self, input: RevokeRequestInput) -> AppResult<AccessRequest> {
        let RevokeRequestInput { request_id, actor } = input;

        let request = self.get(request_id).await?;
        match request.status {
            RequestStatus::Revoked | RequestStatus::Expired => return Ok(request),
            RequestStatus::Granted => {}
            status => {
                return Err(AppError::Conflict(format!(
                    "request {request_id} is in status {}, expected GRANTED",
                    status.as_str()
                )));
            }
        }

        if let Err(error) = self
            .identity
            .revoke(
                request.account_id.as_str(),
                request.identity_user_id.as_str(),
            )
            .await
        {
            warn!(
                request_id = %request_id,
                error = %error,
                "failed to revoke access"
            );
            let errored = self
                .requests
                .conditional_update_status(
                    request_id,
                    RequestStatus::Granted,
                    StatusUpdate::errored(error.to_string()),
                )
                .await;
            if errored.is_ok() {
                self.record_audit(
                    &request,
                    AuditEventType::Error,
                    AuditActor::User(&actor),
                    BTreeMap::from([("error".to_owned(), error.to_string())]),
                )
                .await;
            }
            return Err(error);
        }

        let updated = self
            .requests
            .conditional_update_status(
                request_id,
                RequestStatus::Granted,
                StatusUpdate::revoked(Utc::now()),
            )
            .await;
        if let Err(error) = updated {
            if error.is_conflict() {
                // The scheduled expiry won the race; its transition and audit
                // stand, and the access is gone either way.
                return self.get(request_id).await;
            }
            return Err(error);
        }

        info!(
            request_id = %request_id,
            actor = actor.email(),
            "request revoked"
        );

        self.record_audit(
            &request,
            AuditEventType::Revoked,
            AuditActor::User(&actor),
            BTreeMap::new(),
        )
        .await;

        let payload = CallbackPayload {
            request_id,
            status: RequestStatus::Revoked,
            account_id: request.account_id.clone(),
            channel_id: request.channel_id.clone(),
            actor: actor.email().to_owned(),
            details: None,
        };
        if let Err(error) = self.notifier.notify(&payload).await {
            warn!(
                request_id = %request_id,
                error = %error,
                "revoke callback delivery failed"
            );
        }

        self.get(request_id).await
    }

    /// Returns one request by id.
    pub async fn get(&self, request_id: Uuid) -> AppResult<AccessRequest> {
        self.requests
            .find(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("request {request_id} not found")))
    }

    /// Runs one reporting query page.
    ///
    /// At least one of channel, account, requester email, or status is
    /// required; unfiltered enumeration is rejected.
    pub async fn list(&self, mut query: RequestQuery) -> AppResult<RequestListing> {
        if !query.has_filter() {
            return Err(AppError::Validation(
                "at least one filter is required (channel_id, account_id, requester_email, or status)"
                    .to_owned(),
            ));
        }

        if query.limit == 0 {
            query.limit = DEFAULT_QUERY_LIMIT;
        }
        query.limit = query.limit.min(MAX_QUERY_LIMIT);

        let page = self.requests.query(&query).await?;

        let mut filters = BTreeMap::new();
        if let Some(channel_id) = query.channel_id.as_deref() {
            filters.insert("channel_id".to_owned(), channel_id.to_owned());
        }
        if let Some(account_id) = query.account_id.as_deref() {
            filters.insert("account_id".to_owned(), account_id.to_owned());
        }
        if let Some(requester_email) = query.requester_email.as_deref() {
            filters.insert("requester_email".to_owned(), requester_email.to_owned());
        }
        if let Some(status) = query.status {
            filters.insert("status".to_owned(), status.as_str().to_owned());
        }
        if let Some(start_date) = query.start_date {
            filters.insert("start_date".to_owned(), start_date.to_rfc3339());
        }
        if let Some(end_date) = query.end_date {
            filters.insert("end_date".to_owned(), end_date.to_rfc3339());
        }

        Ok(RequestListing {
            items: page.items,
            next_token: page.next_token,
            filters,
        })
    }

    /// Checks the actor against the binding as it exists right now.
    ///
    /// Membership is evaluated at transition time, not creation time, and a
    /// binding deleted mid-flight fails the decision.
    async fn authorize_decision(
        &self,
        request: &AccessRequest,
        actor: &Actor,
    ) -> AppResult<ChannelBinding> {
        let binding = self
            .bindings
            .find(request.channel_id.as_str(), request.account_id.as_str())
            .await?
            .ok_or_else(|| {
                AppError::Forbidden(format!(
                    "binding for channel {} and account {} no longer exists",
                    request.channel_id, request.account_id
                ))
            })?;

        if !binding.is_approver(actor.chat_user_id()) {
            return Err(AppError::Forbidden(format!(
                "user {} is not an authorized approver",
                actor.chat_user_id()
            )));
        }

        Ok(binding)
    }

    async fn record_audit(
        &self,
        request: &AccessRequest,
        event_type: AuditEventType,
        actor: AuditActor<'_>,
        details: BTreeMap<String, String>,
    ) {
        if let Err(error) = self
            .audit
            .record(
                request.request_id,
                event_type,
                request.account_id.as_str(),
                request.channel_id.as_str(),
                actor,
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
}

#[cfg(test)]
mod tests;
