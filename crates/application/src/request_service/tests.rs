use std::sync::atomic::Ordering;

use chrono::Utc;
use jitgate_core::{Actor, AppError};
use jitgate_domain::{AccessRequest, AuditEventType, NewAccessRequest, RequestStatus};

use super::{
    ApproveRequestInput, CreateRequestInput, DenyRequestInput, RequestService,
    RevokeRequestInput,
};
use crate::AuditService;
use crate::store_ports::RequestQuery;
use crate::test_support::{ServiceHarness, binding};
use crate::workflow_ports::WorkflowRepository;

fn service(harness: &ServiceHarness) -> RequestService {
    RequestService::new(
        harness.requests.clone(),
        harness.bindings.clone(),
        harness.identity.clone(),
        harness.workflows.clone(),
        harness.notifier.clone(),
        AuditService::new(harness.audit.clone()),
    )
}

fn create_input() -> CreateRequestInput {
    CreateRequestInput {
        account_id: "123456789012".to_owned(),
        channel_id: "ch1".to_owned(),
        requester_chat_id: "u_r".to_owned(),
        requester_email: "r@example.com".to_owned(),
        ticket_ref: Some("OPS-42".to_owned()),
        reason: None,
        requested_duration_minutes: 60,
    }
}

fn seeded_request(status: RequestStatus) -> AccessRequest {
    let mut request = AccessRequest::new(NewAccessRequest {
        account_id: "123456789012".to_owned(),
        channel_id: "ch1".to_owned(),
        requester_chat_id: "u_r".to_owned(),
        requester_email: "r@example.com".to_owned(),
        ticket_ref: Some("OPS-42".to_owned()),
        reason: None,
        requested_duration_minutes: 60,
        identity_user_id: "idp-r@example.com".to_owned(),
    })
    .expect("valid request");
    request.status = status;
    if status == RequestStatus::Granted {
        request.grant_time = Some(Utc::now());
    }
    request
}

#[tokio::test]
async fn create_persists_a_pending_request_and_audits_it() {
    let harness = ServiceHarness::new();
    harness
        .bindings
        .seed(binding("ch1", "123456789012", &["u_a"], false, 4))
        .await;

    let request = service(&harness).create(create_input()).await.unwrap();

    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.identity_user_id, "idp-r@example.com");
    assert_eq!(
        harness.audit.event_types_for(request.request_id).await,
        [AuditEventType::Requested]
    );
}

#[tokio::test]
async fn create_fails_without_a_binding() {
    let harness = ServiceHarness::new();
    let result = service(&harness).create(create_input()).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn create_rejects_duration_over_the_binding_limit() {
    let harness = ServiceHarness::new();
    harness
        .bindings
        .seed(binding("ch1", "123456789012", &["u_a"], false, 1))
        .await;

    let mut input = create_input();
    input.requested_duration_minutes = 120;
    let result = service(&harness).create(input).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(harness.requests.requests.lock().await.is_empty());
}

#[tokio::test]
async fn create_fails_when_the_requester_cannot_be_resolved() {
    let harness = ServiceHarness::new();
    harness
        .bindings
        .seed(binding("ch1", "123456789012", &["u_a"], false, 4))
        .await;
    harness.identity.fail_lookup.store(true, Ordering::SeqCst);

    let result = service(&harness).create(create_input()).await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert!(harness.requests.requests.lock().await.is_empty());
}

#[tokio::test]
async fn create_requires_a_justification() {
    let harness = ServiceHarness::new();
    harness
        .bindings
        .seed(binding("ch1", "123456789012", &["u_a"], false, 4))
        .await;

    let mut input = create_input();
    input.ticket_ref = None;
    input.reason = None;
    let result = service(&harness).create(input).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn approve_transitions_to_approved_and_starts_the_workflow() {
    let harness = ServiceHarness::new();
    harness
        .bindings
        .seed(binding("ch1", "123456789012", &["u_a"], false, 4))
        .await;
    let request = seeded_request(RequestStatus::Pending);
    let request_id = request.request_id;
    harness.requests.seed(request).await;

    let approved = service(&harness)
        .approve(ApproveRequestInput {
            request_id,
            approver: Actor::new("u_a", "a@example.com"),
        })
        .await
        .unwrap();

    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.approver_chat_id.as_deref(), Some("u_a"));
    assert_eq!(
        harness.audit.event_types_for(request_id).await,
        [AuditEventType::Approved]
    );
    assert!(
        harness
            .workflows
            .executions
            .lock()
            .await
            .contains_key(&request_id)
    );
}

#[tokio::test]
async fn approve_rejects_a_non_approver() {
    let harness = ServiceHarness::new();
    harness
        .bindings
        .seed(binding("ch1", "123456789012", &["u_a"], false, 4))
        .await;
    let request = seeded_request(RequestStatus::Pending);
    let request_id = request.request_id;
    harness.requests.seed(request).await;

    let result = service(&harness)
        .approve(ApproveRequestInput {
            request_id,
            approver: Actor::new("u_b", "b@example.com"),
        })
        .await;

    assert!(matches!(result, Err(AppError::Forbidden(_))));
    assert_eq!(
        harness.requests.status_of(request_id).await,
        RequestStatus::Pending
    );
    assert!(harness.audit.event_types_for(request_id).await.is_empty());
}

#[tokio::test]
async fn self_approval_is_blocked_unless_the_binding_allows_it() {
    let harness = ServiceHarness::new();
    harness
        .bindings
        .seed(binding("ch1", "123456789012", &["u_r", "u_a"], false, 4))
        .await;
    let request = seeded_request(RequestStatus::Pending);
    let request_id = request.request_id;
    harness.requests.seed(request).await;

    let blocked = service(&harness)
        .approve(ApproveRequestInput {
            request_id,
            approver: Actor::new("u_r", "r@example.com"),
        })
        .await;
    assert!(matches!(blocked, Err(AppError::Forbidden(_))));
    assert_eq!(
        harness.requests.status_of(request_id).await,
        RequestStatus::Pending
    );

    harness
        .bindings
        .seed(binding("ch1", "123456789012", &["u_r", "u_a"], true, 4))
        .await;
    let approved = service(&harness)
        .approve(ApproveRequestInput {
            request_id,
            approver: Actor::new("u_r", "r@example.com"),
        })
        .await
        .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
}

#[tokio::test]
async fn approve_rejects_a_request_that_is_not_pending() {
    let harness = ServiceHarness::new();
    harness
        .bindings
        .seed(binding("ch1", "123456789012", &["u_a"], false, 4))
        .await;
    let request = seeded_request(RequestStatus::Granted);
    let request_id = request.request_id;
    harness.requests.seed(request).await;

    let result = service(&harness)
        .approve(ApproveRequestInput {
            request_id,
            approver: Actor::new("u_a", "a@example.com"),
        })
        .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn approve_fails_when_the_binding_was_deleted_mid_flight() {
    let harness = ServiceHarness::new();
    let request = seeded_request(RequestStatus::Pending);
    let request_id = request.request_id;
    harness.requests.seed(request).await;

    let result = service(&harness)
        .approve(ApproveRequestInput {
            request_id,
            approver: Actor::new("u_a", "a@example.com"),
        })
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn approve_survives_a_workflow_that_already_exists() {
    let harness = ServiceHarness::new();
    harness
        .bindings
        .seed(binding("ch1", "123456789012", &["u_a"], false, 4))
        .await;
    let request = seeded_request(RequestStatus::Pending);
    let request_id = request.request_id;
    harness.requests.seed(request).await;
    harness.workflows.start(request_id, Utc::now()).await.unwrap();

    let approved = service(&harness)
        .approve(ApproveRequestInput {
            request_id,
            approver: Actor::new("u_a", "a@example.com"),
        })
        .await
        .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
}

#[tokio::test]
async fn deny_transitions_to_denied_without_a_callback() {
    let harness = ServiceHarness::new();
    harness
        .bindings
        .seed(binding("ch1", "123456789012", &["u_a"], false, 4))
        .await;
    let request = seeded_request(RequestStatus::Pending);
    let request_id = request.request_id;
    harness.requests.seed(request).await;

    let denied = service(&harness)
        .deny(DenyRequestInput {
            request_id,
            denier: Actor::new("u_a", "a@example.com"),
            reason: Some("not justified".to_owned()),
        })
        .await
        .unwrap();

    assert_eq!(denied.status, RequestStatus::Denied);
    assert_eq!(
        harness.audit.event_types_for(request_id).await,
        [AuditEventType::Denied]
    );
    assert!(harness.notifier.deliveries.lock().await.is_empty());
}

#[tokio::test]
async fn deny_has_no_self_approval_carve_out() {
    let harness = ServiceHarness::new();
    harness
        .bindings
        .seed(binding("ch1", "123456789012", &["u_r"], false, 4))
        .await;
    let request = seeded_request(RequestStatus::Pending);
    let request_id = request.request_id;
    harness.requests.seed(request).await;

    let denied = service(&harness)
        .deny(DenyRequestInput {
            request_id,
            denier: Actor::new("u_r", "r@example.com"),
            reason: None,
        })
        .await
        .unwrap();
    assert_eq!(denied.status, RequestStatus::Denied);
}

#[tokio::test]
async fn revoke_removes_access_and_sends_a_signed_callback() {
    let harness = ServiceHarness::new();
    let request = seeded_request(RequestStatus::Granted);
    let request_id = request.request_id;
    harness.requests.seed(request).await;

    let revoked = service(&harness)
        .revoke(RevokeRequestInput {
            request_id,
            actor: Actor::new("u_a", "a@example.com"),
        })
        .await
        .unwrap();

    assert_eq!(revoked.status, RequestStatus::Revoked);
    assert_eq!(harness.identity.revoke_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        harness.audit.event_types_for(request_id).await,
        [AuditEventType::Revoked]
    );
    let deliveries = harness.notifier.deliveries.lock().await;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, RequestStatus::Revoked);
    assert_eq!(deliveries[0].actor, "a@example.com");
}

#[tokio::test]
async fn revoke_on_a_terminal_request_is_idempotent_success() {
    let harness = ServiceHarness::new();
    let request = seeded_request(RequestStatus::Expired);
    let request_id = request.request_id;
    harness.requests.seed(request).await;

    let result = service(&harness)
        .revoke(RevokeRequestInput {
            request_id,
            actor: Actor::new("u_a", "a@example.com"),
        })
        .await
        .unwrap();

    assert_eq!(result.status, RequestStatus::Expired);
    assert_eq!(harness.identity.revoke_calls.load(Ordering::SeqCst), 0);
    assert!(harness.audit.event_types_for(request_id).await.is_empty());
}

#[tokio::test]
async fn revoke_identity_failure_moves_the_request_to_error() {
    let harness = ServiceHarness::new();
    harness.identity.fail_revoke.store(true, Ordering::SeqCst);
    let request = seeded_request(RequestStatus::Granted);
    let request_id = request.request_id;
    harness.requests.seed(request).await;

    let result = service(&harness)
        .revoke(RevokeRequestInput {
            request_id,
            actor: Actor::new("u_a", "a@example.com"),
        })
        .await;

    assert!(matches!(result, Err(AppError::Identity(_))));
    assert_eq!(
        harness.requests.status_of(request_id).await,
        RequestStatus::Error
    );
    assert_eq!(
        harness.audit.event_types_for(request_id).await,
        [AuditEventType::Error]
    );
}

#[tokio::test]
async fn revoke_rejects_a_request_that_was_never_granted() {
    let harness = ServiceHarness::new();
    let request = seeded_request(RequestStatus::Pending);
    let request_id = request.request_id;
    harness.requests.seed(request).await;

    let result = service(&harness)
        .revoke(RevokeRequestInput {
            request_id,
            actor: Actor::new("u_a", "a@example.com"),
        })
        .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn list_requires_at_least_one_filter() {
    let harness = ServiceHarness::new();
    let result = service(&harness).list(RequestQuery::default()).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn list_filters_and_echoes_the_applied_filters() {
    let harness = ServiceHarness::new();
    harness.requests.seed(seeded_request(RequestStatus::Pending)).await;
    harness.requests.seed(seeded_request(RequestStatus::Granted)).await;

    let listing = service(&harness)
        .list(RequestQuery {
            status: Some(RequestStatus::Granted),
            ..RequestQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(listing.items.len(), 1);
    assert_eq!(listing.items[0].status, RequestStatus::Granted);
    assert_eq!(listing.filters.get("status").map(String::as_str), Some("GRANTED"));
}
