//! In-memory fakes shared by the service tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jitgate_core::{AppError, AppResult};
use jitgate_domain::{
    AccessRequest, AuditEvent, AuditEventType, CallbackPayload, ChannelBinding,
    ChannelBindingInput, GrantStep, RequestStatus,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store_ports::{
    AuditRepository, BindingRepository, NonceRepository, RequestPage, RequestQuery,
    RequestRepository, StatusUpdate,
};
use crate::workflow_ports::{GrantExecution, WorkflowRepository};
use crate::{CallbackNotifier, IdentityProvider};

pub(crate) fn binding(
    channel_id: &str,
    account_id: &str,
    approvers: &[&str],
    allow_self_approval: bool,
    max_request_hours: i32,
) -> ChannelBinding {
    ChannelBinding::new(ChannelBindingInput {
        channel_id: channel_id.to_owned(),
        account_id: account_id.to_owned(),
        approver_chat_ids: approvers.iter().map(|id| (*id).to_owned()).collect(),
        allow_self_approval,
        max_request_hours,
        updated_at: Utc::now(),
    })
    .expect("valid test binding")
}

#[derive(Default)]
pub(crate) struct FakeBindingRepository {
    pub(crate) bindings: Mutex<HashMap<(String, String), ChannelBinding>>,
}

impl FakeBindingRepository {
    pub(crate) async fn seed(&self, binding: ChannelBinding) {
        self.bindings.lock().await.insert(
            (
                binding.channel_id().to_owned(),
                binding.account_id().to_owned(),
            ),
            binding,
        );
    }
}

#[async_trait]
impl BindingRepository for FakeBindingRepository {
    async fn save(&self, binding: &ChannelBinding) -> AppResult<()> {
        self.seed(binding.clone()).await;
        Ok(())
    }

    async fn find(&self, channel_id: &str, account_id: &str) -> AppResult<Option<ChannelBinding>> {
        Ok(self
            .bindings
            .lock()
            .await
            .get(&(channel_id.to_owned(), account_id.to_owned()))
            .cloned())
    }

    async fn list_by_channel(&self, channel_id: &str) -> AppResult<Vec<ChannelBinding>> {
        Ok(self
            .bindings
            .lock()
            .await
            .values()
            .filter(|binding| binding.channel_id() == channel_id)
            .cloned()
            .collect())
    }

    async fn find_by_account(&self, account_id: &str) -> AppResult<Option<ChannelBinding>> {
        Ok(self
            .bindings
            .lock()
            .await
            .values()
            .find(|binding| binding.account_id() == account_id)
            .cloned())
    }
}

pub(crate) fn apply_update(request: &mut AccessRequest, update: &StatusUpdate) {
    if let Some(status) = update.status {
        request.status = status;
    }
    if update.approved_at.is_some() {
        request.approved_at = update.approved_at;
    }
    if update.denied_at.is_some() {
        request.denied_at = update.denied_at;
    }
    if update.grant_time.is_some() {
        request.grant_time = update.grant_time;
    }
    if update.revoked_at.is_some() {
        request.revoked_at = update.revoked_at;
    }
    if update.expired_at.is_some() {
        request.expired_at = update.expired_at;
    }
    if update.approver_chat_id.is_some() {
        request.approver_chat_id = update.approver_chat_id.clone();
    }
    if update.approver_email.is_some() {
        request.approver_email = update.approver_email.clone();
    }
    if update.error_details.is_some() {
        request.error_details = update.error_details.clone();
    }
}

#[derive(Default)]
pub(crate) struct FakeRequestRepository {
    pub(crate) requests: Mutex<HashMap<Uuid, AccessRequest>>,
}

impl FakeRequestRepository {
    pub(crate) async fn seed(&self, request: AccessRequest) {
        self.requests
            .lock()
            .await
            .insert(request.request_id, request);
    }

    pub(crate) async fn status_of(&self, request_id: Uuid) -> RequestStatus {
        self.requests
            .lock()
            .await
            .get(&request_id)
            .expect("request exists")
            .status
    }
}

#[async_trait]
impl RequestRepository for FakeRequestRepository {
    async fn create(&self, request: &AccessRequest) -> AppResult<()> {
        let mut requests = self.requests.lock().await;
        if requests.contains_key(&request.request_id) {
            return Err(AppError::Conflict(format!(
                "request {} already exists",
                request.request_id
            )));
        }
        requests.insert(request.request_id, request.clone());
        Ok(())
    }

    async fn find(&self, request_id: Uuid) -> AppResult<Option<AccessRequest>> {
        Ok(self.requests.lock().await.get(&request_id).cloned())
    }

    async fn conditional_update_status(
        &self,
        request_id: Uuid,
        expected: RequestStatus,
        update: StatusUpdate,
    ) -> AppResult<()> {
        let mut requests = self.requests.lock().await;
        let request = requests
            .get_mut(&request_id)
            .ok_or_else(|| AppError::NotFound(format!("request {request_id} not found")))?;
        if request.status != expected {
            return Err(AppError::Conflict(format!(
                "request {request_id} is in status {}, expected {}",
                request.status.as_str(),
                expected.as_str()
            )));
        }
        apply_update(request, &update);
        Ok(())
    }

    async fn query(&self, query: &RequestQuery) -> AppResult<RequestPage> {
        let requests = self.requests.lock().await;
        let mut items: Vec<AccessRequest> = requests
            .values()
            .filter(|request| {
                query
                    .channel_id
                    .as_deref()
                    .is_none_or(|channel_id| request.channel_id == channel_id)
                    && query
                        .account_id
                        .as_deref()
                        .is_none_or(|account_id| request.account_id == account_id)
                    && query
                        .requester_email
                        .as_deref()
                        .is_none_or(|email| request.requester_email == email)
                    && query.status.is_none_or(|status| request.status == status)
                    && query.start_date.is_none_or(|start| request.created_at >= start)
                    && query.end_date.is_none_or(|end| request.created_at <= end)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(query.limit);
        Ok(RequestPage {
            items,
            next_token: None,
        })
    }

    async fn list_expired_grants(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<AccessRequest>> {
        let requests = self.requests.lock().await;
        let mut items: Vec<AccessRequest> = requests
            .values()
            .filter(|request| {
                request.status == RequestStatus::Granted && request.end_time <= cutoff
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.end_time.cmp(&b.end_time));
        Ok(items)
    }
}

#[derive(Default)]
pub(crate) struct FakeAuditRepository {
    pub(crate) events: Mutex<Vec<AuditEvent>>,
}

impl FakeAuditRepository {
    pub(crate) async fn event_types_for(&self, request_id: Uuid) -> Vec<AuditEventType> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| event.request_id == request_id)
            .map(|event| event.event_type)
            .collect()
    }
}

#[async_trait]
impl AuditRepository for FakeAuditRepository {
    async fn append(&self, event: &AuditEvent) -> AppResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }

    async fn list_by_request(&self, request_id: Uuid) -> AppResult<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = self
            .events
            .lock()
            .await
            .iter()
            .filter(|event| event.request_id == request_id)
            .cloned()
            .collect();
        events.sort_by_key(AuditEvent::sort_key);
        Ok(events)
    }
}

#[derive(Default)]
pub(crate) struct FakeIdentityProvider {
    pub(crate) fail_lookup: AtomicBool,
    pub(crate) fail_grant: AtomicBool,
    pub(crate) fail_revoke: AtomicBool,
    pub(crate) grant_calls: AtomicUsize,
    pub(crate) revoke_calls: AtomicUsize,
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn lookup_user(&self, email: &str) -> AppResult<String> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(AppError::NotFound(format!(
                "no identity user found for email {email}"
            )));
        }
        Ok(format!("idp-{email}"))
    }

    async fn grant(&self, _account_id: &str, _identity_user_id: &str) -> AppResult<()> {
        self.grant_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_grant.load(Ordering::SeqCst) {
            return Err(AppError::Identity("assignment creation failed".to_owned()));
        }
        Ok(())
    }

    async fn revoke(&self, _account_id: &str, _identity_user_id: &str) -> AppResult<()> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_revoke.load(Ordering::SeqCst) {
            return Err(AppError::Identity("assignment deletion failed".to_owned()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeCallbackNotifier {
    pub(crate) fail: AtomicBool,
    pub(crate) deliveries: Mutex<Vec<CallbackPayload>>,
}

#[async_trait]
impl CallbackNotifier for FakeCallbackNotifier {
    async fn notify(&self, payload: &CallbackPayload) -> AppResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Internal("webhook returned status 500".to_owned()));
        }
        self.deliveries.lock().await.push(payload.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ExecutionRow {
    pub(crate) step: GrantStep,
    pub(crate) attempt: i32,
    pub(crate) wake_at: DateTime<Utc>,
    pub(crate) last_error: Option<String>,
    pub(crate) completed: bool,
    pub(crate) note: Option<String>,
}

#[derive(Default)]
pub(crate) struct FakeWorkflowRepository {
    pub(crate) executions: Mutex<HashMap<Uuid, ExecutionRow>>,
}

impl FakeWorkflowRepository {
    pub(crate) async fn row(&self, request_id: Uuid) -> ExecutionRow {
        self.executions
            .lock()
            .await
            .get(&request_id)
            .expect("execution exists")
            .clone()
    }
}

#[async_trait]
impl WorkflowRepository for FakeWorkflowRepository {
    async fn start(&self, request_id: Uuid, wake_at: DateTime<Utc>) -> AppResult<bool> {
        let mut executions = self.executions.lock().await;
        if executions.contains_key(&request_id) {
            return Ok(false);
        }
        executions.insert(
            request_id,
            ExecutionRow {
                step: GrantStep::Validate,
                attempt: 0,
                wake_at,
                last_error: None,
                completed: false,
                note: None,
            },
        );
        Ok(true)
    }

    async fn claim_due(
        &self,
        _worker_id: &str,
        limit: usize,
        _lease_seconds: u32,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<GrantExecution>> {
        Ok(self
            .executions
            .lock()
            .await
            .iter()
            .filter(|(_, row)| !row.completed && row.wake_at <= now)
            .take(limit)
            .map(|(request_id, row)| GrantExecution {
                request_id: *request_id,
                step: row.step,
                attempt: row.attempt,
                wake_at: row.wake_at,
                last_error: row.last_error.clone(),
            })
            .collect())
    }

    async fn advance(
        &self,
        request_id: Uuid,
        step: GrantStep,
        wake_at: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> AppResult<()> {
        let mut executions = self.executions.lock().await;
        let row = executions
            .get_mut(&request_id)
            .ok_or_else(|| AppError::NotFound(format!("execution {request_id} not found")))?;
        row.step = step;
        row.attempt = 0;
        row.wake_at = wake_at;
        row.last_error = last_error.map(ToOwned::to_owned);
        Ok(())
    }

    async fn reschedule(
        &self,
        request_id: Uuid,
        attempt: i32,
        wake_at: DateTime<Utc>,
        last_error: &str,
    ) -> AppResult<()> {
        let mut executions = self.executions.lock().await;
        let row = executions
            .get_mut(&request_id)
            .ok_or_else(|| AppError::NotFound(format!("execution {request_id} not found")))?;
        row.attempt = attempt;
        row.wake_at = wake_at;
        row.last_error = Some(last_error.to_owned());
        Ok(())
    }

    async fn complete(&self, request_id: Uuid, note: Option<&str>) -> AppResult<()> {
        let mut executions = self.executions.lock().await;
        let row = executions
            .get_mut(&request_id)
            .ok_or_else(|| AppError::NotFound(format!("execution {request_id} not found")))?;
        row.completed = true;
        row.note = note.map(ToOwned::to_owned);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeNonceRepository {
    pub(crate) nonces: Mutex<HashMap<(String, String), i64>>,
}

#[async_trait]
impl NonceRepository for FakeNonceRepository {
    async fn put_once(&self, key_id: &str, nonce: &str, expires_at: i64) -> AppResult<bool> {
        let mut nonces = self.nonces.lock().await;
        let key = (key_id.to_owned(), nonce.to_owned());
        if nonces.contains_key(&key) {
            return Ok(false);
        }
        nonces.insert(key, expires_at);
        Ok(true)
    }

    async fn exists(&self, key_id: &str, nonce: &str) -> AppResult<bool> {
        Ok(self
            .nonces
            .lock()
            .await
            .contains_key(&(key_id.to_owned(), nonce.to_owned())))
    }

    async fn purge_expired(&self, now_epoch_seconds: i64) -> AppResult<u64> {
        let mut nonces = self.nonces.lock().await;
        let before = nonces.len();
        nonces.retain(|_, expires_at| *expires_at > now_epoch_seconds);
        Ok((before - nonces.len()) as u64)
    }
}

pub(crate) struct ServiceHarness {
    pub(crate) requests: Arc<FakeRequestRepository>,
    pub(crate) bindings: Arc<FakeBindingRepository>,
    pub(crate) identity: Arc<FakeIdentityProvider>,
    pub(crate) workflows: Arc<FakeWorkflowRepository>,
    pub(crate) notifier: Arc<FakeCallbackNotifier>,
    pub(crate) audit: Arc<FakeAuditRepository>,
    pub(crate) nonces: Arc<FakeNonceRepository>,
}

impl ServiceHarness {
    pub(crate) fn new() -> Self {
        Self {
            requests: Arc::new(FakeRequestRepository::default()),
            bindings: Arc::new(FakeBindingRepository::default()),
            identity: Arc::new(FakeIdentityProvider::default()),
            workflows: Arc::new(FakeWorkflowRepository::default()),
            notifier: Arc::new(FakeCallbackNotifier::default()),
            audit: Arc::new(FakeAuditRepository::default()),
            nonces: Arc::new(FakeNonceRepository::default()),
        }
    }
}
