use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jitgate_core::AppResult;
use jitgate_domain::{AccessRequest, AuditEvent, ChannelBinding, RequestStatus};
use uuid::Uuid;

/// Field set applied by one conditional status update.
///
/// Only the populated fields are written; everything else keeps its stored
/// value. Constructed through the per-transition helpers so each transition
/// writes exactly the columns it owns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    /// New lifecycle status.
    pub status: Option<RequestStatus>,
    /// Approval timestamp.
    pub approved_at: Option<DateTime<Utc>>,
    /// Denial timestamp.
    pub denied_at: Option<DateTime<Utc>>,
    /// Grant completion timestamp.
    pub grant_time: Option<DateTime<Utc>>,
    /// Manual revocation timestamp.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Automatic expiration timestamp.
    pub expired_at: Option<DateTime<Utc>>,
    /// Approver or denier chat user id.
    pub approver_chat_id: Option<String>,
    /// Approver or denier email.
    pub approver_email: Option<String>,
    /// Terminal failure details.
    pub error_details: Option<String>,
}

impl StatusUpdate {
    /// PENDING→APPROVED field set.
    #[must_use]
    pub fn approved(at: DateTime<Utc>, approver_chat_id: &str, approver_email: &str) -> Self {
        Self {
            status: Some(RequestStatus::Approved),
            approved_at: Some(at),
            approver_chat_id: Some(approver_chat_id.to_owned()),
            approver_email: Some(approver_email.to_owned()),
            ..Self::default()
        }
    }

    /// PENDING→DENIED field set.
    #[must_use]
    pub fn denied(at: DateTime<Utc>, denier_chat_id: &str, denier_email: &str) -> Self {
        Self {
            status: Some(RequestStatus::Denied),
            denied_at: Some(at),
            approver_chat_id: Some(denier_chat_id.to_owned()),
            approver_email: Some(denier_email.to_owned()),
            ..Self::default()
        }
    }

    /// APPROVED→GRANTED field set.
    #[must_use]
    pub fn granted(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(RequestStatus::Granted),
            grant_time: Some(at),
            ..Self::default()
        }
    }

    /// GRANTED→REVOKED field set.
    #[must_use]
    pub fn revoked(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(RequestStatus::Revoked),
            revoked_at: Some(at),
            ..Self::default()
        }
    }

    /// GRANTED→EXPIRED field set.
    #[must_use]
    pub fn expired(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(RequestStatus::Expired),
            expired_at: Some(at),
            ..Self::default()
        }
    }

    /// Transition-to-ERROR field set.
    #[must_use]
    pub fn errored(details: impl Into<String>) -> Self {
        Self {
            status: Some(RequestStatus::Error),
            error_details: Some(details.into()),
            ..Self::default()
        }
    }

    /// Returns the target status; defaults are never built without one.
    #[must_use]
    pub fn target_status(&self) -> RequestStatus {
        self.status.unwrap_or(RequestStatus::Error)
    }
}

/// Reporting query over access requests.
///
/// At least one of channel, account, requester email, or status must be
/// present; unfiltered enumeration is rejected at the service layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestQuery {
    /// Originating channel filter.
    pub channel_id: Option<String>,
    /// Target account filter.
    pub account_id: Option<String>,
    /// Requester email filter.
    pub requester_email: Option<String>,
    /// Lifecycle status filter.
    pub status: Option<RequestStatus>,
    /// Inclusive creation-time lower bound.
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive creation-time upper bound.
    pub end_date: Option<DateTime<Utc>>,
    /// Page size, clamped to 1..=200.
    pub limit: usize,
    /// Opaque keyset pagination token from a previous page.
    pub next_token: Option<String>,
}

impl RequestQuery {
    /// Returns true when at least one required filter is present.
    #[must_use]
    pub fn has_filter(&self) -> bool {
        self.channel_id.is_some()
            || self.account_id.is_some()
            || self.requester_email.is_some()
            || self.status.is_some()
    }
}

/// One page of reporting results.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPage {
    /// Requests in reverse creation order.
    pub items: Vec<AccessRequest>,
    /// Token resuming after the last item, when more rows exist.
    pub next_token: Option<String>,
}

/// Repository port for channel bindings.
#[async_trait]
pub trait BindingRepository: Send + Sync {
    /// Creates or replaces one binding.
    async fn save(&self, binding: &ChannelBinding) -> AppResult<()>;

    /// Returns one binding by channel and account.
    async fn find(&self, channel_id: &str, account_id: &str)
    -> AppResult<Option<ChannelBinding>>;

    /// Lists every binding of one channel.
    async fn list_by_channel(&self, channel_id: &str) -> AppResult<Vec<ChannelBinding>>;

    /// Returns the binding holding one account, regardless of channel.
    async fn find_by_account(&self, account_id: &str) -> AppResult<Option<ChannelBinding>>;
}

/// Repository port for access requests.
#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Conditionally creates one request; an existing `request_id` is a conflict.
    async fn create(&self, request: &AccessRequest) -> AppResult<()>;

    /// Returns one request by id.
    async fn find(&self, request_id: Uuid) -> AppResult<Option<AccessRequest>>;

    /// Applies `update` only while the stored status equals `expected`.
    ///
    /// This is the sole mechanism for advancing a request's state. A stale
    /// status yields `AppError::Conflict`, distinguishable from `NotFound`
    /// and from infrastructure failures.
    async fn conditional_update_status(
        &self,
        request_id: Uuid,
        expected: RequestStatus,
        update: StatusUpdate,
    ) -> AppResult<()>;

    /// Runs one reporting query page.
    async fn query(&self, query: &RequestQuery) -> AppResult<RequestPage>;

    /// Lists GRANTED requests whose scheduled end has passed, oldest first.
    async fn list_expired_grants(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<AccessRequest>>;
}

/// Repository port for the append-only audit trail.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Appends one event; events are never mutated or deleted.
    async fn append(&self, event: &AuditEvent) -> AppResult<()>;

    /// Lists events of one request in chronological order.
    async fn list_by_request(&self, request_id: Uuid) -> AppResult<Vec<AuditEvent>>;
}

/// Repository port for replay-protection nonces.
#[async_trait]
pub trait NonceRepository: Send + Sync {
    /// Records a nonce with a unique-constraint put.
    ///
    /// Returns `false` when the `(key_id, nonce)` pair already exists, which
    /// callers treat as a replay.
    async fn put_once(&self, key_id: &str, nonce: &str, expires_at: i64) -> AppResult<bool>;

    /// Returns true when the `(key_id, nonce)` pair has been seen.
    async fn exists(&self, key_id: &str, nonce: &str) -> AppResult<bool>;

    /// Deletes nonces whose TTL passed; returns the number removed.
    async fn purge_expired(&self, now_epoch_seconds: i64) -> AppResult<u64>;
}
