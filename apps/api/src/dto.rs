use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use jitgate_application::{RequestListing, RequestQuery};
use jitgate_core::{Actor, AppResult};
use jitgate_domain::{AccessRequest, ChannelBinding, RequestStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Incoming payload for POST /requests.
#[derive(Debug, Deserialize)]
pub struct CreateRequestRequest {
    pub account_id: String,
    pub channel_id: String,
    pub requester_chat_id: String,
    pub requester_email: String,
    #[serde(default)]
    pub ticket_ref: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub requested_duration_minutes: i32,
}

/// Incoming payload for POST /requests/{id}/approve.
#[derive(Debug, Deserialize)]
pub struct ApproveRequestRequest {
    pub approver_chat_id: String,
    pub approver_email: String,
}

/// Incoming payload for POST /requests/{id}/deny.
#[derive(Debug, Deserialize)]
pub struct DenyRequestRequest {
    pub denier_chat_id: String,
    pub denier_email: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Incoming payload for POST /requests/{id}/revoke.
#[derive(Debug, Deserialize)]
pub struct RevokeRequestRequest {
    pub actor_chat_id: String,
    pub actor_email: String,
}

impl ApproveRequestRequest {
    pub fn into_actor(self) -> Actor {
        Actor::new(self.approver_chat_id, self.approver_email)
    }
}

impl RevokeRequestRequest {
    pub fn into_actor(self) -> Actor {
        Actor::new(self.actor_chat_id, self.actor_email)
    }
}

/// Query parameters for GET /requests.
#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub requester_email: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub next_token: Option<String>,
}

impl ListRequestsQuery {
    pub fn into_query(self) -> AppResult<RequestQuery> {
        let status = self
            .status
            .as_deref()
            .map(RequestStatus::parse)
            .transpose()?;

        Ok(RequestQuery {
            channel_id: self.channel_id,
            account_id: self.account_id,
            requester_email: self.requester_email,
            status,
            start_date: self.start_date,
            end_date: self.end_date,
            limit: self.limit.unwrap_or(0),
            next_token: self.next_token,
        })
    }
}

/// One access request as returned by the API.
#[derive(Debug, Serialize)]
pub struct RequestResponse {
    pub request_id: Uuid,
    pub account_id: String,
    pub channel_id: String,
    pub requester_chat_id: String,
    pub requester_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub requested_duration_minutes: i32,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_email: Option<String>,
    pub identity_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl From<AccessRequest> for RequestResponse {
    fn from(request: AccessRequest) -> Self {
        Self {
            request_id: request.request_id,
            account_id: request.account_id,
            channel_id: request.channel_id,
            requester_chat_id: request.requester_chat_id,
            requester_email: request.requester_email,
            ticket_ref: request.ticket_ref,
            reason: request.reason,
            requested_duration_minutes: request.requested_duration_minutes,
            status: request.status,
            created_at: request.created_at,
            approved_at: request.approved_at,
            denied_at: request.denied_at,
            grant_time: request.grant_time,
            revoked_at: request.revoked_at,
            expired_at: request.expired_at,
            end_time: request.end_time,
            approver_chat_id: request.approver_chat_id,
            approver_email: request.approver_email,
            identity_user_id: request.identity_user_id,
            error_details: request.error_details,
        }
    }
}

/// Response body for GET /requests.
#[derive(Debug, Serialize)]
pub struct ListRequestsResponse {
    pub items: Vec<RequestResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    pub filters: BTreeMap<String, String>,
}

impl From<RequestListing> for ListRequestsResponse {
    fn from(listing: RequestListing) -> Self {
        Self {
            items: listing
                .items
                .into_iter()
                .map(RequestResponse::from)
                .collect(),
            next_token: listing.next_token,
            filters: listing.filters,
        }
    }
}

/// Incoming payload for POST /config/bind.
#[derive(Debug, Deserialize)]
pub struct BindAccountRequest {
    pub channel_id: String,
    pub account_id: String,
}

/// Incoming payload for POST /config/approvers.
#[derive(Debug, Deserialize)]
pub struct SetApproversRequest {
    pub channel_id: String,
    pub approver_ids: Vec<String>,
}

/// Query parameters for GET /config/accounts.
#[derive(Debug, Deserialize)]
pub struct BoundAccountsQuery {
    #[serde(default)]
    pub channel_id: String,
}

/// One channel binding as returned by the API.
#[derive(Debug, Serialize)]
pub struct BindingResponse {
    pub channel_id: String,
    pub account_id: String,
    pub approver_ids: Vec<String>,
    pub allow_self_approval: bool,
    pub max_request_hours: i32,
    pub updated_at: DateTime<Utc>,
}

impl From<ChannelBinding> for BindingResponse {
    fn from(binding: ChannelBinding) -> Self {
        Self {
            channel_id: binding.channel_id().to_owned(),
            account_id: binding.account_id().to_owned(),
            approver_ids: binding.approver_chat_ids().to_vec(),
            allow_self_approval: binding.allow_self_approval(),
            max_request_hours: binding.max_request_hours(),
            updated_at: binding.updated_at(),
        }
    }
}
