use chrono::{DateTime, Duration, Utc};
use jitgate_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of one access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Created and waiting for an approval decision.
    Pending,
    /// Approved; the grant workflow has not completed yet.
    Approved,
    /// Rejected by an approver. Terminal.
    Denied,
    /// Access is live at the identity provider.
    Granted,
    /// Access was removed after the requested duration elapsed. Terminal.
    Expired,
    /// Access was removed by a manual revoke. Terminal.
    Revoked,
    /// A grant or revoke failed terminally. Needs human or reconciler action.
    Error,
}

impl RequestStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Denied => "DENIED",
            Self::Granted => "GRANTED",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
            Self::Error => "ERROR",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "DENIED" => Ok(Self::Denied),
            "GRANTED" => Ok(Self::Granted),
            "EXPIRED" => Ok(Self::Expired),
            "REVOKED" => Ok(Self::Revoked),
            "ERROR" => Ok(Self::Error),
            _ => Err(AppError::Validation(format!(
                "unknown request status '{value}'"
            ))),
        }
    }

    /// Returns true when no further transition is allowed from this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Denied | Self::Expired | Self::Revoked | Self::Error
        )
    }

    /// Returns true when the transition to `next` follows the lifecycle DAG.
    ///
    /// PENDING fans out to APPROVED or DENIED; APPROVED moves to GRANTED;
    /// GRANTED ends in REVOKED or EXPIRED. Any active state may sink to
    /// ERROR when a grant or revoke fails terminally.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Approved | Self::Denied),
            Self::Approved => matches!(next, Self::Granted | Self::Error),
            Self::Granted => matches!(next, Self::Revoked | Self::Expired | Self::Error),
            Self::Denied | Self::Expired | Self::Revoked | Self::Error => false,
        }
    }
}

/// One time-bounded access request for one principal and one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Globally unique request identifier.
    pub request_id: Uuid,
    /// Target cloud account.
    pub account_id: String,
    /// Chat channel the request originated from.
    pub channel_id: String,
    /// Requester chat user id.
    pub requester_chat_id: String,
    /// Requester email used for identity resolution.
    pub requester_email: String,
    /// Ticket reference justifying the request.
    pub ticket_ref: Option<String>,
    /// Free-text justification.
    pub reason: Option<String>,
    /// Requested access duration in minutes.
    pub requested_duration_minutes: i32,
    /// Current lifecycle state.
    pub status: RequestStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Approval timestamp when approved.
    pub approved_at: Option<DateTime<Utc>>,
    /// Denial timestamp when denied.
    pub denied_at: Option<DateTime<Utc>>,
    /// Timestamp the grant completed at the identity provider.
    pub grant_time: Option<DateTime<Utc>>,
    /// Manual revocation timestamp.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Automatic expiration timestamp.
    pub expired_at: Option<DateTime<Utc>>,
    /// Scheduled end of access, fixed at creation.
    pub end_time: DateTime<Utc>,
    /// Chat user id of the approver or denier.
    pub approver_chat_id: Option<String>,
    /// Email of the approver or denier.
    pub approver_email: Option<String>,
    /// Identity provider user id, resolved once at creation.
    pub identity_user_id: String,
    /// Failure details when the request sank to ERROR.
    pub error_details: Option<String>,
}

/// Input payload used to construct a validated access request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccessRequest {
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
    /// Resolved identity provider user id.
    pub identity_user_id: String,
}

impl AccessRequest {
    /// Creates a validated PENDING request with `end_time` fixed at creation.
    pub fn new(input: NewAccessRequest) -> AppResult<Self> {
        let NewAccessRequest {
            account_id,
            channel_id,
            requester_chat_id,
            requester_email,
            ticket_ref,
            reason,
            requested_duration_minutes,
            identity_user_id,
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

        if identity_user_id.trim().is_empty() {
            return Err(AppError::Validation(
                "identity_user_id must be resolved before creation".to_owned(),
            ));
        }

        let ticket_ref = normalize_optional(ticket_ref);
        let reason = normalize_optional(reason);
        if ticket_ref.is_none() && reason.is_none() {
            return Err(AppError::Validation(
                "either a ticket reference or a reason must be provided".to_owned(),
            ));
        }

        if requested_duration_minutes <= 0 {
            return Err(AppError::Validation(
                "requested_duration_minutes must be positive".to_owned(),
            ));
        }

        let created_at = Utc::now();
        let end_time = created_at + Duration::minutes(i64::from(requested_duration_minutes));

        Ok(Self {
            request_id: Uuid::new_v4(),
            account_id,
            channel_id,
            requester_chat_id,
            requester_email,
            ticket_ref,
            reason,
            requested_duration_minutes,
            status: RequestStatus::Pending,
            created_at,
            approved_at: None,
            denied_at: None,
            grant_time: None,
            revoked_at: None,
            expired_at: None,
            end_time,
            approver_chat_id: None,
            approver_email: None,
            identity_user_id,
            error_details: None,
        })
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim().to_owned();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}
