use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use jitgate_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of lifecycle transition or side effect an audit event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    /// Request was created.
    Requested,
    /// Request was approved.
    Approved,
    /// Request was denied.
    Denied,
    /// Access was granted at the identity provider.
    Granted,
    /// Access was manually revoked.
    Revoked,
    /// Access expired and was removed.
    Expired,
    /// A grant or revoke failed terminally.
    Error,
}

impl AuditEventType {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Approved => "APPROVED",
            Self::Denied => "DENIED",
            Self::Granted => "GRANTED",
            Self::Revoked => "REVOKED",
            Self::Expired => "EXPIRED",
            Self::Error => "ERROR",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "REQUESTED" => Ok(Self::Requested),
            "APPROVED" => Ok(Self::Approved),
            "DENIED" => Ok(Self::Denied),
            "GRANTED" => Ok(Self::Granted),
            "REVOKED" => Ok(Self::Revoked),
            "EXPIRED" => Ok(Self::Expired),
            "ERROR" => Ok(Self::Error),
            _ => Err(AppError::Validation(format!(
                "unknown audit event type '{value}'"
            ))),
        }
    }
}

/// Append-only record of one state transition or side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Request the event belongs to.
    pub request_id: Uuid,
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event timestamp.
    pub event_time: DateTime<Utc>,
    /// Transition kind.
    pub event_type: AuditEventType,
    /// Target account.
    pub account_id: String,
    /// Originating channel.
    pub channel_id: String,
    /// Chat user id of the acting party, when a human drove the transition.
    pub actor_chat_id: Option<String>,
    /// Email or system label of the acting party.
    pub actor_email: String,
    /// Free-form event details.
    pub details: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Returns the `event_time#event_id` sort key that orders events within a request.
    #[must_use]
    pub fn sort_key(&self) -> String {
        format!(
            "{}#{}",
            self.event_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.event_id
        )
    }
}
