use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::RequestStatus;

/// Body of one signed webhook callback delivered to the chat plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    /// Request the callback refers to.
    pub request_id: Uuid,
    /// Status the request transitioned to.
    pub status: RequestStatus,
    /// Target account.
    pub account_id: String,
    /// Originating channel.
    pub channel_id: String,
    /// Email or system label of whoever drove the transition.
    pub actor: String,
    /// Optional free-form details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, String>>,
}
