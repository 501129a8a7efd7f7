use chrono::{DateTime, Utc};
use jitgate_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Default request-duration ceiling applied when a binding is first created.
pub const DEFAULT_MAX_REQUEST_HOURS: i32 = 4;

/// Binding of one chat channel to one cloud account with its approval policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    channel_id: String,
    account_id: String,
    approver_chat_ids: Vec<String>,
    allow_self_approval: bool,
    max_request_hours: i32,
    updated_at: DateTime<Utc>,
}

/// Input payload used to construct a validated channel binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBindingInput {
    /// Chat channel id.
    pub channel_id: String,
    /// Cloud account id.
    pub account_id: String,
    /// Chat user ids allowed to approve or deny requests.
    pub approver_chat_ids: Vec<String>,
    /// Whether a requester may approve their own request.
    pub allow_self_approval: bool,
    /// Maximum request duration in hours.
    pub max_request_hours: i32,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ChannelBinding {
    /// Creates a validated channel binding.
    pub fn new(input: ChannelBindingInput) -> AppResult<Self> {
        let ChannelBindingInput {
            channel_id,
            account_id,
            approver_chat_ids,
            allow_self_approval,
            max_request_hours,
            updated_at,
        } = input;

        if channel_id.trim().is_empty() || account_id.trim().is_empty() {
            return Err(AppError::Validation(
                "channel_id and account_id are required".to_owned(),
            ));
        }

        if max_request_hours <= 0 {
            return Err(AppError::Validation(
                "max_request_hours must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            channel_id,
            account_id,
            approver_chat_ids,
            allow_self_approval,
            max_request_hours,
            updated_at,
        })
    }

    /// Returns the chat channel id.
    #[must_use]
    pub fn channel_id(&self) -> &str {
        self.channel_id.as_str()
    }

    /// Returns the bound account id.
    #[must_use]
    pub fn account_id(&self) -> &str {
        self.account_id.as_str()
    }

    /// Returns the approver chat user ids.
    #[must_use]
    pub fn approver_chat_ids(&self) -> &[String] {
        self.approver_chat_ids.as_slice()
    }

    /// Returns whether self-approval is allowed.
    #[must_use]
    pub fn allow_self_approval(&self) -> bool {
        self.allow_self_approval
    }

    /// Returns the request-duration ceiling in hours.
    #[must_use]
    pub fn max_request_hours(&self) -> i32 {
        self.max_request_hours
    }

    /// Returns the request-duration ceiling in minutes.
    #[must_use]
    pub fn max_duration_minutes(&self) -> i32 {
        self.max_request_hours.saturating_mul(60)
    }

    /// Returns the last mutation timestamp.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true when the chat user may approve or deny against this binding.
    #[must_use]
    pub fn is_approver(&self, chat_user_id: &str) -> bool {
        self.approver_chat_ids
            .iter()
            .any(|approver| approver == chat_user_id)
    }

    /// Returns a copy with a replaced, non-empty approver list.
    pub fn with_approvers(
        &self,
        approver_chat_ids: Vec<String>,
        updated_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        if approver_chat_ids.is_empty() {
            return Err(AppError::Validation(
                "at least one approver chat id is required".to_owned(),
            ));
        }

        let mut binding = self.clone();
        binding.approver_chat_ids = approver_chat_ids;
        binding.updated_at = updated_at;
        Ok(binding)
    }
}
