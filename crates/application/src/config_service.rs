use std::sync::Arc;

use chrono::Utc;
use jitgate_core::{AppError, AppResult};
use jitgate_domain::{ChannelBinding, ChannelBindingInput, DEFAULT_MAX_REQUEST_HOURS};
use tracing::info;

use crate::store_ports::BindingRepository;

/// Payload for binding an account to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAccountInput {
    /// Chat channel id.
    pub channel_id: String,
    /// Cloud account id.
    pub account_id: String,
}

/// Payload for replacing the approver list of every binding on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetApproversInput {
    /// Chat channel id.
    pub channel_id: String,
    /// Replacement approver chat user ids.
    pub approver_chat_ids: Vec<String>,
}

/// Manages channel↔account bindings and their approval policy.
#[derive(Clone)]
pub struct ConfigService {
    bindings: Arc<dyn BindingRepository>,
}

impl ConfigService {
    /// Creates a config service.
    #[must_use]
    pub fn new(bindings: Arc<dyn BindingRepository>) -> Self {
        Self { bindings }
    }

    /// Binds an account to a channel.
    ///
    /// An account may be bound to at most one channel at any time; rebinding
    /// to the same channel preserves the existing approver list and policy.
    pub async fn bind_account(&self, input: BindAccountInput) -> AppResult<ChannelBinding> {
        let BindAccountInput {
            channel_id,
            account_id,
        } = input;

        if channel_id.trim().is_empty() || account_id.trim().is_empty() {
            return Err(AppError::Validation(
                "channel_id and account_id are required".to_owned(),
            ));
        }

        if let Some(existing) = self.bindings.find_by_account(account_id.as_str()).await? {
            if existing.channel_id() != channel_id {
                return Err(AppError::Conflict(format!(
                    "account {account_id} is already bound to channel {}",
                    existing.channel_id()
                )));
            }
        }

        let existing = self
            .bindings
            .find(channel_id.as_str(), account_id.as_str())
            .await?;

        let binding = ChannelBinding::new(ChannelBindingInput {
            channel_id: channel_id.clone(),
            account_id: account_id.clone(),
            approver_chat_ids: existing
                .as_ref()
                .map(|binding| binding.approver_chat_ids().to_vec())
                .unwrap_or_default(),
            allow_self_approval: existing
                .as_ref()
                .is_some_and(ChannelBinding::allow_self_approval),
            max_request_hours: existing
                .as_ref()
                .map_or(DEFAULT_MAX_REQUEST_HOURS, ChannelBinding::max_request_hours),
            updated_at: Utc::now(),
        })?;

        self.bindings.save(&binding).await?;

        info!(
            channel_id = channel_id.as_str(),
            account_id = account_id.as_str(),
            "account bound to channel"
        );
        Ok(binding)
    }

    /// Replaces the approver list for every account bound to a channel.
    pub async fn set_approvers(&self, input: SetApproversInput) -> AppResult<Vec<ChannelBinding>> {
        let SetApproversInput {
            channel_id,
            approver_chat_ids,
        } = input;

        if channel_id.trim().is_empty() {
            return Err(AppError::Validation("channel_id is required".to_owned()));
        }
        if approver_chat_ids.is_empty() {
            return Err(AppError::Validation(
                "at least one approver chat id is required".to_owned(),
            ));
        }

        let bindings = self.bindings.list_by_channel(channel_id.as_str()).await?;
        if bindings.is_empty() {
            return Err(AppError::NotFound(format!(
                "no accounts bound to channel {channel_id}"
            )));
        }

        let now = Utc::now();
        let mut updated = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let binding = binding.with_approvers(approver_chat_ids.clone(), now)?;
            self.bindings.save(&binding).await?;
            updated.push(binding);
        }

        info!(
            channel_id = channel_id.as_str(),
            approver_count = approver_chat_ids.len(),
            account_count = updated.len(),
            "approvers updated"
        );
        Ok(updated)
    }

    /// Lists every account binding of one channel.
    pub async fn list_bound_accounts(&self, channel_id: &str) -> AppResult<Vec<ChannelBinding>> {
        if channel_id.trim().is_empty() {
            return Err(AppError::Validation(
                "channel_id query parameter is required".to_owned(),
            ));
        }

        self.bindings.list_by_channel(channel_id).await
    }
}
