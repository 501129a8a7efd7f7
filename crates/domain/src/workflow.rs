use jitgate_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// One step of the durable grant→wait→revoke workflow.
///
/// Exactly one execution exists per approved request; the executor advances
/// it through these steps with an exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStep {
    /// Confirm the request is still APPROVED before granting.
    Validate,
    /// Create the principal→account assignment at the identity provider.
    Grant,
    /// Send the signed GRANTED callback.
    NotifyGranted,
    /// Durable sleep until the requested duration elapses.
    Wait,
    /// Delete the assignment and transition to EXPIRED.
    Revoke,
    /// Send the signed callback with the final stored status.
    NotifyRevoked,
    /// Compensation path when the grant failed terminally.
    HandleGrantError,
    /// Compensation path when the revoke failed terminally.
    HandleRevokeError,
}

impl GrantStep {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Grant => "grant",
            Self::NotifyGranted => "notify_granted",
            Self::Wait => "wait",
            Self::Revoke => "revoke",
            Self::NotifyRevoked => "notify_revoked",
            Self::HandleGrantError => "handle_grant_error",
            Self::HandleRevokeError => "handle_revoke_error",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "validate" => Ok(Self::Validate),
            "grant" => Ok(Self::Grant),
            "notify_granted" => Ok(Self::NotifyGranted),
            "wait" => Ok(Self::Wait),
            "revoke" => Ok(Self::Revoke),
            "notify_revoked" => Ok(Self::NotifyRevoked),
            "handle_grant_error" => Ok(Self::HandleGrantError),
            "handle_revoke_error" => Ok(Self::HandleRevokeError),
            _ => Err(AppError::Validation(format!(
                "unknown grant workflow step '{value}'"
            ))),
        }
    }
}
