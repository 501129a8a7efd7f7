use async_trait::async_trait;
use jitgate_core::AppResult;

/// Gateway port for the external identity provider.
///
/// Grant and revoke are idempotent at the provider: repeating either call for
/// the same pair converges on the same end state, and callers rely on this.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves an email to the provider's user id.
    ///
    /// Matches by user-name attribute first, then by unique email attribute;
    /// fails when neither finds a unique user.
    async fn lookup_user(&self, email: &str) -> AppResult<String>;

    /// Creates the principal→account assignment and waits for completion.
    async fn grant(&self, account_id: &str, identity_user_id: &str) -> AppResult<()>;

    /// Deletes the principal→account assignment and waits for completion.
    ///
    /// An assignment that is already gone is success.
    async fn revoke(&self, account_id: &str, identity_user_id: &str) -> AppResult<()>;
}
