use async_trait::async_trait;
use jitgate_core::AppResult;
use jitgate_domain::CallbackPayload;

/// Delivery port for signed webhook callbacks to the chat plugin.
#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    /// Delivers one callback; retries live behind this port.
    ///
    /// Delivery failure never alters request state — callers log and move on.
    async fn notify(&self, payload: &CallbackPayload) -> AppResult<()>;
}
