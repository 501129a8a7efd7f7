use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use tracing::{info, warn};

use jitgate_application::{CallbackNotifier, CallbackSigner};
use jitgate_core::{AppError, AppResult};
use jitgate_domain::CallbackPayload;

/// Canonical path the plugin verifies callback signatures against.
const CALLBACK_SIGNED_PATH: &str = "/jit/webhook";

/// Sleeps between delivery attempts.
const RETRY_BACKOFFS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Delivers HMAC-signed webhook callbacks to the chat plugin.
#[derive(Clone)]
pub struct HttpCallbackNotifier {
    http: reqwest::Client,
    webhook_url: String,
    signer: CallbackSigner,
}

impl HttpCallbackNotifier {
    /// Creates a notifier for one webhook endpoint.
    pub fn new(webhook_url: impl Into<String>, signer: CallbackSigner) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| {
                AppError::Internal(format!("failed to build webhook HTTP client: {error}"))
            })?;

        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
            signer,
        })
    }

    async fn send(&self, body: &[u8]) -> AppResult<()> {
        let signed = self.signer.sign("POST", CALLBACK_SIGNED_PATH, body)?;

        let mut request = self
            .http
            .post(self.webhook_url.as_str())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        for (name, value) in signed.as_pairs() {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|error| AppError::Internal(format!("webhook HTTP error: {error}")))?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "webhook returned status {}",
                response.status().as_u16()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl CallbackNotifier for HttpCallbackNotifier {
    async fn notify(&self, payload: &CallbackPayload) -> AppResult<()> {
        let body = serde_json::to_vec(payload).map_err(|error| {
            AppError::Internal(format!("failed to encode callback payload: {error}"))
        })?;

        let mut last_error = None;
        for attempt in 0..=RETRY_BACKOFFS.len() {
            if attempt > 0 {
                warn!(
                    attempt,
                    request_id = %payload.request_id,
                    "retrying webhook notification"
                );
                tokio::time::sleep(RETRY_BACKOFFS[attempt - 1]).await;
            }

            match self.send(body.as_slice()).await {
                Ok(()) => {
                    info!(
                        request_id = %payload.request_id,
                        status = payload.status.as_str(),
                        "webhook notification sent"
                    );
                    return Ok(());
                }
                Err(error) => {
                    warn!(attempt, error = %error, "webhook send failed");
                    last_error = Some(error);
                }
            }
        }

        Err(AppError::Internal(format!(
            "webhook notify failed after retries: {}",
            last_error.unwrap_or_else(|| AppError::Internal("unknown".to_owned()))
        )))
    }
}
