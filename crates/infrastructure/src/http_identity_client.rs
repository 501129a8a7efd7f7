use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use jitgate_application::IdentityProvider;
use jitgate_core::{AppError, AppResult};

/// Sleep between submission status polls.
const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Polls per submitted operation: 30 × 2 s = 60 s ceiling.
const MAX_POLLS: u32 = 30;
/// Sleeps between whole-operation retries.
const RETRY_BACKOFFS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(4),
    Duration::from_secs(16),
];

/// Connection settings for the identity provider API.
#[derive(Debug, Clone)]
pub struct IdentityApiConfig {
    /// Provider base URL without a trailing slash.
    pub base_url: String,
    /// Bearer token authenticating this controller.
    pub api_token: String,
}

/// HTTP client for the external identity provider.
///
/// The provider's assignment API is asynchronous: a create or delete submit
/// returns an operation id, and the terminal state is reached by polling.
#[derive(Clone)]
pub struct HttpIdentityClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    users: Vec<UserRecord>,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct UserIdResponse {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct AssignmentRequest<'a> {
    account_id: &'a str,
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    operation_id: String,
}

#[derive(Debug, Deserialize)]
struct OperationStatusResponse {
    status: String,
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    #[serde(default)]
    code: String,
}

impl HttpIdentityClient {
    /// Creates an identity client.
    pub fn new(config: IdentityApiConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|error| {
                AppError::Internal(format!("failed to build identity HTTP client: {error}"))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_token: config.api_token,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn assignment_request(
        &self,
        method: reqwest::Method,
        account_id: &str,
        user_id: &str,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.endpoint("/v1/assignments"))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.api_token),
            )
            .json(&AssignmentRequest {
                account_id,
                user_id,
            })
    }

    async fn poll_operation(&self, operation_id: &str) -> AppResult<()> {
        for _ in 0..MAX_POLLS {
            let response = self
                .http
                .get(self.endpoint(&format!("/v1/operations/{operation_id}")))
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", self.api_token),
                )
                .send()
                .await
                .map_err(|error| {
                    AppError::Identity(format!("operation status poll failed: {error}"))
                })?;

            if !response.status().is_success() {
                return Err(AppError::Identity(format!(
                    "operation status poll returned status {}",
                    response.status().as_u16()
                )));
            }

            let operation = response
                .json::<OperationStatusResponse>()
                .await
                .map_err(|error| {
                    AppError::Identity(format!("failed to parse operation status: {error}"))
                })?;

            match operation.status.as_str() {
                "SUCCEEDED" => {
                    info!(operation_id, "assignment operation succeeded");
                    return Ok(());
                }
                "FAILED" => {
                    return Err(AppError::Identity(format!(
                        "assignment operation failed: {}",
                        operation.failure_reason.unwrap_or_default()
                    )));
                }
                _ => {}
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Err(AppError::Identity(format!(
            "assignment operation {operation_id} timed out"
        )))
    }

    async fn grant_once(&self, account_id: &str, user_id: &str) -> AppResult<()> {
        let response = self
            .assignment_request(reqwest::Method::POST, account_id, user_id)
            .send()
            .await
            .map_err(|error| {
                AppError::Identity(format!("assignment create submit failed: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_owned());
            return Err(AppError::Identity(format!(
                "assignment create returned status {}: {body}",
                status.as_u16()
            )));
        }

        let operation = response.json::<OperationResponse>().await.map_err(|error| {
            AppError::Identity(format!("failed to parse assignment response: {error}"))
        })?;
        self.poll_operation(operation.operation_id.as_str()).await
    }

    async fn revoke_once(&self, account_id: &str, user_id: &str) -> AppResult<()> {
        let response = self
            .assignment_request(reqwest::Method::DELETE, account_id, user_id)
            .send()
            .await
            .map_err(|error| {
                AppError::Identity(format!("assignment delete submit failed: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_owned());
            let code = serde_json::from_str::<ProviderErrorResponse>(body.as_str())
                .map(|error| error.code)
                .unwrap_or_default();

            // An assignment that is already gone is success for a revoke.
            if matches!(status, StatusCode::CONFLICT | StatusCode::NOT_FOUND)
                || code == "ConflictException"
                || code == "ResourceNotFoundException"
            {
                info!(account_id, user_id, "assignment already deleted, treating as success");
                return Ok(());
            }

            return Err(AppError::Identity(format!(
                "assignment delete returned status {}: {body}",
                status.as_u16()
            )));
        }

        let operation = response.json::<OperationResponse>().await.map_err(|error| {
            AppError::Identity(format!("failed to parse assignment response: {error}"))
        })?;
        self.poll_operation(operation.operation_id.as_str()).await
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityClient {
    async fn lookup_user(&self, email: &str) -> AppResult<String> {
        // First attempt: the user-name attribute, which many directories set
        // to the email address.
        let by_user_name = self
            .http
            .get(self.endpoint("/v1/users"))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.api_token),
            )
            .query(&[("user_name", email)])
            .send()
            .await;

        match by_user_name {
            Ok(response) if response.status().is_success() => {
                match response.json::<UsersResponse>().await {
                    Ok(users) => {
                        if let Some(user) = users.users.first() {
                            info!(
                                email,
                                user_id = user.user_id.as_str(),
                                "resolved identity user by user name"
                            );
                            return Ok(user.user_id.clone());
                        }
                    }
                    Err(error) => {
                        warn!(email, error = %error, "user-name lookup response unreadable");
                    }
                }
            }
            Ok(response) => {
                warn!(
                    email,
                    status = response.status().as_u16(),
                    "user-name lookup failed, falling back to email attribute"
                );
            }
            Err(error) => {
                warn!(email, error = %error, "user-name lookup failed, falling back to email attribute");
            }
        }

        // Second attempt: the unique email attribute.
        let response = self
            .http
            .get(self.endpoint("/v1/users/by-email"))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.api_token),
            )
            .query(&[("email", email)])
            .send()
            .await
            .map_err(|error| AppError::Identity(format!("email lookup failed: {error}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!(
                "no identity user found for email {email}"
            )));
        }
        if !response.status().is_success() {
            return Err(AppError::Identity(format!(
                "email lookup returned status {}",
                response.status().as_u16()
            )));
        }

        let user = response.json::<UserIdResponse>().await.map_err(|error| {
            AppError::Identity(format!("failed to parse email lookup response: {error}"))
        })?;

        info!(
            email,
            user_id = user.user_id.as_str(),
            "resolved identity user by email attribute"
        );
        Ok(user.user_id)
    }

    async fn grant(&self, account_id: &str, identity_user_id: &str) -> AppResult<()> {
        let mut last_error = None;
        for attempt in 0..=RETRY_BACKOFFS.len() {
            if attempt > 0 {
                warn!(attempt, account_id, user_id = identity_user_id, "retrying grant");
                tokio::time::sleep(RETRY_BACKOFFS[attempt - 1]).await;
            }

            match self.grant_once(account_id, identity_user_id).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    warn!(attempt, error = %error, "grant attempt failed");
                    last_error = Some(error);
                }
            }
        }

        Err(AppError::Identity(format!(
            "grant failed after retries: {}",
            last_error.unwrap_or_else(|| AppError::Identity("unknown".to_owned()))
        )))
    }

    async fn revoke(&self, account_id: &str, identity_user_id: &str) -> AppResult<()> {
        let mut last_error = None;
        for attempt in 0..=RETRY_BACKOFFS.len() {
            if attempt > 0 {
                warn!(attempt, account_id, user_id = identity_user_id, "retrying revoke");
                tokio::time::sleep(RETRY_BACKOFFS[attempt - 1]).await;
            }

            match self.revoke_once(account_id, identity_user_id).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    warn!(attempt, error = %error, "revoke attempt failed");
                    last_error = Some(error);
                }
            }
        }

        Err(AppError::Identity(format!(
            "revoke failed after retries: {}",
            last_error.unwrap_or_else(|| AppError::Identity("unknown".to_owned()))
        )))
    }
}
