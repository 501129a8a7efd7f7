//! jitgate grant-workflow worker runtime.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use jitgate_application::{AuditService, CallbackSigner, KeySet, WorkflowService};
use jitgate_core::{AppError, AppResult};
use jitgate_infrastructure::{
    HttpCallbackNotifier, HttpIdentityClient, IdentityApiConfig, PostgresAuditRepository,
    PostgresRequestRepository, PostgresWorkflowRepository,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct WorkerConfig {
    database_url: String,
    callback_webhook_url: String,
    callback_signing_keys: String,
    identity_base_url: String,
    identity_api_token: String,
    worker_id: String,
    claim_limit: usize,
    lease_seconds: u32,
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    let workflow_service = build_workflow_service(pool, &config)?;

    info!(
        worker_id = %config.worker_id,
        claim_limit = config.claim_limit,
        lease_seconds = config.lease_seconds,
        poll_interval_ms = config.poll_interval_ms,
        "jitgate-worker started"
    );

    loop {
        match workflow_service
            .run_due(
                config.worker_id.as_str(),
                config.claim_limit,
                config.lease_seconds,
            )
            .await
        {
            Ok(0) => {
                tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
            }
            Ok(claimed) => {
                info!(
                    worker_id = %config.worker_id,
                    claimed_count = claimed,
                    "workflow steps executed"
                );
            }
            Err(error) => {
                warn!(
                    worker_id = %config.worker_id,
                    error = %error,
                    "failed to claim workflow executions"
                );
                tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
            }
        }
    }
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn build_workflow_service(pool: PgPool, config: &WorkerConfig) -> AppResult<WorkflowService> {
    let request_repository = Arc::new(PostgresRequestRepository::new(pool.clone()));
    let audit_repository = Arc::new(PostgresAuditRepository::new(pool.clone()));
    let workflow_repository = Arc::new(PostgresWorkflowRepository::new(pool));

    let identity_client = Arc::new(HttpIdentityClient::new(IdentityApiConfig {
        base_url: config.identity_base_url.clone(),
        api_token: config.identity_api_token.clone(),
    })?);
    let callback_keys = KeySet::parse(config.callback_signing_keys.as_str())?;
    let callback_notifier = Arc::new(HttpCallbackNotifier::new(
        config.callback_webhook_url.clone(),
        CallbackSigner::new(callback_keys),
    )?);

    Ok(WorkflowService::new(
        request_repository,
        identity_client,
        callback_notifier,
        workflow_repository,
        AuditService::new(audit_repository),
    ))
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let callback_webhook_url = required_env("CALLBACK_WEBHOOK_URL")?;
        let callback_signing_keys = required_env("CALLBACK_SIGNING_KEYS")?;
        let identity_base_url = required_env("IDENTITY_API_BASE_URL")?;
        let identity_api_token = required_env("IDENTITY_API_TOKEN")?;
        let worker_id = env::var("WORKER_ID")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));
        let claim_limit = parse_env_usize("WORKER_CLAIM_LIMIT", 10)?;
        let lease_seconds = parse_env_u32("WORKER_LEASE_SECONDS", 120)?;
        let poll_interval_ms = parse_env_u64("WORKER_POLL_INTERVAL_MS", 1500)?;

        if claim_limit == 0 {
            return Err(AppError::Validation(
                "WORKER_CLAIM_LIMIT must be greater than zero".to_owned(),
            ));
        }

        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "WORKER_LEASE_SECONDS must be greater than zero".to_owned(),
            ));
        }

        if poll_interval_ms == 0 {
            return Err(AppError::Validation(
                "WORKER_POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            callback_webhook_url,
            callback_signing_keys,
            identity_base_url,
            identity_api_token,
            worker_id,
            claim_limit,
            lease_seconds,
            poll_interval_ms,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
