//! jitgate reconciler: one expiry sweep per invocation.
//!
//! An external scheduler runs this binary every 15 minutes; it revokes every
//! overdue grant the workflow missed and purges expired replay nonces.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;

use chrono::Utc;
use jitgate_application::{AuditService, CallbackSigner, KeySet, ReconcilerService};
use jitgate_core::AppError;
use jitgate_infrastructure::{
    HttpCallbackNotifier, HttpIdentityClient, IdentityApiConfig, PostgresAuditRepository,
    PostgresNonceRepository, PostgresRequestRepository,
};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let database_url = required_env("DATABASE_URL")?;
    let callback_webhook_url = required_env("CALLBACK_WEBHOOK_URL")?;
    let callback_keys = KeySet::parse(required_env("CALLBACK_SIGNING_KEYS")?.as_str())?;
    let identity_base_url = required_env("IDENTITY_API_BASE_URL")?;
    let identity_api_token = required_env("IDENTITY_API_TOKEN")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    let request_repository = Arc::new(PostgresRequestRepository::new(pool.clone()));
    let audit_repository = Arc::new(PostgresAuditRepository::new(pool.clone()));
    let nonce_repository = Arc::new(PostgresNonceRepository::new(pool));

    let identity_client = Arc::new(HttpIdentityClient::new(IdentityApiConfig {
        base_url: identity_base_url,
        api_token: identity_api_token,
    })?);
    let callback_notifier = Arc::new(HttpCallbackNotifier::new(
        callback_webhook_url,
        CallbackSigner::new(callback_keys),
    )?);

    let reconciler = ReconcilerService::new(
        request_repository,
        identity_client,
        callback_notifier,
        nonce_repository,
        AuditService::new(audit_repository),
    );

    info!("starting jitgate reconciler sweep");
    let summary = reconciler.run_sweep(Utc::now()).await?;

    if summary.errored > 0 {
        return Err(AppError::Internal(format!(
            "reconciler completed with {} errors out of {}",
            summary.errored, summary.processed
        )));
    }

    info!(
        processed = summary.processed,
        purged_nonces = summary.purged_nonces,
        "reconciler sweep completed"
    );
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}
