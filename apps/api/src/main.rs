//! jitgate API composition root.

#![forbid(unsafe_code)]

mod dto;
mod error;
mod handlers;
mod middleware;
mod state;

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use jitgate_application::{
    AuditService, CallbackSigner, ConfigService, KeySet, RequestAuthenticator, RequestService,
};
use jitgate_core::AppError;
use jitgate_infrastructure::{
    HttpCallbackNotifier, HttpIdentityClient, IdentityApiConfig, PostgresAuditRepository,
    PostgresBindingRepository, PostgresNonceRepository, PostgresRequestRepository,
    PostgresWorkflowRepository,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let migrate_only = env::args().nth(1).as_deref() == Some("migrate");

    let database_url = required_env("DATABASE_URL")?;
    let signing_keys = KeySet::parse(required_env("SIGNING_KEYS")?.as_str())?;
    let callback_keys = KeySet::parse(required_env("CALLBACK_SIGNING_KEYS")?.as_str())?;
    let callback_webhook_url = required_env("CALLBACK_WEBHOOK_URL")?;
    let identity_base_url = required_env("IDENTITY_API_BASE_URL")?;
    let identity_api_token = required_env("IDENTITY_API_TOKEN")?;

    let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
    let api_port = env::var("API_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3001);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    if migrate_only {
        info!("database migrations applied successfully");
        return Ok(());
    }

    let binding_repository = Arc::new(PostgresBindingRepository::new(pool.clone()));
    let request_repository = Arc::new(PostgresRequestRepository::new(pool.clone()));
    let audit_repository = Arc::new(PostgresAuditRepository::new(pool.clone()));
    let nonce_repository = Arc::new(PostgresNonceRepository::new(pool.clone()));
    let workflow_repository = Arc::new(PostgresWorkflowRepository::new(pool));

    let identity_client = Arc::new(HttpIdentityClient::new(IdentityApiConfig {
        base_url: identity_base_url,
        api_token: identity_api_token,
    })?);
    let callback_notifier = Arc::new(HttpCallbackNotifier::new(
        callback_webhook_url,
        CallbackSigner::new(callback_keys),
    )?);

    let audit_service = AuditService::new(audit_repository);
    let request_service = RequestService::new(
        request_repository,
        binding_repository.clone(),
        identity_client,
        workflow_repository,
        callback_notifier,
        audit_service,
    );
    let config_service = ConfigService::new(binding_repository);
    let authenticator = RequestAuthenticator::new(signing_keys, nonce_repository);

    let app_state = AppState {
        request_service,
        config_service,
        authenticator,
    };

    let signed_routes = Router::new()
        .route(
            "/requests",
            get(handlers::requests::list_requests_handler)
                .post(handlers::requests::create_request_handler),
        )
        .route(
            "/requests/{request_id}",
            get(handlers::requests::get_request_handler),
        )
        .route(
            "/requests/{request_id}/approve",
            post(handlers::requests::approve_request_handler),
        )
        .route(
            "/requests/{request_id}/deny",
            post(handlers::requests::deny_request_handler),
        )
        .route(
            "/requests/{request_id}/revoke",
            post(handlers::requests::revoke_request_handler),
        )
        .route(
            "/config/bind",
            post(handlers::config::bind_account_handler),
        )
        .route(
            "/config/approvers",
            post(handlers::config::set_approvers_handler),
        )
        .route(
            "/config/accounts",
            get(handlers::config::bound_accounts_handler),
        )
        .route_layer(from_fn_with_state(
            app_state.clone(),
            middleware::require_signature,
        ));

    let app = Router::new()
        .route("/health", get(handlers::health::health_handler))
        .merge(signed_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let host = IpAddr::from_str(&api_host)
        .map_err(|error| AppError::Internal(format!("invalid API_HOST '{api_host}': {error}")))?;
    let address = SocketAddr::from((host, api_port));

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(%address, "jitgate-api listening");

    axum::serve(listener, app)
        .await
        .map_err(|error| AppError::Internal(format!("api server error: {error}")))
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
