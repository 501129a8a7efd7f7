//! Postgres repositories and HTTP gateway clients.

#![forbid(unsafe_code)]

mod http_callback_notifier;
mod http_identity_client;
mod postgres_audit_repository;
mod postgres_binding_repository;
mod postgres_nonce_repository;
mod postgres_request_repository;
mod postgres_workflow_repository;

pub use http_callback_notifier::HttpCallbackNotifier;
pub use http_identity_client::{HttpIdentityClient, IdentityApiConfig};
pub use postgres_audit_repository::PostgresAuditRepository;
pub use postgres_binding_repository::PostgresBindingRepository;
pub use postgres_nonce_repository::PostgresNonceRepository;
pub use postgres_request_repository::PostgresRequestRepository;
pub use postgres_workflow_repository::PostgresWorkflowRepository;
