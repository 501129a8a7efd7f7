//! Application services and ports.

#![forbid(unsafe_code)]

mod audit_service;
mod config_service;
mod identity_ports;
mod notify_ports;
mod reconciler_service;
mod request_service;
mod signing;
mod store_ports;
#[cfg(test)]
mod test_support;
mod workflow_ports;
mod workflow_service;

pub use audit_service::{AuditActor, AuditService};
pub use config_service::{BindAccountInput, ConfigService, SetApproversInput};
pub use identity_ports::IdentityProvider;
pub use notify_ports::CallbackNotifier;
pub use reconciler_service::{ReconcilerService, SweepSummary};
pub use request_service::{
    ApproveRequestInput, CreateRequestInput, DenyRequestInput, RequestListing, RequestService,
    RevokeRequestInput,
};
pub use signing::{
    CallbackSigner, HEADER_KEY_ID, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP,
    InboundSignature, KeySet, MAX_TIMESTAMP_SKEW_SECONDS, RequestAuthenticator, SignedHeaders,
};
pub use store_ports::{
    AuditRepository, BindingRepository, NonceRepository, RequestPage, RequestQuery,
    RequestRepository, StatusUpdate,
};
pub use workflow_ports::{GrantExecution, WorkflowRepository};
pub use workflow_service::WorkflowService;
