use jitgate_application::{ConfigService, RequestAuthenticator, RequestService};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub request_service: RequestService,
    pub config_service: ConfigService,
    pub authenticator: RequestAuthenticator,
}
