use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use jitgate_application::InboundSignature;
use jitgate_core::AppError;
use tracing::warn;

use crate::error::ApiResult;
use crate::state::AppState;

/// Largest request body the signature check will buffer.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Verifies the HMAC signature headers before any handler runs.
///
/// The body is buffered because the canonical signing message covers its
/// SHA-256; the verified bytes are handed back to the router untouched. The
/// signed path is the externally visible request path exactly as received.
pub async fn require_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let (parts, body) = request.into_parts();

    let body_bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|error| AppError::Validation(format!("failed to read request body: {error}")))?;

    let header_pairs = parts
        .headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)));
    let signature = InboundSignature::from_headers(header_pairs)?;

    let method = parts.method.as_str().to_owned();
    let path = parts.uri.path().to_owned();
    if let Err(error) = state
        .authenticator
        .validate(method.as_str(), path.as_str(), &signature, &body_bytes)
        .await
    {
        warn!(
            method = method.as_str(),
            path = path.as_str(),
            error = %error,
            "signature validation failed"
        );
        return Err(error.into());
    }

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}
