use super::{AuthGate, Decision};
use crate::error::{ErrorResponse, GateError};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::error;

/// Axum middleware running the gate around the inner service.
///
/// Install with `axum::middleware::from_fn_with_state(gate, auth_gate_middleware)`.
/// Allowed requests reach the inner service with the [`Principal`] in their
/// extensions; redirects and rejections answer directly. Every response,
/// including redirects and errors, receives the authentication headers.
///
/// [`Principal`]: crate::auth::Principal
pub async fn auth_gate_middleware(
    State(gate): State<AuthGate>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let (decision, finalizer) = gate.decide(&parts).await;

    match decision {
        Decision::Allow(principal) => {
            parts.extensions.insert(principal);
            let response = next.run(Request::from_parts(parts, body)).await;
            finalizer.finalize(response)
        }
        Decision::Redirect(location) => finalizer.finalize(redirect_response(&location)),
        Decision::Reject(error) => finalizer.finalize(error).into_response(),
    }
}

fn redirect_response(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(e) => {
            error!(
                location = %location,
                error = %e,
                "Authentication redirected to an invalid location"
            );
            ErrorResponse::from_error(&GateError::Internal(format!(
                "Invalid redirect location: {}",
                e
            )))
            .into_response()
        }
    }
}
