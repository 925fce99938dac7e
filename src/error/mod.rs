use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for gate operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Message shown to clients instead of the details of a 5xx error
const INTERNAL_ERROR_MESSAGE: &str = "An internal server error occurred";

/// Gate error types
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Missing authentication credentials")]
    MissingCredentials,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Authentication provider error: {0}")]
    Provider(String),

    #[error("Authentication provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timeout error: {0}")]
    Timeout(String),
}

impl GateError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::InvalidHeader(_) => StatusCode::BAD_REQUEST,
            GateError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GateError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            GateError::MissingCredentials => StatusCode::UNAUTHORIZED,
            GateError::Forbidden(_) => StatusCode::FORBIDDEN,
            GateError::Provider(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GateError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        ErrorResponse::from_error(&self).into_response()
    }
}

/// Error response that is still open for modification.
///
/// Authentication may need to attach headers (for example a `WWW-Authenticate`
/// challenge) to a rejection, so the translated error keeps its own header
/// collection until it is rendered.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    status: StatusCode,
    message: String,
    headers: HeaderMap,
}

impl ErrorResponse {
    /// Create an error response with an explicit status and message
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Translate an error into a client-facing response.
    ///
    /// The status comes from the error kind. Server-side failures never leak
    /// their details to the client.
    pub fn from_error(err: &GateError) -> Self {
        let status = err.status_code();
        if status.is_server_error() {
            Self::new(status, INTERNAL_ERROR_MESSAGE)
        } else {
            Self::new(status, err.to_string())
        }
    }

    /// Generic 401 without a specific cause
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16(),
        }));

        (self.status, self.headers, body).into_response()
    }
}
