use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Why a credential was rejected. Always surfaces as 401.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    #[error("malformed credentials: {0}")]
    Malformed(&'static str),

    #[error("invalid token")]
    InvalidToken,

    #[error("user inactive or deleted")]
    InactiveUser,
}

impl AuthenticationError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthenticationError::Malformed(_) => "malformed_credentials",
            AuthenticationError::InvalidToken => "invalid_token",
            AuthenticationError::InactiveUser => "inactive_user",
        }
    }
}

/// Integration bugs: a route or permission table that cannot be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("endpoint has no resource descriptor and does not opt out of permission checks")]
    MissingResourceDescriptor,

    #[error("no permission mapping for method {0}")]
    UnmappedMethod(String),

    #[error("invalid permission template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("method {0} is mapped more than once")]
    DuplicateMethod(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    /// No credentials on an endpoint that requires them.
    #[error("authentication credentials were not provided")]
    NotAuthenticated,

    #[error("permission denied")]
    PermissionDenied,

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn is_unauthenticated(&self) -> bool {
        matches!(self, AppError::Authentication(_) | AppError::NotAuthenticated)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Authentication(e) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                e.code(),
                e.to_string(),
            ),
            AppError::NotAuthenticated => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "not_authenticated",
                self.to_string(),
            ),
            AppError::PermissionDenied => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "permission_denied",
                "you do not have permission to perform this action".to_string(),
            ),
            AppError::Configuration(e) => {
                tracing::error!("Configuration error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "configuration_error",
                    "improperly_configured",
                    "server is misconfigured".to_string(),
                )
            }
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "not_found",
                "not found".to_string(),
            ),
            AppError::BadRequest(m) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                m.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if self.is_unauthenticated() {
            response.headers_mut().insert(
                "www-authenticate",
                HeaderValue::from_static("Token"),
            );
        }

        response
    }
}
