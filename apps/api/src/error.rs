//! Error handling for the PeakSelf API
//!
//! A single error enum built with thiserror maps every failure to a fixed
//! HTTP status code and a stable machine-readable code, rendered through
//! Axum's IntoResponse trait as `{"code", "message", "details"?}`.
//! In production the message of 5xx errors is replaced by a response
//! mapping layer, [`sanitize_server_errors`].

use std::any::Any;

use axum::{
    async_trait,
    extract::{
        rejection::{BytesRejection, JsonRejection, PathRejection},
        FromRequest, FromRequestParts, Path, Request, State,
    },
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use thiserror::Error;

/// Message returned for server errors when sanitization is on
const GENERIC_SERVER_ERROR: &str = "internal server error";

/// Marks a response rendered from a 5xx [`ApiError`], carrying its code
#[derive(Debug, Clone, Copy)]
pub struct ServerErrorCode(pub &'static str);

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for client-side handling
    pub code: &'static str,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Main API error type
#[derive(Error, Debug)]
pub enum ApiError {
    // ========== Authentication & Authorization ==========
    /// Missing authentication credentials
    #[error("authentication required")]
    Unauthorized,

    /// Invalid token or session (expired, malformed, revoked)
    #[error("invalid authentication token: {0}")]
    InvalidToken(String),

    /// Caller lacks permission for the requested operation
    #[error("insufficient permissions: {0}")]
    Forbidden(String),

    /// Double-submit CSRF check failed
    #[error("CSRF validation failed: {0}")]
    CsrfValidation(String),

    // ========== Resource Errors ==========
    /// Requested resource not found
    #[error("{resource_type} not found: {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Resource already exists (conflict)
    #[error("{resource_type} already exists: {id}")]
    Conflict {
        resource_type: &'static str,
        id: String,
    },

    // ========== Validation Errors ==========
    /// Request validation failed
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Invalid request body format
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// Missing required field
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Request body exceeds the configured limit
    #[error("request body too large")]
    PayloadTooLarge,

    // ========== Database Errors ==========
    /// Database query failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    // ========== External Service Errors ==========
    /// Redis operation failed
    #[error("cache error: {0}")]
    Redis(#[from] redis::RedisError),

    /// OAuth provider rejected or failed the exchange
    #[error("OAuth provider error: {0}")]
    OAuth(String),

    /// HTTP client error (for external API calls)
    #[error("external service error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // ========== Rate Limiting ==========
    /// Rate limit exceeded
    #[error("rate limit exceeded, retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    // ========== Internal Errors ==========
    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal server error (catch-all for unexpected errors)
    #[error("internal server error: {0}")]
    Internal(String),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// JWT encoding error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 401 Unauthorized
            Self::Unauthorized | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            Self::Forbidden(_) | Self::CsrfValidation(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            Self::NotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Database(e) if is_unique_violation(e) => StatusCode::CONFLICT,

            // 400 Bad Request
            Self::ValidationError(_) | Self::InvalidBody(_) | Self::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }

            // 413 Payload Too Large
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,

            // 429 Too Many Requests
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 502 Bad Gateway (upstream failures)
            Self::OAuth(_) | Self::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            Self::Database(_)
            | Self::Redis(_)
            | Self::Configuration(_)
            | Self::Internal(_)
            | Self::Serialization(_)
            | Self::Jwt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for client-side handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidToken(_) => "INVALID_TOKEN",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::CsrfValidation(_) => "CSRF_VALIDATION_FAILED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Database(e) if is_unique_violation(e) => "CONFLICT",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InvalidBody(_) => "INVALID_BODY",
            Self::MissingField(_) => "MISSING_FIELD",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "CACHE_ERROR",
            Self::OAuth(_) => "OAUTH_ERROR",
            Self::HttpClient(_) => "EXTERNAL_SERVICE_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Jwt(_) => "JWT_ERROR",
        }
    }

    /// Create a not found error for a specific resource
    pub fn not_found(resource_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type,
            id: id.into(),
        }
    }

    /// Create a conflict error for a specific resource
    pub fn conflict(resource_type: &'static str, id: impl Into<String>) -> Self {
        Self::Conflict {
            resource_type,
            id: id.into(),
        }
    }

    /// Message sent to the client
    pub fn client_message(&self) -> String {
        match self {
            Self::Database(e) if is_unique_violation(e) => "resource already exists".to_string(),
            _ => self.to_string(),
        }
    }

    /// Structured details for errors a client can act on
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::MissingField(field) => Some(json!({ "field": field })),
            Self::NotFound { resource_type, .. } => Some(json!({ "resource": resource_type })),
            Self::RateLimited { retry_after } => Some(json!({ "retry_after": retry_after })),
            _ => None,
        }
    }

    /// Log the error with appropriate severity based on status code
    pub fn log(&self) {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            tracing::warn!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Request rejected"
            );
        } else {
            tracing::debug!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Client error"
            );
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.status_code();
        let error_response = ErrorResponse {
            code: self.error_code(),
            message: self.client_message(),
            details: self.details(),
        };

        // For rate limiting, add Retry-After header
        let mut response = if let Self::RateLimited { retry_after } = &self {
            (
                status,
                [("Retry-After", retry_after.to_string())],
                Json(error_response),
            )
                .into_response()
        } else {
            (status, Json(error_response)).into_response()
        };

        if status.is_server_error() {
            response
                .extensions_mut()
                .insert(ServerErrorCode(self.error_code()));
        }
        response
    }
}

/// Replace the message of 5xx API errors with a generic one
///
/// Used with `axum::middleware::map_response_with_state`; the state says
/// whether sanitization is on (production). The full error has already
/// been logged by [`ApiError::log`].
pub async fn sanitize_server_errors(State(enabled): State<bool>, response: Response) -> Response {
    if !enabled {
        return response;
    }
    let Some(ServerErrorCode(code)) = response.extensions().get::<ServerErrorCode>().copied()
    else {
        return response;
    };

    let (parts, _) = response.into_parts();
    let mut sanitized = Json(ErrorResponse {
        code,
        message: GENERIC_SERVER_ERROR.to_string(),
        details: None,
    })
    .into_response();

    *sanitized.status_mut() = parts.status;
    for (name, value) in parts.headers.iter() {
        if name != header::CONTENT_TYPE
            && name != header::CONTENT_LENGTH
            && name != header::CONTENT_ENCODING
        {
            sanitized.headers_mut().append(name, value.clone());
        }
    }
    *sanitized.extensions_mut() = parts.extensions;
    sanitized
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Whether a database error is a unique-constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

// ========== Conversion Implementations ==========

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ApiError>() {
            Ok(api_err) => api_err,
            Err(err) => Self::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge
        } else {
            Self::InvalidBody(rejection.body_text())
        }
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge
        } else {
            Self::InvalidBody(rejection.body_text())
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::ValidationError(rejection.body_text())
    }
}

/// JSON body extractor whose rejections use the API error format
///
/// Malformed JSON, a wrong content type or missing fields all become
/// `INVALID_BODY` (400) instead of Axum's plain-text rejections.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Path extractor whose rejections use the API error format
///
/// A malformed segment (e.g. a non-UUID id) becomes `VALIDATION_ERROR` (400).
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// Convert a handler panic into the standard 500 body
///
/// Used with `tower_http::catch_panic::CatchPanicLayer::custom`.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!(panic = %detail, "Request handler panicked");
    ApiError::Internal("request handler panicked".to_string()).into_response()
}
