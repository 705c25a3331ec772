//! Client-side error reporting
//!
//! `POST /errors` accepts crash reports from the SPA (often sent with
//! `navigator.sendBeacon`, which cannot set custom headers, hence the CSRF
//! exemption) and writes them to the log under the `client_error` target.
//! Beacons carry a `text/plain` content type, so the body is parsed as JSON
//! whatever the header says.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, ConnectInfo, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    middleware,
    routing::post,
    Router,
};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{extract_client_ip, rate_limit, RouteRateLimit};

/// Maximum length of the `message` field
pub const MAX_MESSAGE_LENGTH: usize = 2000;
/// Optional fields are cut to this many characters
pub const MAX_FIELD_LENGTH: usize = 8000;

#[derive(Clone)]
pub struct ErrorReportState {
    pub trust_proxy: bool,
}

/// Create the error reporting router, limited by the `error_report` bucket
pub fn errors_router(state: ErrorReportState, limit: RouteRateLimit) -> Router {
    Router::new()
        .route("/errors", post(report_error))
        .route_layer(middleware::from_fn_with_state(limit, rate_limit))
        .with_state(state)
}

/// Error report sent by the SPA
#[derive(Debug, Deserialize)]
pub struct ClientErrorReport {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl ClientErrorReport {
    /// Parse a report body of any content type
    pub fn from_body(body: &[u8]) -> ApiResult<Self> {
        serde_json::from_slice(body).map_err(|e| ApiError::InvalidBody(e.to_string()))
    }

    /// Check the message and truncate the optional fields
    pub fn sanitize(mut self) -> ApiResult<Self> {
        let message = self.message.trim();
        if message.is_empty() {
            return Err(ApiError::MissingField("message"));
        }
        if message.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(ApiError::ValidationError(format!(
                "message must be at most {} characters",
                MAX_MESSAGE_LENGTH
            )));
        }
        self.message = message.to_string();

        for field in [
            &mut self.stack,
            &mut self.url,
            &mut self.component,
            &mut self.user_agent,
        ] {
            if let Some(value) = field.as_mut() {
                truncate_chars(value, MAX_FIELD_LENGTH);
            }
        }

        Ok(self)
    }
}

fn truncate_chars(value: &mut String, max_chars: usize) {
    if let Some((idx, _)) = value.char_indices().nth(max_chars) {
        value.truncate(idx);
    }
}

/// Record a client error
///
/// # Response
/// - 202 Accepted
/// - 400 Bad Request: body is not a JSON report, or the message is missing or oversized
async fn report_error(
    State(state): State<ErrorReportState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<StatusCode> {
    let report = ClientErrorReport::from_body(&body?)?.sanitize()?;
    let client_ip = extract_client_ip(&headers, connect_info.as_ref(), state.trust_proxy);
    let user_agent = report.user_agent.as_deref().or_else(|| {
        headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
    });

    tracing::warn!(
        target: "client_error",
        message = %report.message,
        stack = report.stack.as_deref().unwrap_or(""),
        url = report.url.as_deref().unwrap_or(""),
        component = report.component.as_deref().unwrap_or(""),
        user_agent = user_agent.unwrap_or(""),
        client_ip = %client_ip,
        "Client error reported"
    );

    Ok(StatusCode::ACCEPTED)
}
