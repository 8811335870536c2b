//! The dispatch pipeline's typed error sum, and its mapping onto the
//! downstream Anthropic error envelope (spec §7, §9).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::messages::anthropic::ErrorResponse;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("model restricted")]
    ModelRestricted,
    #[error("no account available")]
    NoAccount,
    #[error("misconfigured account")]
    MisconfiguredAccount,
    #[error("upstream returned {status}")]
    UpstreamStatus { status: u16, body: String },
    #[error("failed to parse upstream response")]
    ParseError,
    #[error("transport error: {0}")]
    TransportError(String),
}

/// Shape of an upstream OpenAI-compatible error body, loosely: most
/// providers nest `type`/`message` under an `error` object, but some emit
/// them at the top level.
#[derive(Debug, Deserialize)]
struct UpstreamErrorBody {
    error: Option<UpstreamErrorObject>,
    #[serde(rename = "type")]
    top_level_type: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamErrorObject {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: Option<String>,
}

impl DispatchError {
    /// Downstream HTTP status code, per the spec §7 error table.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::PermissionDenied => StatusCode::FORBIDDEN,
            DispatchError::ModelRestricted => StatusCode::FORBIDDEN,
            DispatchError::NoAccount => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::MisconfiguredAccount => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            DispatchError::ParseError => StatusCode::BAD_GATEWAY,
            DispatchError::TransportError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Downstream Anthropic `error.type` string.
    ///
    /// For `UpstreamStatus`, this is only the fallback used when the upstream
    /// body doesn't parse into a recognizable error shape; the real forwarded
    /// type/message pair comes from [`DispatchError::upstream_error`].
    pub fn error_type(&self) -> &'static str {
        match self {
            DispatchError::PermissionDenied => "permission_error",
            DispatchError::ModelRestricted => "invalid_request_error",
            DispatchError::NoAccount => "overloaded_error",
            DispatchError::MisconfiguredAccount => "configuration_error",
            DispatchError::UpstreamStatus { status, .. } if *status == 429 => "rate_limit_error",
            DispatchError::UpstreamStatus { .. } => "api_error",
            DispatchError::ParseError => "api_error",
            DispatchError::TransportError(_) => "api_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            DispatchError::PermissionDenied => "the API key does not have permission to use this provider".into(),
            DispatchError::ModelRestricted => "the requested model is not permitted for this API key".into(),
            DispatchError::NoAccount => "no upstream account is currently available".into(),
            DispatchError::MisconfiguredAccount => "the selected upstream account is misconfigured".into(),
            DispatchError::UpstreamStatus { body, .. } => body.clone(),
            DispatchError::ParseError => "could not parse the upstream response".into(),
            DispatchError::TransportError(message) => message.clone(),
        }
    }

    /// Forwards the upstream `error.type`/`message` verbatim (spec.md §4.4
    /// step 5: "forward status and upstream error envelope"). Falls back to
    /// this gateway's own envelope only when the upstream body doesn't carry
    /// a recognizable `error` shape.
    fn upstream_error(status: u16, body: &str) -> (String, String) {
        let fallback_type = if status == 429 { "rate_limit_error" } else { "api_error" }.to_string();

        let Ok(parsed) = serde_json::from_str::<UpstreamErrorBody>(body) else {
            return (fallback_type, body.to_string());
        };

        match parsed.error {
            Some(error) => (
                error.error_type.unwrap_or(fallback_type),
                error.message.unwrap_or_else(|| body.to_string()),
            ),
            None => (
                parsed.top_level_type.unwrap_or(fallback_type),
                parsed.message.unwrap_or_else(|| body.to_string()),
            ),
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            DispatchError::UpstreamStatus { status, body } => {
                let (error_type, message) = DispatchError::upstream_error(*status, body);
                ErrorResponse::new(error_type, message)
            }
            other => ErrorResponse::new(other.error_type(), other.message()),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_forwards_nested_error_object_verbatim() {
        let (error_type, message) =
            DispatchError::upstream_error(400, r#"{"error":{"type":"invalid_request_error","message":"bad model"}}"#);
        assert_eq!(error_type, "invalid_request_error");
        assert_eq!(message, "bad model");
    }

    #[test]
    fn upstream_error_falls_back_to_raw_body_when_unparseable() {
        let (error_type, message) = DispatchError::upstream_error(500, "not json");
        assert_eq!(error_type, "api_error");
        assert_eq!(message, "not json");
    }

    #[test]
    fn upstream_error_429_defaults_to_rate_limit_error_type_when_type_missing() {
        let (error_type, _) = DispatchError::upstream_error(429, r#"{"error":{"message":"slow down"}}"#);
        assert_eq!(error_type, "rate_limit_error");
    }
}
