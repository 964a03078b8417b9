//! Request-path error taxonomy
//!
//! Client-input problems are terminal 400s, an unreachable backend is a 502,
//! everything else is a 500. Response bodies only carry the status text and
//! the request id; the details go to the logs.

use axum::{
    body::Body,
    http::{Response, StatusCode, header},
};
use thiserror::Error;
use tracing::{error, warn};

/// Errors that can occur while proxying a transformed route
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProxyError {
    /// Request body is not a JSON object, or a nested field has the wrong type
    #[error("Malformed body: {0}")]
    MalformedBody(String),

    /// Requested model is missing, not a string, or not registered
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Backend refused the connection
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Any other failure (body read, serialization, transport)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MalformedBody(_) | ProxyError::UnknownModel(_) => StatusCode::BAD_REQUEST,
            ProxyError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ProxyError::MalformedBody(_) => "malformed_body",
            ProxyError::UnknownModel(_) => "unknown_model",
            ProxyError::BackendUnavailable(_) => "backend_unavailable",
            ProxyError::Internal(_) => "internal",
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::MalformedBody(_) | ProxyError::UnknownModel(_) => "invalid_request_error",
            ProxyError::BackendUnavailable(_) | ProxyError::Internal(_) => "proxy_error",
        }
    }

    /// Build the client-facing response; never includes the error details
    pub fn into_response(self, request_id: &str) -> Response<Body> {
        error_response(self.status(), self.error_type(), self.category(), request_id)
    }
}

/// Log a request-path error and turn it into a response
pub fn handle_proxy_error(error: ProxyError, request_id: &str) -> Response<Body> {
    match &error {
        ProxyError::MalformedBody(_) | ProxyError::UnknownModel(_) => {
            warn!(
                error_type = error.category(),
                error_message = %error,
                "Rejected client request"
            );
        }
        ProxyError::BackendUnavailable(_) | ProxyError::Internal(_) => {
            error!(
                error_type = error.category(),
                error_message = %error,
                "Failed to proxy request"
            );
        }
    }
    error.into_response(request_id)
}

/// Create a JSON error response with a generic message
pub fn error_response(
    status: StatusCode,
    error_type: &str,
    code: &str,
    request_id: &str,
) -> Response<Body> {
    let message = format!(
        "{} - check thinkswitch logs for more details (request id #{request_id})",
        status.canonical_reason().unwrap_or("Error")
    );
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "code": code,
            "message": message,
            "request_id": request_id,
        }
    });

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = status;
            response
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_proxy_error_display() {
        let err = ProxyError::UnknownModel("gpt-4".to_string());
        assert_eq!(err.to_string(), "Unknown model: gpt-4");

        let err = ProxyError::BackendUnavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Backend unavailable: connection refused");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::MalformedBody("x".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::UnknownModel("x".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::BackendUnavailable("x".to_string()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Internal("x".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_proxy_error_categories() {
        assert_eq!(
            ProxyError::MalformedBody("t".to_string()).category(),
            "malformed_body"
        );
        assert_eq!(
            ProxyError::UnknownModel("t".to_string()).category(),
            "unknown_model"
        );
        assert_eq!(
            ProxyError::BackendUnavailable("t".to_string()).category(),
            "backend_unavailable"
        );
        assert_eq!(ProxyError::Internal("t".to_string()).category(), "internal");
    }

    #[tokio::test]
    async fn test_response_carries_request_id_without_details() {
        let error = ProxyError::Internal("secret backend path /srv/x".to_string());
        let response = handle_proxy_error(error, "req-123");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error"]["request_id"], "req-123");
        assert_eq!(body["error"]["type"], "proxy_error");
        let message = body["error"]["message"].as_str().unwrap();
        assert!(message.starts_with("Internal Server Error"));
        assert!(message.contains("#req-123"));
        assert!(!message.contains("/srv/x"));
    }

    #[tokio::test]
    async fn test_bad_request_response() {
        let response =
            ProxyError::UnknownModel("nope".to_string()).into_response("abc");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["code"], "unknown_model");
    }
}
