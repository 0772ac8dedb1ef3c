use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use signbridge::{PathError, WebhookError};

use crate::credential::ConfigurationError;

/// Local failures of the gateway. Provider-side errors are not here: they are
/// passed through as [`crate::proxy::ProxyOutcome::ProviderError`].
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("invalid provider path: {0}")]
    InvalidPath(#[from] PathError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("invalid upstream response: {0}")]
    InvalidUpstreamResponse(String),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Machine-readable `error` field of the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "configuration_error",
            GatewayError::InvalidPath(_) | GatewayError::BadRequest(_) => "bad_request",
            GatewayError::UpstreamUnavailable(_) => "upstream_unavailable",
            GatewayError::InvalidUpstreamResponse(_) => "invalid_upstream_response",
            GatewayError::Webhook(WebhookError::MethodNotAllowed(_)) => "method_not_allowed",
            GatewayError::Webhook(_) => "invalid_signature",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show the caller.
    fn public_message(&self) -> String {
        match self {
            GatewayError::Configuration(_) => {
                "The signature provider is not configured on this server".to_string()
            }
            GatewayError::InvalidPath(e) => e.to_string(),
            GatewayError::BadRequest(msg) => msg.clone(),
            GatewayError::UpstreamUnavailable(_) => {
                "Failed to reach the signature provider".to_string()
            }
            GatewayError::InvalidUpstreamResponse(_) => {
                "The signature provider returned an unreadable response".to_string()
            }
            GatewayError::Webhook(e) => e.to_string(),
            GatewayError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Configuration(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::InvalidPath(_) | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamUnavailable(_) | GatewayError::InvalidUpstreamResponse(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::Webhook(WebhookError::MethodNotAllowed(_)) => {
                StatusCode::METHOD_NOT_ALLOWED
            }
            GatewayError::Webhook(_) => StatusCode::UNAUTHORIZED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "request rejected");
        }

        let mut builder = HttpResponse::build(status);
        if let GatewayError::Webhook(WebhookError::MethodNotAllowed(_)) = self {
            builder.insert_header((header::ALLOW, "POST"));
        }
        builder.json(serde_json::json!({
            "error": self.code(),
            "status": status.as_u16(),
            "message": self.public_message(),
        }))
    }
}
