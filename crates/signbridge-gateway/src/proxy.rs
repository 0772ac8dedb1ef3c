use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Method;
use std::time::Duration;

use signbridge::security::{redact, redact_value};
use signbridge::ProviderPath;

use crate::credential::CredentialProvider;
use crate::error::GatewayError;

/// Headers never forwarded from the caller. The caller's own credentials
/// are dropped; the provider credential is injected instead.
const HEADERS_TO_STRIP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "accept-encoding", // Bodies are parsed as JSON, the client does not decompress
    "content-length", // Will be recalculated
    "content-type",   // Bodies are re-serialized as JSON
    "authorization",
    "proxy-authorization",
    "cookie",
    "x-api-key",
    "x-signature",
    "forwarded",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-real-ip",
];

/// Maximum provider response body size (10 MB).
const MAX_RESPONSE_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Methods whose body is forwarded. Everything else is sent without one.
pub fn carries_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// A provider reply, successful or not. Non-2xx replies are passed through
/// with the provider's status: the caller needs its semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyOutcome {
    Success {
        status: u16,
        /// `None` when the provider sent an empty body (e.g. 204).
        body: Option<serde_json::Value>,
    },
    ProviderError {
        status: u16,
        message: String,
        /// Provider body with any echo of the credential redacted.
        body: serde_json::Value,
    },
}

impl ProxyOutcome {
    pub fn status(&self) -> u16 {
        match self {
            ProxyOutcome::Success { status, .. } | ProxyOutcome::ProviderError { status, .. } => {
                *status
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProxyOutcome::Success { .. } => "success",
            ProxyOutcome::ProviderError { .. } => "provider_error",
        }
    }

    pub fn into_response(self) -> HttpResponse {
        let status = StatusCode::from_u16(self.status()).unwrap_or(StatusCode::BAD_GATEWAY);
        match self {
            ProxyOutcome::Success { body: Some(body), .. } => {
                HttpResponse::build(status).json(body)
            }
            ProxyOutcome::Success { body: None, .. } => HttpResponse::build(status).finish(),
            ProxyOutcome::ProviderError {
                status: code,
                message,
                body,
            } => HttpResponse::build(status).json(serde_json::json!({
                "error": "provider_error",
                "status": code,
                "message": message,
                "body": body,
            })),
        }
    }
}

/// Forwards caller requests to the provider with the server-held credential.
///
/// Never retries: provider calls such as document creation are not
/// idempotent, so retry policy belongs to the caller.
pub struct ProviderProxy {
    client: reqwest::Client,
    credentials: CredentialProvider,
}

impl ProviderProxy {
    pub fn new(credentials: CredentialProvider, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            credentials,
        })
    }

    pub fn credentials(&self) -> &CredentialProvider {
        &self.credentials
    }

    /// Forward one call to `path` under the canonical base URL.
    ///
    /// `body` is sent as JSON for POST, PUT and PATCH and dropped otherwise.
    pub async fn forward(
        &self,
        method: Method,
        path: &ProviderPath,
        headers: &[(String, String)],
        body: Option<serde_json::Value>,
    ) -> Result<ProxyOutcome, GatewayError> {
        // Fails before any network traffic when the credential is missing.
        let creds = self.credentials.resolve()?;
        let url = path.join(&creds.base_url)?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(forwardable_headers(headers))
            .bearer_auth(creds.secret.expose());

        if carries_body(&method) {
            if let Some(ref body) = body {
                request = request.json(body);
            }
        }

        tracing::debug!(method = %method, path = %path, "forwarding to provider");

        let mut response = request.send().await.map_err(|e| {
            let e = e.without_url();
            tracing::warn!(method = %method, path = %path, error = %e, "provider request failed");
            if e.is_timeout() {
                GatewayError::UpstreamUnavailable("provider request timed out".to_string())
            } else {
                GatewayError::UpstreamUnavailable("provider unreachable".to_string())
            }
        })?;

        let status = response.status();

        if let Some(cl) = response.content_length() {
            if cl > MAX_RESPONSE_BODY_SIZE as u64 {
                return Err(GatewayError::InvalidUpstreamResponse(format!(
                    "provider response too large: {cl} bytes (max {MAX_RESPONSE_BODY_SIZE})"
                )));
            }
        }

        // Stream with progressive size enforcement so chunked responses
        // without Content-Length cannot exhaust memory.
        let mut body_buf = Vec::with_capacity(
            response
                .content_length()
                .map(|cl| cl as usize)
                .unwrap_or(8192)
                .min(MAX_RESPONSE_BODY_SIZE),
        );
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            tracing::warn!(path = %path, error = %e.without_url(), "failed to read provider response body");
            GatewayError::UpstreamUnavailable("failed to read provider response".to_string())
        })? {
            if body_buf.len() + chunk.len() > MAX_RESPONSE_BODY_SIZE {
                return Err(GatewayError::InvalidUpstreamResponse(format!(
                    "provider response too large (max {MAX_RESPONSE_BODY_SIZE} bytes)"
                )));
            }
            body_buf.extend_from_slice(&chunk);
        }

        let parsed = parse_body(&body_buf);
        let secret = creds.secret.expose();

        if status.is_success() {
            let body = parsed.map_err(|e| {
                tracing::warn!(
                    path = %path,
                    status = status.as_u16(),
                    error = %e,
                    "provider returned a non-JSON success body"
                );
                GatewayError::InvalidUpstreamResponse(e.to_string())
            })?;
            let body = body.map(|mut value| {
                redact_value(&mut value, secret);
                value
            });
            return Ok(ProxyOutcome::Success {
                status: status.as_u16(),
                body,
            });
        }

        // Non-JSON error bodies (e.g. an HTML 503 page) are kept as text so
        // the provider's status still reaches the caller.
        let body = match parsed {
            Ok(Some(mut value)) => {
                redact_value(&mut value, secret);
                value
            }
            Ok(None) => serde_json::Value::Null,
            Err(_) => serde_json::Value::String(redact(
                &String::from_utf8_lossy(&body_buf),
                secret,
            )),
        };
        let message = redact(&provider_message(&body, status), secret);

        tracing::info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            message = %message,
            "provider returned an error"
        );

        Ok(ProxyOutcome::ProviderError {
            status: status.as_u16(),
            message,
            body,
        })
    }
}

/// Caller headers minus the stripped set and anything not valid HTTP.
fn forwardable_headers(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name_lower = name.to_ascii_lowercase();
        if HEADERS_TO_STRIP.contains(&name_lower.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name_lower.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.append(name, value);
        }
    }
    if !map.contains_key(ACCEPT) {
        map.insert(ACCEPT, HeaderValue::from_static("application/json"));
    }
    map
}

fn parse_body(bytes: &[u8]) -> Result<Option<serde_json::Value>, serde_json::Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(bytes).map(Some)
}

/// Best human-readable message in a provider error body.
fn provider_message(body: &serde_json::Value, status: reqwest::StatusCode) -> String {
    ["message", "detail", "error_description", "error"]
        .iter()
        .find_map(|key| body.get(key).and_then(|v| v.as_str()))
        .or_else(|| body.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("provider error")
                .to_string()
        })
}
