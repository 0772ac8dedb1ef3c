use actix_web::{web, HttpRequest, HttpResponse, Scope};
use std::collections::BTreeMap;
use std::time::Instant;

use signbridge::constants::PROXY_PREFIX;
use signbridge::normalize;

use crate::error::GatewayError;
use crate::metrics::{PROXY_LATENCY, PROXY_REQUESTS};
use crate::proxy::carries_body;
use crate::state::AppState;

/// ANY /api/provider[/{path}] - forward to the provider with the server-held
/// credential.
pub async fn forward(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|_| GatewayError::BadRequest("unsupported HTTP method".to_string()))?;
    let method_label = method.as_str().to_string();

    let result = do_forward(&req, &state, method, body).await;

    let outcome = match &result {
        Ok((outcome, elapsed)) => {
            PROXY_LATENCY
                .with_label_values(&[outcome.label()])
                .observe(*elapsed);
            outcome.label()
        }
        Err(e) => e.code(),
    };
    PROXY_REQUESTS
        .with_label_values(&[method_label.as_str(), outcome])
        .inc();

    result.map(|(outcome, _)| outcome.into_response())
}

async fn do_forward(
    req: &HttpRequest,
    state: &AppState,
    method: reqwest::Method,
    body: web::Bytes,
) -> Result<(crate::proxy::ProxyOutcome, f64), GatewayError> {
    let query: BTreeMap<String, String> =
        url::form_urlencoded::parse(req.query_string().as_bytes())
            .into_owned()
            .collect();
    let path = normalize(req.path(), &query)?;

    let body = if carries_body(&method) {
        parse_json_body(&body)?
    } else {
        None
    };

    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let start = Instant::now();
    let outcome = state.proxy.forward(method, &path, &headers, body).await?;
    Ok((outcome, start.elapsed().as_secs_f64()))
}

fn parse_json_body(body: &[u8]) -> Result<Option<serde_json::Value>, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| GatewayError::BadRequest(format!("request body must be JSON: {e}")))
}

/// The proxy scope. The caller wraps it with rate limiting.
pub fn scope() -> Scope {
    web::scope(PROXY_PREFIX)
        .route("", web::route().to(forward))
        .route("/{path:.*}", web::route().to(forward))
}
