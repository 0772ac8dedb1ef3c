//! Browser origins allowed to call the gateway.
//!
//! Front ends call the provider proxy directly, so only the listed origins
//! may send credentialless cross-origin requests. The provider token never
//! crosses this boundary: callers send at most `Authorization` for their own
//! session, and the proxy strips it before forwarding.

use actix_cors::Cors;
use actix_web::http::header;

/// CORS middleware for `ALLOWED_ORIGINS`. `*` allows any origin, which
/// start-up logs as a risky setting.
pub fn build_cors(allowed_origins: &[String]) -> Cors {
    let allowed = allowed_origins.to_vec();
    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            let origin_str = origin.to_str().unwrap_or("");
            allowed.iter().any(|a| a == "*" || a == origin_str)
        })
        .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::ACCEPT,
            header::CONTENT_TYPE,
        ])
        .max_age(3600)
}
