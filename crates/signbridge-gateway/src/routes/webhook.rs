use actix_web::{web, HttpRequest, HttpResponse};
use signbridge::constants::WEBHOOK_SIGNATURE_HEADER;

use crate::error::GatewayError;
use crate::metrics::WEBHOOK_DELIVERIES;
use crate::state::AppState;

/// ANY /webhooks/provider - receive a provider lifecycle event.
///
/// Answers `{ "success": true }` for every authentic POST, whatever the
/// dispatcher made of it; see `signbridge::webhook` for why.
pub async fn receive(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let method = req.method().as_str().to_string();
    let signature = req
        .headers()
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // SQLite writes block, keep them off the async workers.
    let dispatcher = state.webhooks.clone();
    let result = web::block(move || dispatcher.receive(&method, &body, signature.as_deref()))
        .await
        .map_err(|e| GatewayError::Internal(format!("webhook worker failed: {e}")))?;

    let ack = match result {
        Ok(ack) => ack,
        Err(e) => {
            WEBHOOK_DELIVERIES
                .with_label_values(&["unparsed", "rejected"])
                .inc();
            return Err(e.into());
        }
    };

    WEBHOOK_DELIVERIES
        .with_label_values(&[ack.kind_label(), ack.label()])
        .inc();
    tracing::debug!(
        kind = ack.kind_label(),
        outcome = ack.label(),
        "webhook acknowledged"
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/webhooks/provider", web::route().to(receive));
}
