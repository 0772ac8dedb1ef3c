use std::sync::Arc;

use actix_web::{test, web, App};
use serde_json::json;

use signbridge::hmac;
use signbridge::{ContractStatus, ContractStore, InMemoryContractStore};
use signbridge_gateway::{routes, AppState, GatewayConfig};

fn make_state(
    store: Arc<InMemoryContractStore>,
    vars: &[(&str, &str)],
) -> web::Data<AppState> {
    let vars: Vec<(String, String)> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config = GatewayConfig::from_lookup(|key| {
        vars.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    })
    .unwrap();
    web::Data::new(AppState::new(config, store).unwrap())
}

fn sent_contract(store: &InMemoryContractStore, doc: &str) -> i64 {
    let draft = store.create_draft().unwrap();
    assert!(store
        .link_external_id(draft.id, doc, chrono::Utc::now())
        .unwrap());
    draft.id
}

fn event(kind: &str, doc: &str) -> String {
    json!({"event": kind, "data": {"document_id": doc}}).to_string()
}

macro_rules! webhook_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state)
                .configure(routes::health::configure)
                .configure(routes::webhook::configure),
        )
        .await
    };
}

#[actix_rt::test]
async fn test_signed_then_completed_updates_contract() {
    let store = Arc::new(InMemoryContractStore::new());
    let id = sent_contract(&store, "doc-1");
    let app = webhook_app!(make_state(store.clone(), &[]));

    for kind in ["document_signed", "document_completed"] {
        let req = test::TestRequest::post()
            .uri("/webhooks/provider")
            .insert_header(("Content-Type", "application/json"))
            .set_payload(event(kind, "doc-1"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"success": true}));
    }

    let contract = store.find_by_id(id).unwrap().unwrap();
    assert_eq!(contract.status, ContractStatus::SignedComplete);
    assert!(contract.signed_by_issuer_at.is_some());
    assert!(contract.signed_complete_at.is_some());
    assert_eq!(
        contract.last_webhook_payload.unwrap()["event"],
        "document_completed"
    );
}

#[actix_rt::test]
async fn test_non_post_is_method_not_allowed() {
    let store = Arc::new(InMemoryContractStore::new());
    let app = webhook_app!(make_state(store, &[]));

    let req = test::TestRequest::get().uri("/webhooks/provider").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 405);
    assert_eq!(resp.headers().get("allow").unwrap(), "POST");
}

#[actix_rt::test]
async fn test_malformed_and_unknown_deliveries_are_acknowledged() {
    let store = Arc::new(InMemoryContractStore::new());
    let id = sent_contract(&store, "doc-1");
    let app = webhook_app!(make_state(store.clone(), &[]));

    for payload in [
        "not json at all".to_string(),
        json!({"event": "document_signed"}).to_string(),
        event("document_signed", "doc-unknown"),
        event("document_viewed", "doc-1"),
    ] {
        let req = test::TestRequest::post()
            .uri("/webhooks/provider")
            .set_payload(payload.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200, "payload {payload}");
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
    }

    let contract = store.find_by_id(id).unwrap().unwrap();
    assert_eq!(contract.status, ContractStatus::SentForSignature);
}

#[actix_rt::test]
async fn test_signature_required_when_secret_configured() {
    let store = Arc::new(InMemoryContractStore::new());
    let id = sent_contract(&store, "doc-1");
    let app = webhook_app!(make_state(
        store.clone(),
        &[("PROVIDER_WEBHOOK_SECRET", "whsec_test")]
    ));
    let payload = event("document_signed", "doc-1");

    let req = test::TestRequest::post()
        .uri("/webhooks/provider")
        .set_payload(payload.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::post()
        .uri("/webhooks/provider")
        .insert_header(("X-Signature", "deadbeef"))
        .set_payload(payload.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    assert_eq!(
        store.find_by_id(id).unwrap().unwrap().status,
        ContractStatus::SentForSignature
    );

    let signature = hmac::sign(b"whsec_test", payload.as_bytes());
    let req = test::TestRequest::post()
        .uri("/webhooks/provider")
        .insert_header(("X-Signature", signature))
        .set_payload(payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        store.find_by_id(id).unwrap().unwrap().status,
        ContractStatus::SignedByIssuer
    );
}

#[actix_rt::test]
async fn test_health_reports_configuration() {
    let store = Arc::new(InMemoryContractStore::new());
    let app = webhook_app!(make_state(store, &[("PROVIDER_API_TOKEN", "sk_test")]));

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "signbridge-gateway");
    assert_eq!(body["provider_configured"], true);
    assert_eq!(body["webhook_signatures"], false);
}

#[actix_rt::test]
async fn test_metrics_requires_token_when_configured() {
    let store = Arc::new(InMemoryContractStore::new());
    sent_contract(&store, "doc-m");
    let app = webhook_app!(make_state(store, &[("METRICS_TOKEN", "m-token")]));

    let req = test::TestRequest::post()
        .uri("/webhooks/provider")
        .set_payload(event("document_completed", "doc-m"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::get()
        .uri("/metrics")
        .insert_header(("Authorization", "Bearer m-token"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body = test::read_body(resp).await;
    let body = String::from_utf8_lossy(&body);
    assert!(
        body.contains(
            r#"signbridge_webhook_deliveries_total{kind="document_completed",outcome="applied"}"#
        ),
        "missing labelled series in: {body}"
    );
}

#[actix_rt::test]
async fn test_sqlite_store_persists_webhook_updates() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("contracts.db");
    let store = Arc::new(
        signbridge::SqliteContractStore::open(
            db_path.to_str().unwrap(),
            std::time::Duration::from_millis(5000),
        )
        .unwrap(),
    );
    let draft = store.create_draft().unwrap();
    assert!(store
        .link_external_id(draft.id, "doc-7", chrono::Utc::now())
        .unwrap());

    let config = GatewayConfig::from_lookup(|_| None).unwrap();
    let state = web::Data::new(AppState::new(config, store.clone()).unwrap());
    let app = webhook_app!(state);

    let req = test::TestRequest::post()
        .uri("/webhooks/provider")
        .set_payload(event("document_rejected", "doc-7"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let contract = store.find_by_id(draft.id).unwrap().unwrap();
    assert_eq!(contract.status, ContractStatus::Rejected);
    assert!(contract.rejected_at.is_some());
}
