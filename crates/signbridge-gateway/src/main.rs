use std::sync::Arc;

use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use signbridge::SqliteContractStore;
use signbridge_gateway::{config::GatewayConfig, routes, state::AppState};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = GatewayConfig::from_env().expect("Failed to load configuration");
    config.warn_on_risky_settings();
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;

    tracing::info!("Starting signbridge-gateway on port {}", port);
    tracing::info!(
        "Provider credential: {}",
        if config.credentials.is_configured() {
            "configured"
        } else {
            "missing (proxy requests will fail)"
        }
    );
    tracing::info!(
        "Webhook signatures: {}",
        if config.webhook_secret.is_some() {
            "required"
        } else {
            "disabled"
        }
    );

    // Initialize contract store
    let store = SqliteContractStore::open(&config.db_path, config.db_busy_timeout)
        .expect("Failed to initialize contract store");
    tracing::info!("Contract store initialized at: {}", config.db_path);

    // Create shared state
    let state = AppState::new(config, Arc::new(store)).expect("Failed to build application state");
    let state_data = web::Data::new(state);

    // Rate limiting only guards the outbound proxy; webhooks come from the provider.
    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
        .expect("Failed to create rate limiter config");

    HttpServer::new(move || {
        let cors = signbridge_gateway::cors::build_cors(&allowed_origins);

        App::new()
            .app_data(state_data.clone())
            .app_data(web::PayloadConfig::new(10 * 1024 * 1024)) // 10MB body limit
            .wrap(Logger::default())
            .wrap(cors)
            .configure(routes::health::configure)
            .configure(routes::webhook::configure)
            .service(routes::proxy::scope().wrap(Governor::new(&governor_conf)))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
