pub mod config;
pub mod cors;
pub mod credential;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use credential::{CredentialProvider, ProviderSecret};
pub use error::GatewayError;
pub use proxy::{ProviderProxy, ProxyOutcome};
pub use state::AppState;
