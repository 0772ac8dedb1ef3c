use std::sync::Arc;

use signbridge::{ContractStateMachine, ContractStore, TransitionPolicy, WebhookDispatcher};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::proxy::ProviderProxy;

/// Shared application state. The store is built by the entry point and
/// injected here; nothing below owns a global handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub proxy: Arc<ProviderProxy>,
    pub webhooks: Arc<WebhookDispatcher>,
}

impl AppState {
    pub fn new(config: GatewayConfig, store: Arc<dyn ContractStore>) -> Result<Self, GatewayError> {
        let proxy = ProviderProxy::new(config.credentials.clone(), config.provider_timeout)?;

        let policy = TransitionPolicy {
            allow_rejection_after_completion: config.allow_rejection_after_completion,
        };
        let machine = Arc::new(ContractStateMachine::new(store, policy));
        let webhooks = WebhookDispatcher::new(machine, config.webhook_secret.clone());

        Ok(Self {
            config: Arc::new(config),
            proxy: Arc::new(proxy),
            webhooks: Arc::new(webhooks),
        })
    }
}
