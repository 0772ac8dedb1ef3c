use std::env;
use std::time::Duration;

use crate::credential::{ConfigurationError, CredentialProvider};

const DEFAULT_PORT: u16 = 4040;
const DEFAULT_DB_PATH: &str = "./contracts.db";
const DEFAULT_DB_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 5;
const DEFAULT_RATE_LIMIT_RPM: u32 = 120;

#[derive(Clone)]
pub struct GatewayConfig {
    /// Provider token and canonical base URL
    pub credentials: CredentialProvider,
    /// Bound on every outbound provider call
    pub provider_timeout: Duration,
    /// HMAC secret for webhook bodies (None = signatures not checked)
    pub webhook_secret: Option<Vec<u8>>,
    /// SQLite database path
    pub db_path: String,
    /// Bound on waiting for a locked database
    pub db_busy_timeout: Duration,
    /// Server port
    pub port: u16,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Proxy rate limit, requests per minute per client
    pub rate_limit_rpm: u32,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
    /// Accept `document_rejected` after `signed_complete`
    pub allow_rejection_after_completion: bool,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("credentials", &self.credentials)
            .field("provider_timeout", &self.provider_timeout)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("db_path", &self.db_path)
            .field("db_busy_timeout", &self.db_busy_timeout)
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "allow_rejection_after_completion",
                &self.allow_rejection_after_completion,
            )
            .finish()
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source. Used by `from_env` and by tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        // Provider credential: a missing token is reported on first proxy
        // use, an unusable base URL stops start-up.
        let credentials = CredentialProvider::from_lookup(&lookup);
        if let Err(e) = credentials.base_url() {
            return Err(ConfigError::Credentials(e.clone()));
        }

        let provider_timeout = Duration::from_secs(parse_or(
            &lookup,
            "PROVIDER_TIMEOUT_SECS",
            DEFAULT_PROVIDER_TIMEOUT_SECS,
        )?);
        if provider_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                var: "PROVIDER_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        let webhook_secret = non_empty("PROVIDER_WEBHOOK_SECRET").map(String::into_bytes);

        let db_path = non_empty("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_busy_timeout = Duration::from_millis(parse_or(
            &lookup,
            "DB_BUSY_TIMEOUT_MS",
            DEFAULT_DB_BUSY_TIMEOUT_MS,
        )?);

        let port = parse_or(&lookup, "PORT", DEFAULT_PORT)?;

        let allowed_origins: Vec<String> = non_empty("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        let rate_limit_rpm = parse_or(&lookup, "RATE_LIMIT_RPM", DEFAULT_RATE_LIMIT_RPM)?;
        if rate_limit_rpm == 0 {
            return Err(ConfigError::InvalidValue {
                var: "RATE_LIMIT_RPM",
                value: "0".to_string(),
            });
        }

        let metrics_token = non_empty("METRICS_TOKEN");

        let allow_rejection_after_completion = non_empty("ALLOW_REJECTION_AFTER_COMPLETION")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            credentials,
            provider_timeout,
            webhook_secret,
            db_path,
            db_busy_timeout,
            port,
            allowed_origins,
            rate_limit_rpm,
            metrics_token,
            allow_rejection_after_completion,
        })
    }

    /// Log the settings operators most often get wrong.
    pub fn warn_on_risky_settings(&self) {
        if !self.credentials.is_configured() {
            tracing::error!(
                "PROVIDER_API_TOKEN is not set: every proxy call will fail with a configuration error"
            );
        }
        if self.webhook_secret.is_none() {
            tracing::warn!(
                "PROVIDER_WEBHOOK_SECRET not set: webhook bodies are accepted without signature checks"
            );
        }
        if self.metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set: /metrics endpoint is publicly accessible");
        }
        if self.allowed_origins.iter().any(|o| o == "*") {
            tracing::warn!("wildcard CORS origin '*' lets any site call the provider proxy");
        }
        if self.allow_rejection_after_completion {
            tracing::warn!(
                "ALLOW_REJECTION_AFTER_COMPLETION=true: completed contracts can still be rejected"
            );
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var).filter(|s| !s.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Credentials(#[from] ConfigurationError),

    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}
