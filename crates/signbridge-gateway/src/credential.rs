//! Provider credential resolution.
//!
//! The secret is read once at start-up and never changes afterwards. A
//! missing token does not stop the process (webhooks still need to be
//! acknowledged); it fails every proxy call with a configuration error
//! before any network traffic.

use std::fmt;
use url::Url;

use signbridge::constants::DEFAULT_PROVIDER_BASE_URL;

pub const TOKEN_VAR: &str = "PROVIDER_API_TOKEN";
pub const BASE_URL_VAR: &str = "PROVIDER_API_BASE_URL";

/// Provider API token. Never printed: `Debug` and `Display` redact it.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderSecret(String);

impl ProviderSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw token, for building the outbound `Authorization` header only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProviderSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProviderSecret([REDACTED])")
    }
}

impl fmt::Display for ProviderSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("provider credential is not configured ({0} is unset)")]
    MissingSecret(&'static str),

    #[error("provider base URL is invalid: {0}")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub secret: ProviderSecret,
    pub base_url: Url,
}

#[derive(Clone)]
pub struct CredentialProvider {
    secret: Option<ProviderSecret>,
    base_url: Result<Url, ConfigurationError>,
}

impl CredentialProvider {
    /// Build from raw configuration values. Blank values count as absent;
    /// an absent base URL falls back to the canonical one.
    pub fn new(secret: Option<String>, base_url: Option<String>) -> Self {
        let secret = secret
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(ProviderSecret);
        let base_url = base_url
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_PROVIDER_BASE_URL.to_string());

        Self {
            secret,
            base_url: parse_base_url(&base_url),
        }
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self::new(lookup(TOKEN_VAR), lookup(BASE_URL_VAR))
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Secret and base URL, or the reason they cannot be used.
    pub fn resolve(&self) -> Result<ProviderCredentials, ConfigurationError> {
        let base_url = self.base_url.clone()?;
        let secret = self
            .secret
            .clone()
            .ok_or(ConfigurationError::MissingSecret(TOKEN_VAR))?;
        Ok(ProviderCredentials { secret, base_url })
    }

    pub fn is_configured(&self) -> bool {
        self.resolve().is_ok()
    }

    pub fn base_url(&self) -> Result<&Url, &ConfigurationError> {
        self.base_url.as_ref()
    }
}

impl fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigurationError> {
    let url = Url::parse(raw).map_err(|e| ConfigurationError::InvalidBaseUrl(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigurationError::InvalidBaseUrl(format!(
            "{raw}: must be an absolute http(s) URL"
        )));
    }
    Ok(url)
}
