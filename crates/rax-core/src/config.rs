//! Provider configuration.
//!
//! [`ProviderConfig`] carries everything the host application supplies for a
//! cloud account: the account number, the API key pair, the working region,
//! the endpoint string, and optional proxy settings.

use crate::error::Error;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Default authentication endpoint for US accounts.
pub const DEFAULT_AUTH_ENDPOINT: &str = "https://auth.api.rackspacecloud.com/v1.0";

const fn default_request_timeout_secs() -> u64 {
    30
}

/// Configuration for one provider account.
///
/// The endpoint may name one URL or two semicolon-separated URLs; the unified
/// router splits and classifies them. An empty endpoint falls back to the
/// default US authentication endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProviderConfig {
    /// Provider account number
    #[validate(length(min = 1))]
    pub account_number: String,

    /// API username (the "public" half of the key pair)
    #[validate(length(min = 1))]
    pub api_user: String,

    /// API key (the "private" half of the key pair)
    #[serde(skip_serializing)]
    pub api_key: SecretString,

    /// Working region id, when the host has pinned one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,

    /// Endpoint string: one URL, or two separated by ';'
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Optional HTTP proxy host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_host: Option<String>,

    /// Optional HTTP proxy port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<u16>,

    /// Request timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ProviderConfig {
    /// Create a configuration from the required account fields.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn new(
        account_number: impl Into<String>,
        api_user: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, Error> {
        let config = Self {
            account_number: account_number.into(),
            api_user: api_user.into(),
            api_key: SecretString::from(api_key.into()),
            region_id: None,
            endpoint: None,
            proxy_host: None,
            proxy_port: None,
            request_timeout_secs: default_request_timeout_secs(),
        };

        config
            .validate()
            .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
        Ok(config)
    }

    /// Set the working region.
    #[must_use]
    pub fn with_region(mut self, region_id: impl Into<String>) -> Self {
        self.region_id = Some(region_id.into());
        self
    }

    /// Set the endpoint string.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set an HTTP proxy.
    #[must_use]
    pub fn with_proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.proxy_host = Some(host.into());
        self.proxy_port = Some(port);
        self
    }

    /// Set the request timeout in seconds.
    #[must_use]
    pub const fn with_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout_secs = seconds;
        self
    }

    /// The request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The API key in the clear, for building auth headers.
    #[must_use]
    pub fn api_key_value(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// The authentication endpoint, defaulting when unset and with trailing
    /// slashes trimmed.
    #[must_use]
    pub fn auth_endpoint(&self) -> String {
        let endpoint = match self.endpoint.as_deref() {
            Some(e) if !e.trim().is_empty() => e,
            _ => return DEFAULT_AUTH_ENDPOINT.to_string(),
        };
        let mut endpoint = endpoint.to_string();
        while endpoint.ends_with('/') && endpoint != "/" {
            endpoint.pop();
        }
        endpoint
    }

    /// True when the account authenticates against the UK endpoint.
    #[must_use]
    pub fn is_uk(&self) -> bool {
        let endpoint = self.auth_endpoint();
        endpoint.starts_with("https://lon") || endpoint.starts_with("http://lon")
    }

    /// Parse and validate the authentication endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be parsed.
    pub fn parse_auth_endpoint(&self) -> Result<Url, Error> {
        Url::parse(&self.auth_endpoint())
            .map_err(|e| Error::Config(format!("Invalid endpoint URL: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig::new("12345", "someuser", "somekey").unwrap()
    }

    #[test]
    fn new_requires_account_fields() {
        assert!(ProviderConfig::new("", "user", "key").is_err());
        assert!(ProviderConfig::new("12345", "", "key").is_err());
        assert!(ProviderConfig::new("12345", "user", "key").is_ok());
    }

    #[test]
    fn auth_endpoint_defaults_when_unset() {
        assert_eq!(config().auth_endpoint(), DEFAULT_AUTH_ENDPOINT);
        assert_eq!(
            config().with_endpoint("  ").auth_endpoint(),
            DEFAULT_AUTH_ENDPOINT
        );
    }

    #[test]
    fn auth_endpoint_trims_trailing_slashes() {
        let config = config().with_endpoint("https://lon.auth.api.rackspacecloud.com/v1.0//");
        assert_eq!(
            config.auth_endpoint(),
            "https://lon.auth.api.rackspacecloud.com/v1.0"
        );
    }

    #[test]
    fn uk_detection() {
        assert!(!config().is_uk());
        assert!(config()
            .with_endpoint("https://lon.auth.api.rackspacecloud.com/v1.0")
            .is_uk());
    }

    #[test]
    fn api_key_not_serialized() {
        let json = serde_json::to_string(&config()).unwrap();
        assert!(!json.contains("somekey"));
        assert!(json.contains("someuser"));
    }

    #[test]
    fn builder_chain() {
        let config = config()
            .with_region("xORD")
            .with_endpoint("https://a/v1.0;https://b/v2")
            .with_proxy("proxy.internal", 3128)
            .with_timeout(60);

        assert_eq!(config.region_id.as_deref(), Some("xORD"));
        assert_eq!(config.proxy_port, Some(3128));
        assert_eq!(config.timeout(), Duration::from_secs(60));
    }
}
