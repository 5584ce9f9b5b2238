//! CDN distribution operations over storage containers.

use rax_core::auth::AuthContext;
use rax_core::error::{Error, Result};
use rax_core::LegacyCloud;
use serde::Deserialize;
use std::sync::Arc;

/// A CDN-published storage container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    /// Container name, which doubles as the distribution id
    pub id: String,
    /// Whether CDN serving is currently enabled
    pub deployed: bool,
    /// Public host name, without scheme
    pub dns_name: Option<String>,
    /// Full public URL of the distribution root
    pub location: Option<String>,
    /// Owning account number
    pub owner_id: String,
}

#[derive(Debug, Deserialize)]
struct DistributionJson {
    name: String,
    cdn_enabled: Option<serde_json::Value>,
    cdn_ssl_uri: Option<String>,
    cdn_uri: Option<String>,
}

fn is_enabled(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

// Strip the scheme, remembering whether it was https.
fn split_scheme(uri: &str) -> (&'static str, &str) {
    if let Some(host) = uri.strip_prefix("https://") {
        ("https://", host)
    } else if let Some(host) = uri.strip_prefix("http://") {
        ("http://", host)
    } else {
        ("http://", uri)
    }
}

impl DistributionJson {
    fn into_distribution(self, owner_id: &str) -> Distribution {
        let (prefix, dns_name) = match (self.cdn_ssl_uri.as_deref(), self.cdn_uri.as_deref()) {
            (Some(ssl), _) => {
                let (prefix, host) = split_scheme(ssl);
                (prefix, Some(host.to_string()))
            }
            (None, Some(plain)) => {
                let (_, host) = split_scheme(plain);
                ("http://", Some(host.to_string()))
            }
            (None, None) => ("http://", None),
        };
        Distribution {
            deployed: is_enabled(self.cdn_enabled.as_ref()),
            location: dns_name
                .as_deref()
                .map(|host| format!("{prefix}{host}/{}", self.name)),
            dns_name,
            id: self.name,
            owner_id: owner_id.to_string(),
        }
    }
}

/// Client for the CDN management API.
///
/// CDN state lives in custom headers on the container resource; only the
/// listing is JSON.
pub struct CdnClient {
    cloud: Arc<LegacyCloud>,
}

impl CdnClient {
    /// A CDN client over the given cloud account.
    #[must_use]
    pub fn new(cloud: Arc<LegacyCloud>) -> Self {
        Self { cloud }
    }

    fn endpoint(context: &AuthContext) -> Result<String> {
        context.cdn_url.clone().ok_or_else(|| {
            Error::NotSupported("No CDN endpoint is available to this account".into())
        })
    }

    /// List all distributions in the account.
    pub async fn list(&self) -> Result<Vec<Distribution>> {
        let context = self.cloud.auth_context().await?;
        let url = Self::endpoint(&context)?;
        let Some(body) = self
            .cloud
            .rest()
            .get_string(context.storage_token(), &url, "?format=json")
            .await?
        else {
            return Ok(Vec::new());
        };
        let records: Vec<DistributionJson> = serde_json::from_str(&body)?;
        let owner_id = &self.cloud.config().account_number;
        Ok(records
            .into_iter()
            .map(|r| r.into_distribution(owner_id))
            .collect())
    }

    /// Fetch one distribution by container name. `None` when the container
    /// is not CDN-managed or does not exist.
    pub async fn get(&self, container: &str) -> Result<Option<Distribution>> {
        let context = self.cloud.auth_context().await?;
        let url = Self::endpoint(&context)?;
        let Some(headers) = self
            .cloud
            .rest()
            .head(context.storage_token(), &url, &format!("/{container}"))
            .await?
        else {
            return Ok(None);
        };
        let deployed = headers
            .get("X-Cdn-Enabled")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        // The SSL URI wins and keeps its https scheme; a container with
        // neither URI is not a distribution.
        let (prefix, dns_name) = match (headers.get("X-Cdn-Ssl-Uri"), headers.get("X-Cdn-Uri")) {
            (Some(ssl), _) => {
                let (prefix, host) = split_scheme(ssl);
                (prefix, host.to_string())
            }
            (None, Some(plain)) => {
                let (_, host) = split_scheme(plain);
                ("http://", host.to_string())
            }
            (None, None) => return Ok(None),
        };
        Ok(Some(Distribution {
            id: container.to_string(),
            deployed,
            location: Some(format!("{prefix}{dns_name}/{container}")),
            dns_name: Some(dns_name),
            owner_id: self.cloud.config().account_number.clone(),
        }))
    }

    /// Publish a container on the CDN. Returns the distribution id.
    pub async fn create(&self, container: &str) -> Result<String> {
        self.set_enabled(container, true).await?;
        Ok(container.to_string())
    }

    /// Enable or disable CDN serving for an existing distribution.
    pub async fn update(&self, container: &str, enabled: bool) -> Result<()> {
        self.set_enabled(container, enabled).await
    }

    /// Withdraw a container from the CDN. The provider has no true delete;
    /// the distribution is disabled instead.
    pub async fn delete(&self, container: &str) -> Result<()> {
        self.set_enabled(container, false).await
    }

    async fn set_enabled(&self, container: &str, enabled: bool) -> Result<()> {
        let context = self.cloud.auth_context().await?;
        let url = Self::endpoint(&context)?;
        tracing::debug!(container, enabled, "setting CDN state");
        self.cloud
            .rest()
            .put_headers(
                context.storage_token(),
                &url,
                &format!("/{container}"),
                &[
                    ("X-Log-Retention", "True"),
                    ("X-CDN-Enabled", if enabled { "True" } else { "False" }),
                ],
            )
            .await?;
        Ok(())
    }
}
