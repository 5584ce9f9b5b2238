//! Authentication against the v1.0 auth endpoint.
//!
//! One GET with the account key pair yields a token and the per-service
//! endpoint URLs as response headers. [`LegacyCloud`] memoizes the resulting
//! [`AuthContext`] for its own lifetime: exactly one authentication round
//! trip happens per cloud instance, and the token is never refreshed.

use crate::config::ProviderConfig;
use crate::error::{CloudErrorKind, CloudFault, Error, Result};
use crate::locations::LegacyRegion;
use crate::transport::{header_map, RestClient};
use reqwest::header::CONTENT_TYPE;
use tokio::sync::Mutex;

/// Token and endpoint bundle from a successful authentication.
///
/// Immutable after construction; lives as long as the owning cloud instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Token for compute and load balancer calls
    pub auth_token: String,
    /// Separate storage token, when the provider issued one
    pub storage_token: Option<String>,
    /// Cloud Servers management URL
    pub server_url: Option<String>,
    /// Cloud Files storage URL
    pub storage_url: Option<String>,
    /// CDN management URL
    pub cdn_url: Option<String>,
    /// Region tag derived from the storage URL host
    pub region: LegacyRegion,
}

impl AuthContext {
    /// The token for storage-side calls, falling back to the auth token.
    #[must_use]
    pub fn storage_token(&self) -> &str {
        self.storage_token.as_deref().unwrap_or(&self.auth_token)
    }

    /// Derive the load balancer endpoint from the server management URL.
    ///
    /// The provider never advertises this endpoint; it is the server URL
    /// with the service name rewritten per region.
    #[must_use]
    pub fn load_balancer_url(&self, region: LegacyRegion) -> Option<String> {
        let server_url = self.server_url.as_deref()?;
        match region {
            LegacyRegion::Lon => Some(server_url.replace("servers", "loadbalancers")),
            _ => Some(server_url.replace(
                "servers",
                &format!("{}.loadbalancers", region.subdomain()),
            )),
        }
    }

    fn derive_region(storage_url: Option<&str>) -> LegacyRegion {
        let Some(url) = storage_url else {
            return LegacyRegion::Ord;
        };
        let url = url.to_lowercase();
        if url.contains(".dfw") {
            LegacyRegion::Dfw
        } else if url.contains(".lon") {
            LegacyRegion::Lon
        } else {
            LegacyRegion::Ord
        }
    }
}

impl RestClient {
    /// Authenticate with the configured endpoint.
    ///
    /// Returns `Ok(None)` when the credentials are rejected (401/403, or a
    /// decoded fault classified as authentication); a populated context on
    /// 204. A 204 without an `X-Auth-Token` header violates the contract and
    /// is an internal error, not "unauthenticated".
    pub async fn authenticate(&self, config: &ProviderConfig) -> Result<Option<AuthContext>> {
        let endpoint = config.auth_endpoint();
        tracing::debug!(%endpoint, "authenticating");
        let response = self
            .request(reqwest::Method::GET, &endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header("X-Auth-User", &config.api_user)
            .header("X-Auth-Key", config.api_key_value())
            .send()
            .await?;
        let status = response.status().as_u16();
        tracing::debug!(%endpoint, status, "auth status");

        if status != 204 {
            if status == 401 || status == 403 {
                return Ok(None);
            }
            let body = response.text().await?;
            let Some(fault) = CloudFault::parse(status, &body) else {
                return Err(Error::Internal(
                    "Auth endpoint reported a missing item".to_string(),
                ));
            };
            if fault.kind == CloudErrorKind::Authentication {
                return Ok(None);
            }
            return Err(fault.into());
        }
        let headers = header_map(response.headers());
        let auth_token = headers
            .get("X-Auth-Token")
            .cloned()
            .ok_or_else(|| Error::Internal("No authentication token in cloud response".into()))?;
        let storage_url = headers.get("X-Storage-Url").cloned();
        Ok(Some(AuthContext {
            region: AuthContext::derive_region(storage_url.as_deref()),
            auth_token,
            storage_token: headers.get("X-Storage-Token").cloned(),
            server_url: headers.get("X-Server-Management-Url").cloned(),
            storage_url,
            cdn_url: headers.get("X-Cdn-Management-Url").cloned(),
        }))
    }
}

/// One first-generation cloud account: configuration, HTTP client, and the
/// memoized authentication context.
pub struct LegacyCloud {
    config: ProviderConfig,
    rest: RestClient,
    auth: Mutex<Option<AuthContext>>,
}

impl LegacyCloud {
    /// Construct a cloud instance from its configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let rest = RestClient::new(&config)?;
        Ok(Self {
            config,
            rest,
            auth: Mutex::new(None),
        })
    }

    /// The provider configuration.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The shared HTTP client.
    #[must_use]
    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// The memoized authentication context.
    ///
    /// The first caller pays the authentication round trip; concurrent
    /// callers serialize on the lock and observe its result. A rejected
    /// credential is a hard failure here — callers of a cloud instance never
    /// see "maybe not authenticated".
    pub async fn auth_context(&self) -> Result<AuthContext> {
        let mut guard = self.auth.lock().await;
        if let Some(context) = guard.as_ref() {
            return Ok(context.clone());
        }
        let context = self
            .rest
            .authenticate(&self.config)
            .await?
            .ok_or_else(|| Error::from(CloudFault::unauthorized()))?;
        *guard = Some(context.clone());
        Ok(context)
    }

    /// Validate the credentials, returning the API username on success.
    pub async fn test_context(&self) -> Option<String> {
        match self.rest.authenticate(&self.config).await {
            Ok(Some(_)) => Some(self.config.api_user.clone()),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(%err, "failed to test connection context");
                None
            }
        }
    }

    /// True when the account authenticates against the UK endpoint.
    #[must_use]
    pub fn is_uk(&self) -> bool {
        self.config.is_uk()
    }

    /// True when the configured region is the one this account's token is
    /// valid for. UK accounts serve only LON; otherwise an unset region or
    /// a region equal to the derived tag qualifies.
    pub async fn is_my_region(&self) -> Result<bool> {
        if self.is_uk() {
            return Ok(self.config.region_id.as_deref() == Some(LegacyRegion::Lon.id()));
        }
        match self.config.region_id.as_deref() {
            None => Ok(true),
            Some(region) => Ok(self.auth_context().await?.region.id() == region),
        }
    }
}
