//! Routing between the first-generation backend and a modern one.
//!
//! An account endpoint may name one or two semicolon-separated URLs. A URL
//! ending in `v1.0` is first-generation; anything else belongs to the
//! modern backend. Per-region routing consults a cached list of
//! first-generation region ids, refreshed at most once a day per account.

use crate::backend::ModernBackend;
use rax_cdn::CdnClient;
use rax_compute::ServersClient;
use rax_core::error::{Error, Result};
use rax_core::locations::{self, DataCenter, Region};
use rax_core::{LegacyCloud, ProviderConfig};
use rax_files::FilesClient;
use rax_lb::LoadBalancersClient;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const LEGACY_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Builds a modern backend for a classified endpoint URL.
pub type ModernFactory =
    Box<dyn Fn(&ProviderConfig, &str) -> Result<Arc<dyn ModernBackend>> + Send + Sync>;

/// Compute service routed for the configured region.
pub enum ComputeService {
    /// Served by the first-generation API
    Legacy(ServersClient),
    /// Served by the modern backend
    Modern(Arc<dyn ModernBackend>),
}

/// Load balancing service routed for the configured region.
pub enum NetworkService {
    /// Served by the first-generation API
    Legacy(LoadBalancersClient),
    /// Served by the modern backend
    Modern(Arc<dyn ModernBackend>),
}

/// Object storage service routed for the configured region.
pub enum StorageService {
    /// Served by the first-generation API
    Legacy(FilesClient),
    /// Served by the modern backend
    Modern(Arc<dyn ModernBackend>),
}

/// CDN service routed for the configured region.
pub enum PlatformService {
    /// Served by the first-generation API
    Legacy(CdnClient),
    /// Served by the modern backend
    Modern(Arc<dyn ModernBackend>),
}

struct State {
    connected: bool,
    legacy: Option<Arc<LegacyCloud>>,
    modern: Option<Arc<dyn ModernBackend>>,
    // Cached legacy region ids and the instant the cache expires.
    legacy_regions: Option<(Instant, Vec<String>)>,
}

/// One account spanning both API generations.
///
/// Connection is lazy: the first service accessor classifies the endpoint
/// and builds the backends, exactly once.
pub struct UnifiedCloud {
    config: ProviderConfig,
    modern_factory: Option<ModernFactory>,
    state: Mutex<State>,
}

fn is_legacy_endpoint(url: &str) -> bool {
    let url = url.strip_suffix('/').unwrap_or(url);
    url.ends_with("v1.0")
}

impl UnifiedCloud {
    /// A router over the given account configuration.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            modern_factory: None,
            state: Mutex::new(State {
                connected: false,
                legacy: None,
                modern: None,
                legacy_regions: None,
            }),
        }
    }

    /// Supply the factory for modern endpoints. Without one, modern URLs in
    /// the account endpoint are ignored.
    #[must_use]
    pub fn with_modern_factory(mut self, factory: ModernFactory) -> Self {
        self.modern_factory = Some(factory);
        self
    }

    /// The account configuration.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn connect_locked(&self, state: &mut State) -> Result<()> {
        if state.connected {
            return Ok(());
        }
        let endpoint = self
            .config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Config("No endpoint was set for this account".into()))?;

        for part in endpoint.split(';').take(2) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if is_legacy_endpoint(part) {
                tracing::debug!(endpoint = part, "connecting first-generation backend");
                let config = self.config.clone().with_endpoint(part);
                state.legacy = Some(Arc::new(LegacyCloud::new(config)?));
            } else if let Some(factory) = &self.modern_factory {
                tracing::debug!(endpoint = part, "connecting modern backend");
                state.modern = Some(factory(&self.config, part)?);
            } else {
                tracing::warn!(endpoint = part, "no factory for modern endpoint, skipping");
            }
        }
        state.connected = true;
        Ok(())
    }

    async fn backends(&self) -> Result<(Option<Arc<LegacyCloud>>, Option<Arc<dyn ModernBackend>>)> {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state)?;
        Ok((state.legacy.clone(), state.modern.clone()))
    }

    /// The first-generation backend, when the endpoint named one.
    pub async fn legacy(&self) -> Result<Option<Arc<LegacyCloud>>> {
        Ok(self.backends().await?.0)
    }

    /// The modern backend, when the endpoint named one and a factory was set.
    pub async fn modern(&self) -> Result<Option<Arc<dyn ModernBackend>>> {
        Ok(self.backends().await?.1)
    }

    /// Whether a region is served by the first-generation backend.
    ///
    /// Consults a per-account cache of legacy region ids with a one-day TTL;
    /// without a legacy backend the cached list is empty.
    pub async fn is_legacy(&self, region_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state)?;

        let expired = state
            .legacy_regions
            .as_ref()
            .map_or(true, |(expires_at, _)| Instant::now() >= *expires_at);
        if expired {
            let ids = match state.legacy.as_ref() {
                Some(legacy) => locations::list_regions(legacy.is_uk())
                    .into_iter()
                    .map(|r| r.region_id)
                    .collect(),
                None => Vec::new(),
            };
            tracing::debug!(?ids, "refreshed legacy region cache");
            state.legacy_regions = Some((Instant::now() + LEGACY_CACHE_TTL, ids));
        }
        let (_, ids) = state.legacy_regions.as_ref().unwrap();
        Ok(ids.iter().any(|id| id == region_id))
    }

    async fn route_legacy(&self, legacy: Option<&Arc<LegacyCloud>>) -> Result<bool> {
        let Some(region_id) = self.config.region_id.as_deref() else {
            return Ok(false);
        };
        if legacy.is_none() {
            return Ok(false);
        }
        self.is_legacy(region_id).await
    }

    /// The compute service for the configured region. `None` when no capable
    /// backend exists, which is "service unavailable" rather than an error.
    pub async fn compute(&self) -> Result<Option<ComputeService>> {
        let (legacy, modern) = self.backends().await?;
        if self.route_legacy(legacy.as_ref()).await? {
            let legacy = legacy.unwrap();
            return Ok(Some(ComputeService::Legacy(ServersClient::new(legacy))));
        }
        Ok(modern
            .filter(|m| m.has_compute())
            .map(ComputeService::Modern))
    }

    /// The load balancing service for the configured region.
    pub async fn network(&self) -> Result<Option<NetworkService>> {
        let (legacy, modern) = self.backends().await?;
        if self.route_legacy(legacy.as_ref()).await? {
            let legacy = legacy.unwrap();
            return Ok(Some(NetworkService::Legacy(LoadBalancersClient::new(
                legacy,
            ))));
        }
        Ok(modern
            .filter(|m| m.has_network())
            .map(NetworkService::Modern))
    }

    /// The object storage service for the configured region.
    pub async fn storage(&self) -> Result<Option<StorageService>> {
        let (legacy, modern) = self.backends().await?;
        if self.route_legacy(legacy.as_ref()).await? {
            let legacy = legacy.unwrap();
            return Ok(Some(StorageService::Legacy(FilesClient::new(legacy))));
        }
        Ok(modern
            .filter(|m| m.has_storage())
            .map(StorageService::Modern))
    }

    /// The CDN service for the configured region.
    pub async fn platform(&self) -> Result<Option<PlatformService>> {
        let (legacy, modern) = self.backends().await?;
        if self.route_legacy(legacy.as_ref()).await? {
            let legacy = legacy.unwrap();
            return Ok(Some(PlatformService::Legacy(CdnClient::new(legacy))));
        }
        Ok(modern
            .filter(|m| m.has_platform())
            .map(PlatformService::Modern))
    }

    /// All regions visible to the account, modern backend first.
    pub async fn regions(&self) -> Result<Vec<Region>> {
        let (legacy, modern) = self.backends().await?;
        let mut regions = Vec::new();
        if let Some(modern) = modern {
            regions.extend(modern.regions().await?);
        }
        if let Some(legacy) = legacy {
            regions.extend(locations::list_regions(legacy.is_uk()));
        }
        Ok(regions)
    }

    /// Look a region up by id, modern backend first.
    pub async fn region(&self, region_id: &str) -> Result<Option<Region>> {
        let (legacy, modern) = self.backends().await?;
        if let Some(modern) = modern {
            if let Some(region) = modern
                .regions()
                .await?
                .into_iter()
                .find(|r| r.region_id == region_id)
            {
                return Ok(Some(region));
            }
        }
        Ok(legacy.and_then(|l| locations::find_region(l.is_uk(), region_id)))
    }

    /// Data centers of a region, delegated to whichever backend knows it.
    pub async fn data_centers(&self, region_id: &str) -> Result<Vec<DataCenter>> {
        let (legacy, modern) = self.backends().await?;
        if let Some(modern) = modern {
            if modern
                .regions()
                .await?
                .iter()
                .any(|r| r.region_id == region_id)
            {
                return modern.data_centers(region_id).await;
            }
        }
        if let Some(legacy) = legacy {
            if locations::find_region(legacy.is_uk(), region_id).is_some() {
                return Ok(locations::list_data_centers(region_id));
            }
        }
        Ok(Vec::new())
    }

    /// Look a data center up across all known regions.
    pub async fn find_data_center(&self, dc_id: &str) -> Result<Option<DataCenter>> {
        for region in self.regions().await? {
            if let Some(dc) = self
                .data_centers(&region.region_id)
                .await?
                .into_iter()
                .find(|dc| dc.dc_id == dc_id)
            {
                return Ok(Some(dc));
            }
        }
        Ok(None)
    }

    /// Validate the credentials, modern backend first. `None` on any failure.
    pub async fn test_context(&self) -> Option<String> {
        let (legacy, modern) = match self.backends().await {
            Ok(backends) => backends,
            Err(err) => {
                tracing::warn!(%err, "failed to connect for context test");
                return None;
            }
        };
        if let Some(modern) = modern {
            return modern.test_context().await;
        }
        if let Some(legacy) = legacy {
            return legacy.test_context().await;
        }
        None
    }
}
