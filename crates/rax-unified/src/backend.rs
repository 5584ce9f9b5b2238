//! The seam for a second-generation (OpenStack-style) backend.

use async_trait::async_trait;
use rax_core::locations::{DataCenter, Region};
use rax_core::Result;

/// A connected second-generation backend.
///
/// The composing application supplies an implementation; the router only
/// needs region knowledge, capability flags, and a credential check.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModernBackend: Send + Sync {
    /// Regions this backend serves.
    async fn regions(&self) -> Result<Vec<Region>>;

    /// Data centers within one of this backend's regions.
    async fn data_centers(&self, region_id: &str) -> Result<Vec<DataCenter>>;

    /// Validate the credentials, returning the account owner on success.
    async fn test_context(&self) -> Option<String>;

    /// Whether the backend offers compute.
    fn has_compute(&self) -> bool;

    /// Whether the backend offers load balancing.
    fn has_network(&self) -> bool;

    /// Whether the backend offers object storage.
    fn has_storage(&self) -> bool;

    /// Whether the backend offers CDN management.
    fn has_platform(&self) -> bool;
}
