//! Routing layer spanning the first-generation APIs and a modern backend.
//!
//! An account's endpoint may name one or two semicolon-separated URLs; a
//! URL ending in `v1.0` selects the first-generation backend, anything else
//! the modern one. Service accessors route per configured region against a
//! cached list of first-generation regions.
//!
//! ## Modules
//!
//! - [`backend`] - The trait seam a modern backend implements
//! - [`router`] - The unified cloud and its region-aware service accessors

#![deny(missing_docs)]

pub mod backend;
pub mod router;

pub use backend::ModernBackend;
pub use router::{
    ComputeService, ModernFactory, NetworkService, PlatformService, StorageService, UnifiedCloud,
};

/// Convenient result alias that reuses the shared error type.
pub type Result<T> = rax_core::Result<T>;
