//! Cloud Servers client and data models.
//!
//! Provides typed structures and asynchronous clients for the
//! first-generation server, flavor, and machine image APIs.

#![deny(missing_docs)]

pub mod images;
pub mod models;
pub mod servers;

pub use images::ImagesClient;
pub use models::{Flavor, ImageState, MachineImage, Platform, Server, ServerState};
pub use servers::{FlavorCache, LaunchOptions, ServersClient, NAME_LIMIT, TAG_LIMIT};

/// Convenient result alias that reuses the shared error type.
pub type Result<T> = rax_core::Result<T>;
