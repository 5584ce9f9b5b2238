//! CDN management client for published storage containers.
//!
//! A distribution is a storage container with CDN serving switched on; its
//! state lives in custom headers on the container resource under the CDN
//! management URL, and "deleting" one merely disables serving.

#![deny(missing_docs)]

pub mod distributions;

pub use distributions::{CdnClient, Distribution};

/// Convenient result alias that reuses the shared error type.
pub type Result<T> = rax_core::Result<T>;
