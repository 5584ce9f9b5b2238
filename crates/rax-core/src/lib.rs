//! # rax-core
//!
//! Core types and plumbing for the first-generation Rackspace APIs.
//!
//! This crate provides the shared HTTP transport, the error decoder, the
//! authentication cache, and the fixed legacy region catalog that every
//! service client builds on.
//!
//! ## Modules
//!
//! - [`error`] - Cloud fault decoding and the common error type
//! - [`config`] - Provider account configuration
//! - [`transport`] - HTTP verbs implementing the status-code contract
//! - [`auth`] - Authentication and the per-instance token cache
//! - [`locations`] - The hardwired legacy region catalog
//! - [`retry`] - Conflict retry pacing for teardown operations
//! - [`time`] - Timestamp parsing for API payloads

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod error;
pub mod locations;
pub mod retry;
pub mod time;
pub mod transport;

// Re-export commonly used types
pub use auth::{AuthContext, LegacyCloud};
pub use config::ProviderConfig;
pub use error::{CloudErrorKind, CloudFault, Error, Result};
pub use locations::LegacyRegion;
pub use transport::RestClient;
