//! Cloud Load Balancers client and data models.
//!
//! The first-generation provider never advertises a load balancer endpoint;
//! it is derived from the server management URL per region. Each balancer
//! carries exactly one listener, and nodes are resolved to servers by IP
//! address.

#![deny(missing_docs)]

pub mod client;
pub mod models;

pub use client::LoadBalancersClient;
pub use models::{
    Algorithm, BalancerState, CreateLoadBalancer, Listener, LoadBalancer, NodeRef, Protocol,
};

/// Convenient result alias that reuses the shared error type.
pub type Result<T> = rax_core::Result<T>;
