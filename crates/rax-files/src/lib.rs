//! Cloud Files object storage client.
//!
//! Storage calls use the separate storage token and storage URL from the
//! authentication context. Container and object listings are plain
//! newline-separated text; object integrity on upload is verified by
//! comparing the caller's MD5 hash with the echoed ETag.

#![deny(missing_docs)]

pub mod storage;

pub use storage::{FilesClient, StorageObject, MAX_CONTAINERS, MAX_OBJECT_SIZE_BYTES};

/// Convenient result alias that reuses the shared error type.
pub type Result<T> = rax_core::Result<T>;
