//! Cloud Files container and object operations.

use bytes::Bytes;
use rax_core::auth::AuthContext;
use rax_core::error::{Error, Result};
use rax_core::LegacyCloud;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The provider caps each account at this many containers.
pub const MAX_CONTAINERS: u32 = 100;

/// Largest object the provider accepts in one upload.
pub const MAX_OBJECT_SIZE_BYTES: u64 = 5_000_000_000;

/// An object as reported by a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    /// Container holding the object
    pub container: String,
    /// Object name within the container
    pub name: String,
    /// Size in bytes, when the provider reported one
    pub size_bytes: Option<u64>,
}

/// Client for the Cloud Files storage API.
///
/// All calls use the storage token and the storage URL from the
/// authentication context; listings are newline-separated text rather
/// than JSON.
pub struct FilesClient {
    cloud: Arc<LegacyCloud>,
}

impl FilesClient {
    /// A storage client over the given cloud account.
    #[must_use]
    pub fn new(cloud: Arc<LegacyCloud>) -> Self {
        Self { cloud }
    }

    fn endpoint(context: &AuthContext) -> Result<String> {
        context.storage_url.clone().ok_or_else(|| {
            Error::NotSupported("No storage endpoint is available to this account".into())
        })
    }

    /// True when the account carries a usable storage endpoint.
    pub async fn is_subscribed(&self) -> Result<bool> {
        let context = self.cloud.auth_context().await?;
        Ok(context
            .storage_url
            .as_deref()
            .is_some_and(|url| url.starts_with("http")))
    }

    /// Names of all containers in the account.
    pub async fn list_containers(&self) -> Result<Vec<String>> {
        let context = self.cloud.auth_context().await?;
        let url = Self::endpoint(&context)?;
        let body = self
            .cloud
            .rest()
            .get_string(context.storage_token(), &url, "/")
            .await?;
        Ok(split_listing(body.as_deref()))
    }

    /// True when the named container exists.
    pub async fn container_exists(&self, container: &str) -> Result<bool> {
        Ok(self
            .list_containers()
            .await?
            .iter()
            .any(|name| name == container))
    }

    /// List the objects in a container, with sizes from a HEAD per object.
    pub async fn list_objects(&self, container: &str) -> Result<Vec<StorageObject>> {
        let context = self.cloud.auth_context().await?;
        let url = Self::endpoint(&context)?;
        let body = self
            .cloud
            .rest()
            .get_string(context.storage_token(), &url, &format!("/{container}"))
            .await?;
        let names = split_listing(body.as_deref());
        let mut objects = Vec::with_capacity(names.len());
        for name in names {
            let headers = self
                .cloud
                .rest()
                .head(
                    context.storage_token(),
                    &url,
                    &format!("/{container}/{name}"),
                )
                .await?;
            objects.push(StorageObject {
                container: container.to_string(),
                size_bytes: headers.as_ref().and_then(content_length),
                name,
            });
        }
        Ok(objects)
    }

    /// Create a container.
    ///
    /// When the name is taken and `find_free_name` is set, a numeric suffix
    /// is searched for after the last hyphen; otherwise the collision is an
    /// error. Returns the name actually created.
    pub async fn create_container(&self, container: &str, find_free_name: bool) -> Result<String> {
        let mut name = container.to_string();
        if self.container_exists(&name).await? {
            if !find_free_name {
                return Err(Error::Config(format!(
                    "The container {name} already exists"
                )));
            }
            name = self.find_free_name(&name).await?;
        }
        self.put_container(&name).await?;
        Ok(name)
    }

    /// PUT an empty container resource.
    pub async fn put_container(&self, container: &str) -> Result<()> {
        let context = self.cloud.auth_context().await?;
        let url = Self::endpoint(&context)?;
        tracing::debug!(container, "creating container");
        self.cloud
            .rest()
            .put_string(context.storage_token(), &url, &format!("/{container}"), None)
            .await?;
        Ok(())
    }

    /// HEAD a container. `None` when it does not exist.
    pub async fn head_container(&self, container: &str) -> Result<Option<BTreeMap<String, String>>> {
        let context = self.cloud.auth_context().await?;
        let url = Self::endpoint(&context)?;
        self.cloud
            .rest()
            .head(context.storage_token(), &url, &format!("/{container}"))
            .await
    }

    /// HEAD an object. `None` when it does not exist.
    pub async fn head_object(
        &self,
        container: &str,
        object: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let context = self.cloud.auth_context().await?;
        let url = Self::endpoint(&context)?;
        self.cloud
            .rest()
            .head(
                context.storage_token(),
                &url,
                &format!("/{container}/{object}"),
            )
            .await
    }

    /// Object size in bytes from its `Content-Length`, `None` when the
    /// object is missing or the provider reported no length.
    pub async fn object_size(&self, container: &str, object: &str) -> Result<Option<u64>> {
        Ok(self
            .head_object(container, object)
            .await?
            .as_ref()
            .and_then(content_length))
    }

    /// Download an object. `None` when it does not exist.
    pub async fn get_object(&self, container: &str, object: &str) -> Result<Option<Bytes>> {
        let context = self.cloud.auth_context().await?;
        let url = Self::endpoint(&context)?;
        let response = self
            .cloud
            .rest()
            .get_stream(
                context.storage_token(),
                &url,
                &format!("/{container}/{object}"),
            )
            .await?;
        match response {
            Some(response) => Ok(Some(response.bytes().await?)),
            None => Ok(None),
        }
    }

    /// Upload an object.
    ///
    /// When an MD5 hash is supplied and the provider echoes a different
    /// ETag, the upload fails as data corruption even on a success status.
    pub async fn put_object(
        &self,
        container: &str,
        object: &str,
        md5_hash: Option<&str>,
        body: Bytes,
    ) -> Result<()> {
        if body.len() as u64 > MAX_OBJECT_SIZE_BYTES {
            return Err(Error::Config(format!(
                "Object {object} exceeds the {MAX_OBJECT_SIZE_BYTES} byte upload limit"
            )));
        }
        let context = self.cloud.auth_context().await?;
        let url = Self::endpoint(&context)?;
        tracing::debug!(container, object, len = body.len(), "uploading object");
        self.cloud
            .rest()
            .put_stream(
                context.storage_token(),
                &url,
                &format!("/{container}/{object}"),
                md5_hash,
                body,
            )
            .await?;
        Ok(())
    }

    /// Delete an object.
    pub async fn delete_object(&self, container: &str, object: &str) -> Result<()> {
        let context = self.cloud.auth_context().await?;
        let url = Self::endpoint(&context)?;
        self.cloud
            .rest()
            .delete(
                context.storage_token(),
                &url,
                &format!("/{container}/{object}"),
            )
            .await
    }

    /// Delete a container. The provider rejects deletion of non-empty ones.
    pub async fn delete_container(&self, container: &str) -> Result<()> {
        let context = self.cloud.auth_context().await?;
        let url = Self::endpoint(&context)?;
        self.cloud
            .rest()
            .delete(context.storage_token(), &url, &format!("/{container}"))
            .await
    }

    // Numeric-suffix search preserving a dotted prefix: "logs.web" walks
    // "logs.web-1", "logs.web-2", ... until a free name turns up.
    async fn find_free_name(&self, container: &str) -> Result<String> {
        let (prefix, mut raw_name) = match container.rfind('.') {
            Some(idx) => (Some(&container[..idx]), container[idx + 1..].to_string()),
            None => (None, container.to_string()),
        };
        let mut candidate = container.to_string();
        while self.container_exists(&candidate).await? {
            raw_name = match raw_name.rfind('-') {
                None => format!("{raw_name}-1"),
                Some(idx) if idx == raw_name.len() - 1 => format!("{raw_name}1"),
                Some(idx) => match raw_name[idx + 1..].parse::<u64>() {
                    Ok(n) => format!("{}-{}", &raw_name[..idx], n + 1),
                    Err(_) => format!("{raw_name}-1"),
                },
            };
            candidate = match prefix {
                Some(prefix) => format!("{prefix}.{raw_name}"),
                None => raw_name.clone(),
            };
        }
        Ok(candidate)
    }
}

fn split_listing(body: Option<&str>) -> Vec<String> {
    let Some(body) = body else {
        return Vec::new();
    };
    let body = body.trim();
    if body.is_empty() {
        return Vec::new();
    }
    body.lines().map(|line| line.trim().to_string()).collect()
}

fn content_length(headers: &BTreeMap<String, String>) -> Option<u64> {
    headers.get("Content-Length").and_then(|v| v.parse().ok())
}
