//! Machine image resource client.

use crate::models::{parse_image, parse_image_listing, MachineImage, Platform};
use crate::servers::server_endpoint;
use rax_core::error::{Error, Result};
use rax_core::retry::{retry_on_conflict, ConflictRetryPolicy};
use rax_core::LegacyCloud;
use serde_json::json;
use std::sync::Arc;

/// Client for the machine image resource family.
pub struct ImagesClient {
    cloud: Arc<LegacyCloud>,
    retry: ConflictRetryPolicy,
}

impl ImagesClient {
    /// A client with the default retry policy.
    #[must_use]
    pub fn new(cloud: Arc<LegacyCloud>) -> Self {
        Self {
            cloud,
            retry: ConflictRetryPolicy::default(),
        }
    }

    /// Override the conflict retry policy for removals.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: ConflictRetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    fn region_key(&self) -> Option<String> {
        self.cloud.config().region_id.clone()
    }

    /// List all images in the working region. Empty when the account's token
    /// belongs to a different region.
    pub async fn list(&self) -> Result<Vec<MachineImage>> {
        if !self.cloud.is_my_region().await? {
            return Ok(Vec::new());
        }
        let context = self.cloud.auth_context().await?;
        let url = server_endpoint(&context)?;
        let region = self
            .region_key()
            .unwrap_or_else(|| context.region.id().to_string());

        let Some(body) = self
            .cloud
            .rest()
            .get_string(&context.auth_token, &url, "/images/detail")
            .await?
        else {
            return Ok(Vec::new());
        };
        Ok(parse_image_listing(
            &body,
            &self.cloud.config().account_number,
            &region,
        )?)
    }

    /// Fetch one image by id. `None` when it does not exist.
    pub async fn get(&self, image_id: &str) -> Result<Option<MachineImage>> {
        if !self.cloud.is_my_region().await? {
            return Ok(None);
        }
        let context = self.cloud.auth_context().await?;
        let url = server_endpoint(&context)?;
        let region = self
            .region_key()
            .unwrap_or_else(|| context.region.id().to_string());

        let Some(body) = self
            .cloud
            .rest()
            .get_string(&context.auth_token, &url, &format!("/images/{image_id}"))
            .await?
        else {
            return Ok(None);
        };
        Ok(parse_image(
            &body,
            &self.cloud.config().account_number,
            &region,
        )?)
    }

    /// Filter the image list by keyword and platform.
    ///
    /// The keyword matches name, description, or id; platform matching is
    /// family-wise (any Windows matches Windows, any UNIX-like matches Unix,
    /// otherwise exact) and skips images whose platform is unknown.
    pub async fn search(
        &self,
        keyword: Option<&str>,
        platform: Option<Platform>,
    ) -> Result<Vec<MachineImage>> {
        let mut matches = Vec::new();
        for image in self.list().await? {
            if let Some(wanted) = platform {
                if wanted != Platform::Unknown {
                    let have = image.platform;
                    let ok = if have == Platform::Unknown {
                        false
                    } else if wanted.is_windows() {
                        have.is_windows()
                    } else if wanted == Platform::Unix {
                        have.is_unix()
                    } else {
                        wanted == have
                    };
                    if !ok {
                        continue;
                    }
                }
            }
            if let Some(keyword) = keyword {
                if !image.name.contains(keyword)
                    && !image.description.contains(keyword)
                    && !image.id.contains(keyword)
                {
                    continue;
                }
            }
            matches.push(image);
        }
        Ok(matches)
    }

    /// Capture a server into a new image.
    ///
    /// The returned future completes when the provider accepts the capture
    /// and reports the new (still saving) image. Dropping the future does
    /// not cancel anything server-side; the capture proceeds regardless.
    pub async fn capture(&self, server_id: &str, name: &str) -> Result<MachineImage> {
        let context = self.cloud.auth_context().await?;
        if !self.cloud.is_my_region().await? {
            return Err(Error::NotSupported(format!(
                "Unable to capture images in {}",
                self.region_key()
                    .unwrap_or_else(|| context.region.id().to_string())
            )));
        }
        let server_id: i64 = server_id
            .parse()
            .map_err(|_| Error::Config(format!("Server id must be numeric: {server_id}")))?;
        let url = server_endpoint(&context)?;
        let payload = json!({"image": {"name": name, "serverId": server_id}});

        let body = self
            .cloud
            .rest()
            .post_string(
                &context.auth_token,
                &url,
                "/images",
                Some(&payload.to_string()),
            )
            .await?
            .ok_or_else(|| Error::Internal("No image was created".into()))?;
        let region = self
            .region_key()
            .unwrap_or_else(|| context.region.id().to_string());
        parse_image(&body, &self.cloud.config().account_number, &region)?
            .ok_or_else(|| Error::Internal("No image was created".into()))
    }

    /// Remove an image, retrying through conflicts while the provider
    /// finishes whatever still references it.
    pub async fn remove(&self, image_id: &str) -> Result<()> {
        let context = self.cloud.auth_context().await?;
        let url = server_endpoint(&context)?;
        let resource = format!("/images/{image_id}");

        retry_on_conflict(self.retry, || {
            let rest = self.cloud.rest().clone();
            let token = context.auth_token.clone();
            let url = url.clone();
            let resource = resource.clone();
            async move { rest.delete(&token, &url, &resource).await }
        })
        .await
    }
}
