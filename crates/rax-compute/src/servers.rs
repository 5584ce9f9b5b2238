//! Server resource client.

use crate::images::ImagesClient;
use crate::models::{
    parse_flavor_listing, parse_server, parse_server_listing, Flavor, Platform, Server,
};
use rax_core::auth::AuthContext;
use rax_core::error::{Error, Result};
use rax_core::retry::{retry_on_conflict, ConflictRetryPolicy};
use rax_core::LegacyCloud;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Provider-imposed limit on server name length.
pub const NAME_LIMIT: usize = 30;

/// Provider-imposed limit on custom metadata tags per server.
pub const TAG_LIMIT: usize = 4;

/// Caller intent for a server launch.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Source image id
    pub image_id: String,
    /// Flavor id
    pub flavor_id: String,
    /// Host name sent to the provider (sanitized before use)
    pub host_name: String,
    /// Friendly display name recorded in metadata
    pub friendly_name: String,
    /// Description recorded in metadata
    pub description: String,
    /// Caller-supplied metadata tags, in priority order
    pub metadata: Vec<(String, String)>,
}

impl LaunchOptions {
    /// Launch options with the friendly name and description defaulting to
    /// the host name.
    #[must_use]
    pub fn new(
        image_id: impl Into<String>,
        flavor_id: impl Into<String>,
        host_name: impl Into<String>,
    ) -> Self {
        let host_name = host_name.into();
        Self {
            image_id: image_id.into(),
            flavor_id: flavor_id.into(),
            friendly_name: host_name.clone(),
            description: host_name.clone(),
            host_name,
            metadata: Vec::new(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the friendly display name.
    #[must_use]
    pub fn with_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = name.into();
        self
    }

    /// Append a metadata tag.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Bounded per-region flavor cache with explicit invalidation.
///
/// Owned by the composing application and shared between clients; flavor
/// lists are idempotent, so concurrent fills are last-writer-wins.
pub struct FlavorCache {
    capacity: usize,
    entries: Mutex<HashMap<String, Arc<Vec<Flavor>>>>,
}

impl FlavorCache {
    /// A cache holding at most `capacity` region entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, region: &str) -> Option<Arc<Vec<Flavor>>> {
        self.entries.lock().ok()?.get(region).cloned()
    }

    fn insert(&self, region: String, flavors: Vec<Flavor>) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() >= self.capacity && !entries.contains_key(&region) {
                let evict = entries.keys().next().cloned();
                if let Some(key) = evict {
                    entries.remove(&key);
                }
            }
            entries.insert(region, Arc::new(flavors));
        }
    }

    /// Drop the cached flavor list for one region.
    pub fn invalidate(&self, region: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(region);
        }
    }

    /// Drop all cached flavor lists.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl Default for FlavorCache {
    fn default() -> Self {
        Self::new(8)
    }
}

pub(crate) fn server_endpoint(context: &AuthContext) -> Result<String> {
    context.server_url.clone().ok_or_else(|| {
        Error::NotSupported("No server management endpoint is available to this account".into())
    })
}

/// Client for the Cloud Servers resource family.
pub struct ServersClient {
    cloud: Arc<LegacyCloud>,
    flavors: Arc<FlavorCache>,
    retry: ConflictRetryPolicy,
}

impl ServersClient {
    /// A client with a private default flavor cache and retry policy.
    #[must_use]
    pub fn new(cloud: Arc<LegacyCloud>) -> Self {
        Self {
            cloud,
            flavors: Arc::new(FlavorCache::default()),
            retry: ConflictRetryPolicy::default(),
        }
    }

    /// Share an externally owned flavor cache.
    #[must_use]
    pub fn with_flavor_cache(mut self, cache: Arc<FlavorCache>) -> Self {
        self.flavors = cache;
        self
    }

    /// Override the conflict retry policy for teardown calls.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: ConflictRetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    fn region_key(&self, context: &AuthContext) -> String {
        self.cloud
            .config()
            .region_id
            .clone()
            .unwrap_or_else(|| context.region.id().to_string())
    }

    /// List all servers in the working region. Empty when the account's
    /// token belongs to a different region.
    pub async fn list(&self) -> Result<Vec<Server>> {
        if !self.cloud.is_my_region().await? {
            return Ok(Vec::new());
        }
        let context = self.cloud.auth_context().await?;
        let url = server_endpoint(&context)?;
        let region = self.region_key(&context);
        let owner = &self.cloud.config().account_number;

        let Some(body) = self
            .cloud
            .rest()
            .get_string(&context.auth_token, &url, "/servers/detail")
            .await?
        else {
            return Ok(Vec::new());
        };
        Ok(parse_server_listing(&body, owner, &region)?)
    }

    /// Fetch one server by id. `None` when it does not exist.
    pub async fn get(&self, server_id: &str) -> Result<Option<Server>> {
        let context = self.cloud.auth_context().await?;
        let url = server_endpoint(&context)?;
        let region = self.region_key(&context);

        let Some(body) = self
            .cloud
            .rest()
            .get_string(&context.auth_token, &url, &format!("/servers/{server_id}"))
            .await?
        else {
            return Ok(None);
        };
        Ok(parse_server(
            &body,
            &self.cloud.config().account_number,
            &region,
        )?)
    }

    /// Launch a server.
    ///
    /// Builds the metadata tag budget, sanitizes the host name, and returns
    /// the created server including its one-time root password.
    ///
    /// # Errors
    ///
    /// Fails when the token belongs to another region, the source image does
    /// not exist, or the provider creates nothing.
    pub async fn launch(&self, options: LaunchOptions) -> Result<Server> {
        let context = self.cloud.auth_context().await?;
        let region = self.region_key(&context);
        if !self.cloud.is_my_region().await? {
            return Err(Error::NotSupported(format!(
                "Unable to launch any servers in {region}"
            )));
        }
        let image_id: i64 = options
            .image_id
            .parse()
            .map_err(|_| Error::Config(format!("Image id must be numeric: {}", options.image_id)))?;
        let flavor_id: i64 = options.flavor_id.parse().map_err(|_| {
            Error::Config(format!("Flavor id must be numeric: {}", options.flavor_id))
        })?;
        let image = ImagesClient::new(Arc::clone(&self.cloud))
            .get(&options.image_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("image {}", options.image_id)))?;

        let mut metadata = BTreeMap::new();
        let mut tag_count = 0;
        let mut safe_name = false;

        for (key, value) in &options.metadata {
            if !key.is_empty() && !value.is_empty() {
                metadata.insert(key.clone(), value.clone());
                tag_count += 1;
                if tag_count >= TAG_LIMIT {
                    break;
                }
            }
        }
        if tag_count < TAG_LIMIT && image.platform != Platform::Unknown {
            metadata.insert("dsnPlatform".to_string(), image.platform.name().to_string());
            tag_count += 1;
        }
        if tag_count < TAG_LIMIT {
            metadata.insert("dsnDescription".to_string(), options.description.clone());
            tag_count += 1;
        }
        if tag_count < TAG_LIMIT {
            metadata.insert("dsnName".to_string(), options.friendly_name.clone());
            safe_name = true;
        }
        // Outside the budget: recovers the source image id after the
        // provider mangles server-side metadata.
        metadata.insert("dsnTrueImage".to_string(), image.id.clone());

        let name = self.validate_name(&options.host_name, safe_name).await?;
        let payload = json!({
            "server": {
                "imageId": image_id,
                "flavorId": flavor_id,
                "metadata": metadata,
                "name": name,
            }
        });
        let url = server_endpoint(&context)?;
        let body = self
            .cloud
            .rest()
            .post_string(
                &context.auth_token,
                &url,
                "/servers",
                Some(&payload.to_string()),
            )
            .await?
            .ok_or_else(|| Error::Internal("No virtual machine was launched".into()))?;
        parse_server(&body, &self.cloud.config().account_number, &region)?
            .ok_or_else(|| Error::Internal("No virtual machine was launched".into()))
    }

    /// Hard-reboot a server.
    pub async fn reboot(&self, server_id: &str) -> Result<()> {
        let context = self.cloud.auth_context().await?;
        let url = server_endpoint(&context)?;
        let payload = json!({"reboot": {"type": "HARD"}});

        self.cloud
            .rest()
            .post_string(
                &context.auth_token,
                &url,
                &format!("/servers/{server_id}/action"),
                Some(&payload.to_string()),
            )
            .await?;
        Ok(())
    }

    /// Terminate a server, retrying through conflicts while provider-side
    /// teardown of dependent resources completes.
    pub async fn terminate(&self, server_id: &str) -> Result<()> {
        let context = self.cloud.auth_context().await?;
        let url = server_endpoint(&context)?;
        let resource = format!("/servers/{server_id}");

        retry_on_conflict(self.retry, || {
            let rest = self.cloud.rest().clone();
            let token = context.auth_token.clone();
            let url = url.clone();
            let resource = resource.clone();
            async move { rest.delete(&token, &url, &resource).await }
        })
        .await
    }

    /// List the flavors available in the working region, served from the
    /// shared cache when warm.
    pub async fn list_flavors(&self) -> Result<Vec<Flavor>> {
        if !self.cloud.is_my_region().await? {
            return Ok(Vec::new());
        }
        let context = self.cloud.auth_context().await?;
        let region = self.region_key(&context);
        if let Some(cached) = self.flavors.get(&region) {
            return Ok((*cached).clone());
        }
        tracing::debug!(%region, "flavor cache cold, fetching");
        let url = server_endpoint(&context)?;
        let Some(body) = self
            .cloud
            .rest()
            .get_string(&context.auth_token, &url, "/flavors/detail")
            .await?
        else {
            return Ok(Vec::new());
        };
        let flavors = parse_flavor_listing(&body)?;
        self.flavors.insert(region, flavors.clone());
        Ok(flavors)
    }

    /// Fetch one flavor by id.
    pub async fn get_flavor(&self, flavor_id: &str) -> Result<Option<Flavor>> {
        Ok(self
            .list_flavors()
            .await?
            .into_iter()
            .find(|f| f.id == flavor_id))
    }

    /// Drop the cached flavor list for the working region.
    pub async fn invalidate_flavors(&self) -> Result<()> {
        let context = self.cloud.auth_context().await?;
        self.flavors.invalidate(&self.region_key(&context));
        Ok(())
    }

    async fn server_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .list()
            .await?
            .iter()
            .any(|s| s.name.eq_ignore_ascii_case(name)))
    }

    async fn make_up_name(&self, name: &str) -> Result<String> {
        let base = if name.is_empty() { "a" } else { name };
        let mut candidate = base.to_string();
        let mut index = 1;
        while self.server_exists(&candidate).await? && index < 1_000_000 {
            candidate = format!("{base}-{index}");
            index += 1;
        }
        Ok(candidate)
    }

    /// Sanitize a server name to the provider's rules: 30-character cap,
    /// restricted alphabet, no leading digit or trailing punctuation, and a
    /// numeric suffix when the result collides with an existing server.
    async fn validate_name(&self, name: &str, safe: bool) -> Result<String> {
        let mut name = name.to_string();
        if safe {
            name = name.to_lowercase().replace(' ', "-");
        }
        if name.chars().count() > NAME_LIMIT {
            name = name.chars().take(NAME_LIMIT).collect();
        }
        let mut out = String::new();
        for c in name.chars() {
            let allowed = if safe {
                c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
            } else {
                c.is_alphanumeric() || c == '-' || c == ' '
            };
            if allowed && (!out.is_empty() || c.is_alphabetic()) {
                out.push(c);
            }
        }
        if out.is_empty() {
            return self.make_up_name(&name).await;
        }
        while !out.chars().next_back().is_some_and(char::is_alphanumeric) {
            if out.chars().count() < 2 {
                return self.make_up_name(&out).await;
            }
            out.pop();
        }
        if self.server_exists(&out).await? {
            return self.make_up_name(&out).await;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServerState;
    use rax_core::ProviderConfig;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn cloud_for(server: &MockServer) -> Arc<LegacyCloud> {
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("X-Auth-User", "user"))
            .respond_with(
                ResponseTemplate::new(204)
                    .insert_header("X-Auth-Token", "tok")
                    .insert_header("X-Server-Management-Url", server.uri())
                    .insert_header(
                        "X-Storage-Url",
                        "https://storage101.ord1.example.com/v1/ME_12345",
                    ),
            )
            .mount(server)
            .await;
        let config = ProviderConfig::new("12345", "user", "key")
            .unwrap()
            .with_endpoint(server.uri());
        Arc::new(LegacyCloud::new(config).unwrap())
    }

    fn empty_listing() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(r#"{"servers":[]}"#)
    }

    fn listing_with(name: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(format!(
            r#"{{"servers":[{{"id":7,"name":"{name}","status":"ACTIVE"}}]}}"#
        ))
    }

    #[tokio::test]
    async fn safe_name_sanitization_without_collision() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        Mock::given(method("GET"))
            .and(path("/servers/detail"))
            .respond_with(empty_listing())
            .mount(&server)
            .await;

        let client = ServersClient::new(cloud);
        assert_eq!(
            client.validate_name("My Server!!", true).await.unwrap(),
            "my-server"
        );
    }

    #[tokio::test]
    async fn safe_name_collision_appends_suffix() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        Mock::given(method("GET"))
            .and(path("/servers/detail"))
            .respond_with(listing_with("my-server"))
            .mount(&server)
            .await;

        let client = ServersClient::new(cloud);
        assert_eq!(
            client.validate_name("My Server!!", true).await.unwrap(),
            "my-server-1"
        );
    }

    #[tokio::test]
    async fn unsafe_name_strips_leading_digits_and_trailing_punctuation() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        Mock::given(method("GET"))
            .and(path("/servers/detail"))
            .respond_with(empty_listing())
            .mount(&server)
            .await;

        let client = ServersClient::new(cloud);
        assert_eq!(
            client.validate_name("9Web Box--", false).await.unwrap(),
            "Web Box"
        );
    }

    #[tokio::test]
    async fn list_maps_servers_and_drops_error_state() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        Mock::given(method("GET"))
            .and(path("/servers/detail"))
            .and(header("X-Auth-Token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"servers":[
                    {"id":1,"name":"web1","status":"ACTIVE",
                     "addresses":{"public":["1.2.3.4"],"private":["10.0.0.1"]}},
                    {"id":2,"name":"bad","status":"ERROR"}
                ]}"#,
            ))
            .mount(&server)
            .await;

        let servers = ServersClient::new(cloud).list().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, "1");
        assert_eq!(servers[0].state, ServerState::Running);
        assert_eq!(servers[0].public_addresses, ["1.2.3.4"]);
        assert_eq!(servers[0].data_center_id, "xORD1");
    }

    #[tokio::test]
    async fn get_missing_server_is_none() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        Mock::given(method("GET"))
            .and(path("/servers/999"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(ServersClient::new(cloud).get("999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn launch_builds_tag_budget_and_sends_true_image() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        Mock::given(method("GET"))
            .and(path("/servers/detail"))
            .respond_with(empty_listing())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/images/19"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"image":{"id":19,"name":"Ubuntu 10.04 LTS","status":"ACTIVE"}}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/servers"))
            .and(body_partial_json(serde_json::json!({
                "server": {
                    "imageId": 19,
                    "flavorId": 2,
                    "name": "db-box",
                    "metadata": {
                        "dsnPlatform": "UBUNTU",
                        "dsnDescription": "db box",
                        "dsnName": "DB Box",
                        "dsnTrueImage": "19"
                    }
                }
            })))
            .respond_with(ResponseTemplate::new(202).set_body_string(
                r#"{"server":{"id":42,"name":"db-box","status":"BUILD","adminPass":"s3cret"}}"#,
            ))
            .mount(&server)
            .await;

        let options = LaunchOptions::new("19", "2", "DB Box")
            .with_description("db box")
            .with_friendly_name("DB Box");
        let launched = ServersClient::new(cloud).launch(options).await.unwrap();
        assert_eq!(launched.id, "42");
        assert_eq!(launched.state, ServerState::Pending);
        assert_eq!(launched.root_password.as_deref(), Some("s3cret"));
    }

    #[tokio::test]
    async fn launch_caps_caller_tags_at_budget() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        Mock::given(method("GET"))
            .and(path("/servers/detail"))
            .respond_with(empty_listing())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/images/19"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"image":{"id":19,"name":"Ubuntu 10.04 LTS","status":"ACTIVE"}}"#,
            ))
            .mount(&server)
            .await;
        // Four caller tags exhaust the budget: no dsnPlatform, dsnDescription
        // or dsnName, but dsnTrueImage rides outside it.
        Mock::given(method("POST"))
            .and(path("/servers"))
            .and(body_partial_json(serde_json::json!({
                "server": {
                    "metadata": {
                        "t1": "v1", "t2": "v2", "t3": "v3", "t4": "v4",
                        "dsnTrueImage": "19"
                    }
                }
            })))
            .respond_with(ResponseTemplate::new(202).set_body_string(
                r#"{"server":{"id":43,"name":"box","status":"BUILD"}}"#,
            ))
            .mount(&server)
            .await;

        let mut options = LaunchOptions::new("19", "2", "box");
        for i in 1..=5 {
            options = options.with_metadata(format!("t{i}"), format!("v{i}"));
        }
        let launched = ServersClient::new(cloud).launch(options).await.unwrap();
        assert_eq!(launched.id, "43");
    }

    #[tokio::test]
    async fn flavor_cache_serves_second_call_and_invalidates() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        Mock::given(method("GET"))
            .and(path("/flavors/detail"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"flavors":[{"id":1,"name":"256 slice","ram":256,"disk":10}]}"#,
            ))
            .expect(2)
            .mount(&server)
            .await;

        let client = ServersClient::new(cloud);
        let first = client.list_flavors().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].ram_mb, Some(256));
        assert_eq!(first[0].cpu_count, 1);

        // Second call is served from the cache; third refetches.
        client.list_flavors().await.unwrap();
        client.invalidate_flavors().await.unwrap();
        client.list_flavors().await.unwrap();
    }

    #[tokio::test]
    async fn terminate_retries_through_conflicts() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/servers/7"))
            .respond_with(ResponseTemplate::new(409).set_body_string(
                r#"{"conflict":{"message":"busy"}}"#,
            ))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/servers/7"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let policy = ConflictRetryPolicy {
            interval: std::time::Duration::from_millis(1),
            max_elapsed: std::time::Duration::from_secs(5),
        };
        ServersClient::new(cloud)
            .with_retry_policy(policy)
            .terminate("7")
            .await
            .unwrap();
    }
}
