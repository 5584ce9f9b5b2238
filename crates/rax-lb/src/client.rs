//! Load balancer resource client.

use crate::models::{
    parse_balancer_ids, parse_load_balancer, parse_nodes, CreateLoadBalancer, LoadBalancer,
    NodeRef, Protocol,
};
use rax_compute::{Server, ServersClient};
use rax_core::auth::AuthContext;
use rax_core::error::{Error, Result};
use rax_core::locations::LegacyRegion;
use rax_core::retry::{retry_on_conflict, ConflictRetryPolicy};
use rax_core::LegacyCloud;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
struct ProtocolsEnvelope {
    #[serde(default)]
    protocols: Vec<ProtocolJson>,
}

#[derive(Debug, Default, Deserialize)]
struct ProtocolJson {
    name: Option<String>,
    port: Option<u16>,
}

/// Client for the Cloud Load Balancers resource family.
pub struct LoadBalancersClient {
    cloud: Arc<LegacyCloud>,
    retry: ConflictRetryPolicy,
}

impl LoadBalancersClient {
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

    fn region(&self, context: &AuthContext) -> LegacyRegion {
        self.cloud
            .config()
            .region_id
            .as_deref()
            .and_then(LegacyRegion::from_id)
            .unwrap_or(context.region)
    }

    fn region_key(&self, context: &AuthContext) -> String {
        self.cloud
            .config()
            .region_id
            .clone()
            .unwrap_or_else(|| context.region.id().to_string())
    }

    // The provider never advertises this endpoint; it is rewritten from the
    // server management URL per region.
    fn endpoint(&self, context: &AuthContext) -> Result<String> {
        context.load_balancer_url(self.region(context)).ok_or_else(|| {
            Error::NotSupported("No load balancer endpoint is available to this account".into())
        })
    }

    /// List all load balancers in full detail.
    ///
    /// The summary listing carries ids only, so each balancer is re-fetched
    /// individually for its nodes and virtual IPs.
    pub async fn list(&self) -> Result<Vec<LoadBalancer>> {
        let context = self.cloud.auth_context().await?;
        let url = self.endpoint(&context)?;

        let Some(body) = self
            .cloud
            .rest()
            .get_string(&context.auth_token, &url, "/loadbalancers")
            .await?
        else {
            return Ok(Vec::new());
        };
        let ids = parse_balancer_ids(&body)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let servers = ServersClient::new(Arc::clone(&self.cloud)).list().await?;
        let mut balancers = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(lb) = self.fetch(&context, &url, &id, &servers).await? {
                balancers.push(lb);
            }
        }
        Ok(balancers)
    }

    /// Fetch one load balancer by id. `None` when it does not exist.
    pub async fn get(&self, balancer_id: &str) -> Result<Option<LoadBalancer>> {
        let context = self.cloud.auth_context().await?;
        let url = self.endpoint(&context)?;
        let servers = ServersClient::new(Arc::clone(&self.cloud)).list().await?;
        self.fetch(&context, &url, balancer_id, &servers).await
    }

    async fn fetch(
        &self,
        context: &AuthContext,
        url: &str,
        balancer_id: &str,
        servers: &[Server],
    ) -> Result<Option<LoadBalancer>> {
        let Some(body) = self
            .cloud
            .rest()
            .get_string(
                &context.auth_token,
                url,
                &format!("/loadbalancers/{balancer_id}"),
            )
            .await?
        else {
            return Ok(None);
        };
        Ok(parse_load_balancer(
            &body,
            servers,
            &self.cloud.config().account_number,
            &self.region_key(context),
        )?)
    }

    /// Create a load balancer and return its id.
    ///
    /// The provider supports exactly one listener and requires at least one
    /// resolvable node. Raw-TCP listeners are matched against the protocol
    /// table by public port, defaulting to plain TCP.
    pub async fn create(&self, request: CreateLoadBalancer) -> Result<String> {
        let context = self.cloud.auth_context().await?;
        let url = self.endpoint(&context)?;
        let listener = request.listener;

        let protocol = match listener.protocol {
            Protocol::Http => "HTTP".to_string(),
            Protocol::Https => "HTTPS".to_string(),
            Protocol::RawTcp => {
                self.match_protocol(&context, &url, listener.public_port)
                    .await?
            }
        };
        let servers = ServersClient::new(Arc::clone(&self.cloud));
        let region = self.region_key(&context);
        let mut nodes = Vec::new();
        for server_id in &request.server_ids {
            let Some(server) = servers.get(server_id).await? else {
                continue;
            };
            if let Some(address) = node_address(&server, &region) {
                nodes.push(json!({
                    "address": address,
                    "condition": "ENABLED",
                    "port": listener.private_port,
                }));
            }
        }
        if nodes.is_empty() {
            return Err(Error::Config(
                "At least one node assignment is required".into(),
            ));
        }
        let payload = json!({
            "loadBalancer": {
                "name": request.name,
                "port": listener.public_port,
                "protocol": protocol,
                "algorithm": listener.algorithm.wire_name(),
                "virtualIps": [{"type": "PUBLIC"}],
                "nodes": nodes,
            }
        });
        let body = self
            .cloud
            .rest()
            .post_string(
                &context.auth_token,
                &url,
                "/loadbalancers",
                Some(&payload.to_string()),
            )
            .await?
            .ok_or_else(|| Error::Internal("No load balancer was created".into()))?;

        #[derive(Deserialize)]
        struct Created {
            #[serde(rename = "loadBalancer")]
            load_balancer: Option<serde_json::Value>,
        }
        let created: Created = serde_json::from_str(&body)?;
        created
            .load_balancer
            .as_ref()
            .and_then(|lb| lb.get("id"))
            .and_then(|id| match id {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| Error::Internal("No load balancer id in the cloud response".into()))
    }

    async fn match_protocol(
        &self,
        context: &AuthContext,
        url: &str,
        port: u16,
    ) -> Result<String> {
        let Some(body) = self
            .cloud
            .rest()
            .get_string(&context.auth_token, url, "/loadbalancers/protocols")
            .await?
        else {
            return Ok("TCP".to_string());
        };
        let envelope: ProtocolsEnvelope = serde_json::from_str(&body)?;
        Ok(envelope
            .protocols
            .into_iter()
            .find(|p| p.port == Some(port))
            .and_then(|p| p.name)
            .unwrap_or_else(|| "TCP".to_string()))
    }

    /// Enlist servers as nodes on an existing balancer.
    ///
    /// Node addresses prefer the server's private IP when it runs in the
    /// balancer's region. When a single-node add is rejected with 422 the
    /// add is retried once using the public IP.
    pub async fn add_nodes(&self, balancer_id: &str, server_ids: &[String]) -> Result<()> {
        let context = self.cloud.auth_context().await?;
        let url = self.endpoint(&context)?;
        let balancer = self
            .get(balancer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("load balancer {balancer_id}")))?;
        let port = if balancer.listener.private_port > 0 {
            balancer.listener.private_port
        } else {
            balancer.listener.public_port
        };
        if port == 0 {
            return Err(Error::Internal(
                "No port understanding exists for this load balancer".into(),
            ));
        }
        let servers = ServersClient::new(Arc::clone(&self.cloud));
        let region = self.region_key(&context);

        let nodes = self
            .build_nodes(&servers, server_ids, &region, port, false)
            .await?;
        if nodes.is_empty() {
            return Ok(());
        }
        let single = nodes.len() == 1;
        let resource = format!("/loadbalancers/{balancer_id}/nodes");
        let payload = json!({ "nodes": nodes });
        let outcome = self
            .cloud
            .rest()
            .post_string(
                &context.auth_token,
                &url,
                &resource,
                Some(&payload.to_string()),
            )
            .await;

        match outcome {
            Err(err) if err.http_code() == Some(422) && single => {
                tracing::debug!(balancer_id, "node add rejected, retrying with public IP");
                let nodes = self
                    .build_nodes(&servers, server_ids, &region, port, true)
                    .await?;
                let payload = json!({ "nodes": nodes });
                self.cloud
                    .rest()
                    .post_string(
                        &context.auth_token,
                        &url,
                        &resource,
                        Some(&payload.to_string()),
                    )
                    .await?;
                Ok(())
            }
            Err(err) => Err(err),
            Ok(_) => Ok(()),
        }
    }

    async fn build_nodes(
        &self,
        servers: &ServersClient,
        server_ids: &[String],
        region: &str,
        port: u16,
        public_only: bool,
    ) -> Result<Vec<serde_json::Value>> {
        let mut nodes = Vec::new();
        for server_id in server_ids {
            let server = servers
                .get(server_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("server {server_id}")))?;
            let address = if public_only {
                server.public_addresses.first().cloned()
            } else {
                node_address(&server, region)
            };
            let address = address.ok_or_else(|| {
                Error::Config(format!(
                    "The virtual machine {server_id} has no mappable addresses"
                ))
            })?;
            nodes.push(json!({
                "address": address,
                "condition": "ENABLED",
                "port": port,
            }));
        }
        Ok(nodes)
    }

    /// Withdraw servers from a balancer by resolving their addresses to node
    /// ids. Servers that are not enlisted are ignored.
    pub async fn remove_nodes(&self, balancer_id: &str, server_ids: &[String]) -> Result<()> {
        let context = self.cloud.auth_context().await?;
        let url = self.endpoint(&context)?;
        let node_ids = self.map_nodes(&context, balancer_id, server_ids).await?;
        if node_ids.is_empty() {
            return Ok(());
        }
        let query = node_ids
            .iter()
            .map(|id| format!("nodeId={id}"))
            .collect::<Vec<_>>()
            .join("&");

        self.cloud
            .rest()
            .delete(
                &context.auth_token,
                &url,
                &format!("/loadbalancers/{balancer_id}/nodes?{query}"),
            )
            .await
    }

    /// The raw node list of a balancer.
    pub async fn nodes(&self, balancer_id: &str) -> Result<Vec<NodeRef>> {
        let context = self.cloud.auth_context().await?;
        let url = self.endpoint(&context)?;
        let Some(body) = self
            .cloud
            .rest()
            .get_string(
                &context.auth_token,
                &url,
                &format!("/loadbalancers/{balancer_id}/nodes"),
            )
            .await?
        else {
            return Ok(Vec::new());
        };
        Ok(parse_nodes(&body)?)
    }

    async fn map_nodes(
        &self,
        context: &AuthContext,
        balancer_id: &str,
        server_ids: &[String],
    ) -> Result<BTreeSet<String>> {
        let mut node_ids = BTreeSet::new();
        if server_ids.is_empty() {
            return Ok(node_ids);
        }
        let nodes = self.nodes(balancer_id).await?;
        let servers = ServersClient::new(Arc::clone(&self.cloud));
        let region = self.region_key(context);

        for server_id in server_ids {
            let Some(server) = servers.get(server_id).await? else {
                continue;
            };
            let mut found = false;
            if server.region_id == region {
                found = match_node(&nodes, &server.private_addresses, &mut node_ids);
            }
            if !found {
                match_node(&nodes, &server.public_addresses, &mut node_ids);
            }
        }
        Ok(node_ids)
    }

    /// Delete a load balancer, retrying through conflicts while provider
    /// teardown completes.
    pub async fn remove(&self, balancer_id: &str) -> Result<()> {
        let context = self.cloud.auth_context().await?;
        let url = self.endpoint(&context)?;
        let resource = format!("/loadbalancers/{balancer_id}");

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

fn node_address(server: &Server, region: &str) -> Option<String> {
    if server.region_id == region {
        if let Some(address) = server.private_addresses.first() {
            return Some(address.clone());
        }
    }
    server.public_addresses.first().cloned()
}

fn match_node(nodes: &[NodeRef], addresses: &[String], node_ids: &mut BTreeSet<String>) -> bool {
    for address in addresses {
        if let Some(node) = nodes.iter().find(|n| &n.address == address) {
            node_ids.insert(node.id.clone());
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Algorithm, BalancerState, Listener};
    use rax_core::ProviderConfig;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // The load balancer endpoint is derived by rewriting "servers" in the
    // management URL, so the mock advertises itself under /servers.
    async fn cloud_for(server: &MockServer) -> Arc<LegacyCloud> {
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("X-Auth-User", "user"))
            .respond_with(
                ResponseTemplate::new(204)
                    .insert_header("X-Auth-Token", "tok")
                    .insert_header("X-Server-Management-Url", format!("{}/servers", server.uri()))
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

    async fn mount_servers(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/servers/servers/detail"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"servers":[
                    {"id":42,"name":"web1","status":"ACTIVE",
                     "addresses":{"public":["67.23.10.132"],"private":["10.176.42.16"]}}
                ]}"#,
            ))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/servers/servers/42"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"server":{"id":42,"name":"web1","status":"ACTIVE",
                    "addresses":{"public":["67.23.10.132"],"private":["10.176.42.16"]}}}"#,
            ))
            .mount(server)
            .await;
    }

    fn balancer_body() -> &'static str {
        r#"{"loadBalancer":{
            "id": 2000, "name": "db-pool", "port": 80, "protocol": "HTTP",
            "algorithm": "LEAST_CONNECTIONS", "status": "ACTIVE",
            "created": {"time": "2010-11-30T03:23:42Z"},
            "virtualIps": [{"id": 1000, "address": "206.10.10.210", "type": "PUBLIC", "ipVersion": "IPV4"}],
            "nodes": [{"id": 1041, "address": "10.176.42.16", "port": 80, "condition": "ENABLED"}]
        }}"#
    }

    #[tokio::test]
    async fn get_resolves_nodes_to_server_ids() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        mount_servers(&server).await;
        // Region tag is xORD; the LB endpoint is ord.loadbalancers under the
        // same host, which wiremock serves as the rewritten path on this URI.
        Mock::given(method("GET"))
            .and(path("/ord.loadbalancers/loadbalancers/2000"))
            .and(header("X-Auth-Token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(balancer_body()))
            .mount(&server)
            .await;

        let lb = LoadBalancersClient::new(cloud)
            .get("2000")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lb.id, "2000");
        assert_eq!(lb.state, BalancerState::Active);
        assert_eq!(lb.address.as_deref(), Some("206.10.10.210"));
        assert_eq!(lb.listener.algorithm, Algorithm::LeastConnections);
        assert_eq!(lb.listener.public_port, 80);
        assert_eq!(lb.server_ids, ["42"]);
        assert!(lb.created.is_some());
    }

    #[tokio::test]
    async fn create_prefers_private_address_in_region() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        mount_servers(&server).await;
        Mock::given(method("POST"))
            .and(path("/ord.loadbalancers/loadbalancers"))
            .and(body_partial_json(serde_json::json!({
                "loadBalancer": {
                    "name": "db-pool",
                    "port": 80,
                    "protocol": "HTTP",
                    "algorithm": "ROUND_ROBIN",
                    "virtualIps": [{"type": "PUBLIC"}],
                    "nodes": [{"address": "10.176.42.16", "condition": "ENABLED", "port": 8080}]
                }
            })))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_string(r#"{"loadBalancer":{"id":2000,"name":"db-pool"}}"#),
            )
            .mount(&server)
            .await;

        let request = CreateLoadBalancer {
            name: "db-pool".into(),
            listener: Listener {
                protocol: Protocol::Http,
                algorithm: Algorithm::RoundRobin,
                public_port: 80,
                private_port: 8080,
            },
            server_ids: vec!["42".into()],
        };
        let id = LoadBalancersClient::new(cloud).create(request).await.unwrap();
        assert_eq!(id, "2000");
    }

    #[tokio::test]
    async fn create_matches_raw_tcp_against_protocol_table() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        mount_servers(&server).await;
        Mock::given(method("GET"))
            .and(path("/ord.loadbalancers/loadbalancers/protocols"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"protocols":[{"name":"FTP","port":21},{"name":"SMTP","port":25}]}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ord.loadbalancers/loadbalancers"))
            .and(body_partial_json(
                serde_json::json!({"loadBalancer": {"protocol": "FTP"}}),
            ))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_string(r#"{"loadBalancer":{"id":2001}}"#),
            )
            .mount(&server)
            .await;

        let request = CreateLoadBalancer {
            name: "ftp-pool".into(),
            listener: Listener {
                protocol: Protocol::RawTcp,
                algorithm: Algorithm::RoundRobin,
                public_port: 21,
                private_port: 21,
            },
            server_ids: vec!["42".into()],
        };
        let id = LoadBalancersClient::new(cloud).create(request).await.unwrap();
        assert_eq!(id, "2001");
    }

    #[tokio::test]
    async fn single_node_422_retries_with_public_address() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        mount_servers(&server).await;
        Mock::given(method("GET"))
            .and(path("/ord.loadbalancers/loadbalancers/2000"))
            .respond_with(ResponseTemplate::new(200).set_body_string(balancer_body()))
            .mount(&server)
            .await;
        // Private address rejected once.
        Mock::given(method("POST"))
            .and(path("/ord.loadbalancers/loadbalancers/2000/nodes"))
            .and(body_partial_json(serde_json::json!({
                "nodes": [{"address": "10.176.42.16"}]
            })))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_string(r#"{"message":"node not reachable"}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ord.loadbalancers/loadbalancers/2000/nodes"))
            .and(body_partial_json(serde_json::json!({
                "nodes": [{"address": "67.23.10.132"}]
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        LoadBalancersClient::new(cloud)
            .add_nodes("2000", &["42".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn remove_nodes_resolves_addresses_to_node_ids() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        mount_servers(&server).await;
        Mock::given(method("GET"))
            .and(path("/ord.loadbalancers/loadbalancers/2000/nodes"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"nodes":[{"id":1041,"address":"10.176.42.16","port":80}]}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/ord.loadbalancers/loadbalancers/2000/nodes"))
            .and(query_param("nodeId", "1041"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        LoadBalancersClient::new(cloud)
            .remove_nodes("2000", &["42".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn remove_retries_through_conflict() {
        let server = MockServer::start().await;
        let cloud = cloud_for(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/ord.loadbalancers/loadbalancers/2000"))
            .respond_with(
                ResponseTemplate::new(409).set_body_string(r#"{"message":"pending delete"}"#),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/ord.loadbalancers/loadbalancers/2000"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let policy = ConflictRetryPolicy {
            interval: std::time::Duration::from_millis(1),
            max_elapsed: std::time::Duration::from_secs(5),
        };
        LoadBalancersClient::new(cloud)
            .with_retry_policy(policy)
            .remove("2000")
            .await
            .unwrap();
    }
}
