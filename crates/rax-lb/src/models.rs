//! Load balancer domain models and JSON mapping.

use chrono::{DateTime, Utc};
use rax_compute::Server;
use serde::{Deserialize, Serialize};

/// Balancing protocol on the public listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// HTTP
    Http,
    /// HTTPS
    Https,
    /// Raw TCP, matched against the provider's protocol table by port
    RawTcp,
}

impl Protocol {
    pub(crate) fn from_wire(name: &str) -> Self {
        match name {
            "HTTP" => Self::Http,
            "HTTPS" => Self::Https,
            _ => Self::RawTcp,
        }
    }
}

/// Node distribution algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Even rotation
    RoundRobin,
    /// Fewest open connections first
    LeastConnections,
}

impl Algorithm {
    pub(crate) const fn wire_name(self) -> &'static str {
        match self {
            Self::RoundRobin => "ROUND_ROBIN",
            Self::LeastConnections => "LEAST_CONNECTIONS",
        }
    }

    pub(crate) fn from_wire(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "least_connections" => Self::LeastConnections,
            _ => Self::RoundRobin,
        }
    }
}

/// Lifecycle state of a load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalancerState {
    /// Serving traffic
    Active,
    /// Build or another transition in progress
    Pending,
}

/// The one listener a legacy load balancer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    /// Balancing protocol
    pub protocol: Protocol,
    /// Distribution algorithm
    pub algorithm: Algorithm,
    /// Port clients connect to
    pub public_port: u16,
    /// Port traffic is forwarded to on the nodes
    pub private_port: u16,
}

/// A provisioned load balancer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadBalancer {
    /// Provider load balancer id
    pub id: String,
    /// Display name, defaulting to the id
    pub name: String,
    /// Description, defaulting to the name
    pub description: String,
    /// First IPv4 virtual IP address
    pub address: Option<String>,
    /// Lifecycle state
    pub state: BalancerState,
    /// When the balancer was created
    pub created: Option<DateTime<Utc>>,
    /// The single listener
    pub listener: Listener,
    /// Server ids of the nodes, resolved by address
    pub server_ids: Vec<String>,
    /// Owning account number
    pub owner_id: String,
    /// Region the balancer runs in
    pub region_id: String,
    /// Data center within the region
    pub data_center_id: String,
}

/// A node as the provider reports it: an id and a bare address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    /// Provider node id
    pub id: String,
    /// IP address the balancer forwards to
    pub address: String,
}

/// Caller intent for load balancer creation.
#[derive(Debug, Clone)]
pub struct CreateLoadBalancer {
    /// Display name
    pub name: String,
    /// The single listener (the provider supports exactly one)
    pub listener: Listener,
    /// Servers to enlist as nodes
    pub server_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CreatedJson {
    time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VirtualIpJson {
    #[serde(rename = "ipVersion")]
    ip_version: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NodeJson {
    pub id: Option<serde_json::Value>,
    pub address: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct BalancerJson {
    id: Option<serde_json::Value>,
    name: Option<String>,
    status: Option<String>,
    port: Option<u16>,
    protocol: Option<String>,
    algorithm: Option<String>,
    #[serde(default)]
    created: CreatedJson,
    #[serde(default, rename = "virtualIps")]
    virtual_ips: Vec<VirtualIpJson>,
    #[serde(default)]
    nodes: Vec<NodeJson>,
}

#[derive(Debug, Default, Deserialize)]
struct BalancerEnvelope {
    #[serde(rename = "loadBalancer")]
    load_balancer: Option<BalancerJson>,
}

#[derive(Debug, Default, Deserialize)]
struct BalancerListEnvelope {
    #[serde(default, rename = "loadBalancers")]
    load_balancers: Vec<BalancerJson>,
}

#[derive(Debug, Default, Deserialize)]
struct NodesEnvelope {
    #[serde(default)]
    nodes: Vec<NodeJson>,
}

fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Matches a node address against a server's addresses, public side first.
fn server_with_address<'a>(servers: &'a [Server], address: &str) -> Option<&'a Server> {
    servers.iter().find(|s| {
        s.public_addresses.iter().any(|a| a == address)
            || s.private_addresses.iter().any(|a| a == address)
    })
}

impl BalancerJson {
    fn into_balancer(
        self,
        servers: &[Server],
        owner_id: &str,
        region_id: &str,
    ) -> Option<LoadBalancer> {
        let id = self.id.as_ref().and_then(id_string)?;
        let state = match self.status.as_deref() {
            Some(s) if s.eq_ignore_ascii_case("active") => BalancerState::Active,
            _ => BalancerState::Pending,
        };
        let created = self
            .created
            .time
            .as_deref()
            .and_then(|t| rax_core::time::parse_timestamp(t).ok());
        let address = self
            .virtual_ips
            .iter()
            .find(|ip| {
                ip.ip_version
                    .as_deref()
                    .is_some_and(|v| v.eq_ignore_ascii_case("ipv4"))
            })
            .and_then(|ip| ip.address.clone());

        let mut server_ids = Vec::new();
        let mut private_port = None;
        for node in &self.nodes {
            if let Some(node_address) = node.address.as_deref() {
                if let Some(server) = server_with_address(servers, node_address) {
                    server_ids.push(server.id.clone());
                }
            } else if let Some(port) = node.port {
                private_port = Some(port);
            }
        }
        let public_port = self.port.unwrap_or(0);
        let listener = Listener {
            protocol: self
                .protocol
                .as_deref()
                .map_or(Protocol::RawTcp, Protocol::from_wire),
            algorithm: self
                .algorithm
                .as_deref()
                .map_or(Algorithm::RoundRobin, Algorithm::from_wire),
            public_port,
            private_port: private_port.unwrap_or(public_port),
        };
        let name = self.name.unwrap_or_else(|| id.clone());
        Some(LoadBalancer {
            description: name.clone(),
            id,
            address,
            state,
            created,
            listener,
            server_ids,
            owner_id: owner_id.to_string(),
            region_id: region_id.to_string(),
            data_center_id: format!("{region_id}1"),
            name,
        })
    }
}

/// Parse a `{"loadBalancer": {...}}` detail body, resolving node addresses
/// against the given server list.
///
/// # Errors
///
/// Returns the underlying error when the body is not the promised JSON.
pub fn parse_load_balancer(
    body: &str,
    servers: &[Server],
    owner_id: &str,
    region_id: &str,
) -> serde_json::Result<Option<LoadBalancer>> {
    let envelope: BalancerEnvelope = serde_json::from_str(body)?;
    Ok(envelope
        .load_balancer
        .and_then(|lb| lb.into_balancer(servers, owner_id, region_id)))
}

/// Parse the ids out of a `{"loadBalancers": [...]}` summary listing.
///
/// # Errors
///
/// Returns the underlying error when the body is not the promised JSON.
pub fn parse_balancer_ids(body: &str) -> serde_json::Result<Vec<String>> {
    let envelope: BalancerListEnvelope = serde_json::from_str(body)?;
    Ok(envelope
        .load_balancers
        .into_iter()
        .filter_map(|lb| lb.id.as_ref().and_then(id_string))
        .collect())
}

/// Parse a `{"nodes": [...]}` body into node references.
///
/// # Errors
///
/// Returns the underlying error when the body is not the promised JSON.
pub fn parse_nodes(body: &str) -> serde_json::Result<Vec<NodeRef>> {
    let envelope: NodesEnvelope = serde_json::from_str(body)?;
    Ok(envelope
        .nodes
        .into_iter()
        .filter_map(|n| {
            let id = n.id.as_ref().and_then(id_string)?;
            Some(NodeRef {
                id,
                address: n.address?,
            })
        })
        .collect())
}
