//! Compute domain models and the JSON mapping rules behind them.
//!
//! The first-generation API reports servers and images as loosely shaped
//! JSON; mapping is defensive throughout. An absent field becomes a default,
//! never an error, and a record in a terminal failure state is dropped
//! rather than surfaced.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operating platform of an image or server, inferred heuristically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    /// Microsoft Windows
    Windows,
    /// Ubuntu
    Ubuntu,
    /// Debian
    Debian,
    /// Fedora
    Fedora,
    /// CentOS
    Centos,
    /// Red Hat Enterprise Linux
    Rhel,
    /// Gentoo
    Gentoo,
    /// SUSE
    Suse,
    /// Some other UNIX-like system
    Unix,
    /// Could not be determined
    Unknown,
}

impl Platform {
    /// Guess a platform from free-form text such as an image name.
    #[must_use]
    pub fn guess(text: &str) -> Self {
        let text = text.to_lowercase();
        let candidates = [
            ("windows", Self::Windows),
            ("ubuntu", Self::Ubuntu),
            ("debian", Self::Debian),
            ("fedora", Self::Fedora),
            ("centos", Self::Centos),
            ("red hat", Self::Rhel),
            ("redhat", Self::Rhel),
            ("rhel", Self::Rhel),
            ("gentoo", Self::Gentoo),
            ("suse", Self::Suse),
            ("linux", Self::Unix),
            ("bsd", Self::Unix),
            ("solaris", Self::Unix),
        ];
        for (keyword, platform) in candidates {
            if text.contains(keyword) {
                return platform;
            }
        }
        Self::Unknown
    }

    /// The stable name stored in instance metadata.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Windows => "WINDOWS",
            Self::Ubuntu => "UBUNTU",
            Self::Debian => "DEBIAN",
            Self::Fedora => "FEDORA",
            Self::Centos => "CENT_OS",
            Self::Rhel => "RHEL",
            Self::Gentoo => "GENTOO",
            Self::Suse => "SUSE",
            Self::Unix => "UNIX",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse the stable metadata name back into a platform.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::Windows,
            Self::Ubuntu,
            Self::Debian,
            Self::Fedora,
            Self::Centos,
            Self::Rhel,
            Self::Gentoo,
            Self::Suse,
            Self::Unix,
            Self::Unknown,
        ]
        .into_iter()
        .find(|p| p.name() == name)
    }

    /// True for Windows variants.
    #[must_use]
    pub const fn is_windows(self) -> bool {
        matches!(self, Self::Windows)
    }

    /// True for UNIX-like platforms.
    #[must_use]
    pub const fn is_unix(self) -> bool {
        !matches!(self, Self::Windows | Self::Unknown)
    }
}

/// Lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    /// Up and serving
    Running,
    /// Build or another transition in progress
    Pending,
    /// Deleted
    Terminated,
    /// Suspended by the provider
    Suspended,
    /// Reboot in progress
    Rebooting,
}

impl ServerState {
    /// Map a provider status string. `None` means the record must be dropped
    /// (the provider reports it in a terminal error state). An unrecognized
    /// status is treated as a transition in progress.
    #[must_use]
    pub fn from_status(status: &str) -> Option<Self> {
        match status.to_lowercase().as_str() {
            "active" => Some(Self::Running),
            "build" | "building" => Some(Self::Pending),
            "deleted" => Some(Self::Terminated),
            "suspended" => Some(Self::Suspended),
            "reboot" | "hard_reboot" => Some(Self::Rebooting),
            "error" => None,
            other => {
                tracing::warn!(status = other, "unknown server status");
                Some(Self::Pending)
            }
        }
    }
}

/// Lifecycle state of a machine image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageState {
    /// Usable for launches
    Active,
    /// Capture or deletion in progress
    Pending,
}

impl ImageState {
    /// Map a provider status string; `None` drops the record.
    #[must_use]
    pub fn from_status(status: &str) -> Option<Self> {
        match status.to_lowercase().as_str() {
            "active" | "queued" | "preparing" => Some(Self::Active),
            "saving" | "deleting" => Some(Self::Pending),
            "failed" => None,
            other => {
                tracing::warn!(status = other, "unknown image status");
                Some(Self::Pending)
            }
        }
    }
}

/// A provisioned server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Server {
    /// Provider server id
    pub id: String,
    /// Server name (metadata-recovered when the provider mangled it)
    pub name: String,
    /// Description, defaulting to the name
    pub description: String,
    /// Source image id (true image recovered from metadata when present)
    pub image_id: Option<String>,
    /// Flavor id
    pub flavor_id: Option<String>,
    /// Root password, present only in launch responses
    pub root_password: Option<String>,
    /// Lifecycle state
    pub state: ServerState,
    /// Operating platform
    pub platform: Platform,
    /// Public IP addresses
    pub public_addresses: Vec<String>,
    /// Private (service-net) IP addresses
    pub private_addresses: Vec<String>,
    /// Metadata tags
    pub tags: BTreeMap<String, String>,
    /// Owning account number
    pub owner_id: String,
    /// Region the server runs in
    pub region_id: String,
    /// Data center within the region
    pub data_center_id: String,
}

impl Server {
    /// True when the server can be captured into an image.
    #[must_use]
    pub fn imagable(&self) -> bool {
        self.state == ServerState::Running
    }

    /// True when the server accepts a reboot request.
    #[must_use]
    pub fn rebootable(&self) -> bool {
        self.state == ServerState::Running
    }
}

/// Wire shape of a server record.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ServerJson {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "imageId")]
    pub image_id: Option<serde_json::Value>,
    #[serde(rename = "flavorId")]
    pub flavor_id: Option<serde_json::Value>,
    #[serde(rename = "adminPass")]
    pub admin_pass: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "hostId")]
    pub host_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub addresses: Addresses,
}

/// Public/private address block on a server record.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Addresses {
    #[serde(default)]
    pub public: Vec<String>,
    #[serde(default)]
    pub private: Vec<String>,
}

// Numeric ids arrive as JSON numbers on some fields and strings on others.
pub(crate) fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl ServerJson {
    /// Map the wire record into the domain, or drop it when it lacks an id
    /// or sits in a terminal error state.
    pub(crate) fn into_server(self, owner_id: &str, region_id: &str) -> Option<Server> {
        let id = self.id?.to_string();
        let state = match self.status.as_deref() {
            Some(status) => ServerState::from_status(status)?,
            None => ServerState::Running,
        };
        let mut name = self.name;
        let mut description = self.description;
        let mut image_id = self.image_id.as_ref().and_then(id_string);
        let mut platform = Platform::Unknown;
        let mut tags = BTreeMap::new();

        // The provider mangles names and image ids on captured servers; the
        // dsn* metadata written at launch recovers the caller's originals.
        // Only consulted when the record itself carries no description.
        if description.is_none() {
            let md = &self.metadata;
            if let Some(d) = md.get("dsnDescription") {
                description = Some(d.clone());
            } else if let Some(true_image) = md.get("dsnTrueImage").filter(|v| !v.is_empty()) {
                image_id = Some(true_image.clone());
            } else if let Some(label) = md.get("Server Label") {
                description = Some(label.clone());
            }
            if let Some(n) = md.get("dsnName").filter(|v| !v.is_empty()) {
                name = Some(n.clone());
            }
            if let Some(p) = md.get("dsnPlatform").and_then(|p| Platform::from_name(p)) {
                platform = p;
            }
            tags = self.metadata.clone();
            if let Some(host) = self.host_id {
                tags.insert("host".to_string(), host);
            }
        }
        let name = name.unwrap_or_else(|| id.clone());
        let description = description.unwrap_or_else(|| name.clone());
        if platform == Platform::Unknown {
            platform = Platform::guess(&format!("{name} {description}"));
        }
        Some(Server {
            id,
            image_id,
            flavor_id: self.flavor_id.as_ref().and_then(id_string),
            root_password: self.admin_pass,
            state,
            platform,
            public_addresses: self.addresses.public,
            private_addresses: self.addresses.private,
            tags,
            owner_id: owner_id.to_string(),
            region_id: region_id.to_string(),
            data_center_id: format!("{region_id}1"),
            name,
            description,
        })
    }
}

/// A server flavor (hardware profile).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flavor {
    /// Provider flavor id
    pub id: String,
    /// Display name, defaulting to the id
    pub name: String,
    /// Description, defaulting to the name
    pub description: String,
    /// RAM in megabytes
    pub ram_mb: Option<u32>,
    /// Root disk in gigabytes
    pub disk_gb: Option<u32>,
    /// CPU count (the legacy API never reports one; fixed at 1)
    pub cpu_count: u32,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FlavorJson {
    pub id: Option<serde_json::Value>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub ram: Option<u32>,
    pub disk: Option<u32>,
}

impl FlavorJson {
    pub(crate) fn into_flavor(self) -> Option<Flavor> {
        let id = self.id.as_ref().and_then(id_string)?;
        let name = self.name.unwrap_or_else(|| id.clone());
        Some(Flavor {
            description: self.description.unwrap_or_else(|| name.clone()),
            id,
            name,
            ram_mb: self.ram,
            disk_gb: self.disk,
            cpu_count: 1,
        })
    }
}

/// A machine image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineImage {
    /// Provider image id
    pub id: String,
    /// Display name, defaulting to the id
    pub name: String,
    /// Description, defaulting to the name
    pub description: String,
    /// Lifecycle state
    pub state: ImageState,
    /// Platform guessed from name and description
    pub platform: Platform,
    /// Owning account number
    pub owner_id: String,
    /// Region the image lives in
    pub region_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ImageJson {
    pub id: Option<serde_json::Value>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

impl ImageJson {
    pub(crate) fn into_image(self, owner_id: &str, region_id: &str) -> Option<MachineImage> {
        let id = self.id.as_ref().and_then(id_string)?;
        let state = match self.status.as_deref() {
            Some(status) => ImageState::from_status(status)?,
            None => ImageState::Active,
        };
        let name = self.name.unwrap_or_else(|| id.clone());
        let description = self.description.unwrap_or_else(|| name.clone());
        let platform = Platform::guess(&format!("{name} {description}"));
        Some(MachineImage {
            id,
            state,
            platform,
            owner_id: owner_id.to_string(),
            region_id: region_id.to_string(),
            name,
            description,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ServersEnvelope {
    #[serde(default)]
    servers: Vec<ServerJson>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerEnvelope {
    server: Option<ServerJson>,
}

#[derive(Debug, Default, Deserialize)]
struct FlavorsEnvelope {
    #[serde(default)]
    flavors: Vec<FlavorJson>,
}

#[derive(Debug, Default, Deserialize)]
struct ImagesEnvelope {
    #[serde(default)]
    images: Vec<ImageJson>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageEnvelope {
    image: Option<ImageJson>,
}

/// Parse a `{"servers": [...]}` detail listing, dropping unmappable records.
///
/// # Errors
///
/// Returns the underlying error when the body is not the promised JSON.
pub fn parse_server_listing(
    body: &str,
    owner_id: &str,
    region_id: &str,
) -> serde_json::Result<Vec<Server>> {
    let envelope: ServersEnvelope = serde_json::from_str(body)?;
    Ok(envelope
        .servers
        .into_iter()
        .filter_map(|s| s.into_server(owner_id, region_id))
        .collect())
}

/// Parse a `{"server": {...}}` body.
///
/// # Errors
///
/// Returns the underlying error when the body is not the promised JSON.
pub fn parse_server(
    body: &str,
    owner_id: &str,
    region_id: &str,
) -> serde_json::Result<Option<Server>> {
    let envelope: ServerEnvelope = serde_json::from_str(body)?;
    Ok(envelope.server.and_then(|s| s.into_server(owner_id, region_id)))
}

/// Parse a `{"flavors": [...]}` detail listing.
///
/// # Errors
///
/// Returns the underlying error when the body is not the promised JSON.
pub fn parse_flavor_listing(body: &str) -> serde_json::Result<Vec<Flavor>> {
    let envelope: FlavorsEnvelope = serde_json::from_str(body)?;
    Ok(envelope
        .flavors
        .into_iter()
        .filter_map(FlavorJson::into_flavor)
        .collect())
}

/// Parse an `{"images": [...]}` detail listing, dropping failed records.
///
/// # Errors
///
/// Returns the underlying error when the body is not the promised JSON.
pub fn parse_image_listing(
    body: &str,
    owner_id: &str,
    region_id: &str,
) -> serde_json::Result<Vec<MachineImage>> {
    let envelope: ImagesEnvelope = serde_json::from_str(body)?;
    Ok(envelope
        .images
        .into_iter()
        .filter_map(|i| i.into_image(owner_id, region_id))
        .collect())
}

/// Parse an `{"image": {...}}` body.
///
/// # Errors
///
/// Returns the underlying error when the body is not the promised JSON.
pub fn parse_image(
    body: &str,
    owner_id: &str,
    region_id: &str,
) -> serde_json::Result<Option<MachineImage>> {
    let envelope: ImageEnvelope = serde_json::from_str(body)?;
    Ok(envelope.image.and_then(|i| i.into_image(owner_id, region_id)))
}
