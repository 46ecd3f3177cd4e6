//! Normalized provider object model.
//!
//! Each sub-service returns differently shaped objects. The bindings map them
//! onto [`ProviderObject`] so the rest of the engine sees one contract.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, LifecycleError};

/// Quota value meaning "no limit".
pub const UNLIMITED_QUOTA: i64 = -1;

/// Quota reported by sub-services that have no quota API.
pub const UNMETERED_QUOTA: i64 = 1_000_000_000;

/// Kinds of provider resources the engine manages or looks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Compute instance.
    Server,
    /// L2 network.
    Network,
    /// Subnet of a network.
    Subnet,
    /// Network port.
    Port,
    /// Block storage volume.
    Volume,
    /// Point-in-time volume snapshot.
    VolumeSnapshot,
    /// Volume backup.
    VolumeBackup,
    /// Security group.
    SecurityGroup,
    /// SSH keypair.
    Keypair,
    /// Server (anti-)affinity group.
    ServerGroup,
    /// Floating IP address.
    #[serde(rename = "floatingip")]
    FloatingIp,
    /// L3 router.
    Router,
    /// Disk image.
    Image,
    /// Compute flavor.
    Flavor,
}

/// Provider sub-service owning a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Compute (servers, keypairs, server groups, flavors).
    Compute,
    /// Networking (networks, subnets, ports, security groups, floating IPs,
    /// routers).
    Network,
    /// Block storage (volumes, snapshots, backups).
    BlockStorage,
    /// Image catalog.
    Image,
}

impl ResourceKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::Server,
        Self::Network,
        Self::Subnet,
        Self::Port,
        Self::Volume,
        Self::VolumeSnapshot,
        Self::VolumeBackup,
        Self::SecurityGroup,
        Self::Keypair,
        Self::ServerGroup,
        Self::FloatingIp,
        Self::Router,
        Self::Image,
        Self::Flavor,
    ];

    /// Returns the identifier stored as `external_type`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::Port => "port",
            Self::Volume => "volume",
            Self::VolumeSnapshot => "volume_snapshot",
            Self::VolumeBackup => "volume_backup",
            Self::SecurityGroup => "security_group",
            Self::Keypair => "keypair",
            Self::ServerGroup => "server_group",
            Self::FloatingIp => "floatingip",
            Self::Router => "router",
            Self::Image => "image",
            Self::Flavor => "flavor",
        }
    }

    /// Returns the plural form used in quota messages and list endpoints.
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Server => "servers",
            Self::Network => "networks",
            Self::Subnet => "subnets",
            Self::Port => "ports",
            Self::Volume => "volumes",
            Self::VolumeSnapshot => "snapshots",
            Self::VolumeBackup => "backups",
            Self::SecurityGroup => "security_groups",
            Self::Keypair => "keypairs",
            Self::ServerGroup => "server_groups",
            Self::FloatingIp => "floatingips",
            Self::Router => "routers",
            Self::Image => "images",
            Self::Flavor => "flavors",
        }
    }

    /// Returns the attribute a resource of this kind is looked up by.
    #[must_use]
    pub const fn name_field(self) -> &'static str {
        match self {
            Self::FloatingIp => "floating_ip_address",
            _ => "name",
        }
    }

    /// Returns the sub-service that owns this kind.
    #[must_use]
    pub const fn service(self) -> Service {
        match self {
            Self::Server | Self::Keypair | Self::ServerGroup | Self::Flavor => Service::Compute,
            Self::Network
            | Self::Subnet
            | Self::Port
            | Self::SecurityGroup
            | Self::FloatingIp
            | Self::Router => Service::Network,
            Self::Volume | Self::VolumeSnapshot | Self::VolumeBackup => Service::BlockStorage,
            Self::Image => Service::Image,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                ConfigError::invalid("type", format!("unknown resource type '{s}'")).into()
            })
    }
}

impl Service {
    /// Returns the sub-service name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Network => "network",
            Self::BlockStorage => "block-storage",
            Self::Image => "image",
        }
    }
}

/// A provider object normalized to a common shape.
///
/// Kind-specific data lives in `attributes`. Bindings are expected to fill the
/// keys the accessors below read (`task_state`, `networks`, `attachments`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderObject {
    /// Provider-assigned identifier.
    pub id: String,
    /// Display name, if the kind has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Lifecycle status as reported by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Remaining attributes.
    #[serde(default, flatten)]
    pub attributes: Map<String, Value>,
}

impl ProviderObject {
    /// Creates an object with only an id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Returns the status, or an empty string.
    #[must_use]
    pub fn status(&self) -> &str {
        self.status.as_deref().unwrap_or_default()
    }

    /// Returns a raw attribute.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Returns a string attribute.
    #[must_use]
    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Returns a boolean attribute, accepting `"true"`/`"false"` strings.
    #[must_use]
    pub fn bool_attr(&self, key: &str) -> Option<bool> {
        match self.attributes.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Returns a list of strings stored under `key`.
    #[must_use]
    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.attributes
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the in-flight task state of a server.
    #[must_use]
    pub fn task_state(&self) -> Option<&str> {
        self.str_attr("task_state")
    }

    /// Returns the fault message the provider attached, if any.
    #[must_use]
    pub fn fault_message(&self) -> Option<&str> {
        self.attributes
            .get("fault")
            .and_then(|f| f.get("message"))
            .and_then(Value::as_str)
    }

    /// Returns a server metadata entry.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.attributes
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
    }

    /// Returns true if a port has a fixed IP on `subnet_id`.
    #[must_use]
    pub fn has_fixed_ip_on(&self, subnet_id: &str) -> bool {
        self.attributes
            .get("fixed_ips")
            .and_then(Value::as_array)
            .is_some_and(|ips| {
                ips.iter()
                    .any(|ip| ip.get("subnet_id").and_then(Value::as_str) == Some(subnet_id))
            })
    }

    /// Returns the addresses of a server per network name, in provider order.
    #[must_use]
    pub fn networks(&self) -> Vec<(String, Vec<String>)> {
        let Some(Value::Object(networks)) = self.attributes.get("networks") else {
            return Vec::new();
        };
        networks
            .iter()
            .map(|(name, ips)| {
                let ips = ips
                    .as_array()
                    .map(|ips| ips.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                (name.clone(), ips)
            })
            .collect()
    }

    /// Returns every address of a server across all networks.
    #[must_use]
    pub fn all_addresses(&self) -> Vec<String> {
        self.networks().into_iter().flat_map(|(_, ips)| ips).collect()
    }

    /// Returns the volume attachments recorded on a volume.
    #[must_use]
    pub fn attachments(&self) -> Vec<VolumeAttachment> {
        self.attributes
            .get("attachments")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Returns the attributes as a payload mapping, including id/name/status.
    #[must_use]
    pub fn to_payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Reference to a security group by id and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    /// Group id.
    pub id: String,
    /// Group name.
    pub name: String,
}

impl GroupRef {
    /// Returns true if this group has the given id or name.
    #[must_use]
    pub fn matches(&self, id: &str, name: &str) -> bool {
        self.id == id || self.name == name
    }
}

/// A volume attachment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttachment {
    /// Attachment id.
    #[serde(default)]
    pub id: String,
    /// Server the volume is attached to.
    pub server_id: String,
    /// Attached volume.
    #[serde(default)]
    pub volume_id: String,
    /// Device path assigned by the provider.
    #[serde(default)]
    pub device: Option<String>,
}

/// A network interface plugged into a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Port backing the interface.
    pub port_id: String,
    /// Network of the port.
    pub net_id: String,
}

/// Reboot flavors accepted by the compute service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootKind {
    /// Guest-initiated reboot.
    Soft,
    /// Power-cycle.
    Hard,
}

impl RebootKind {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Soft => "SOFT",
            Self::Hard => "HARD",
        }
    }
}

impl FromStr for RebootKind {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SOFT" => Ok(Self::Soft),
            "HARD" => Ok(Self::Hard),
            other => Err(ConfigError::invalid(
                "type",
                format!("Unexpected reboot type: {other}. Valid values: SOFT or HARD."),
            )
            .into()),
        }
    }
}

/// Equality filter for list calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter(BTreeMap<String, String>);

impl Filter {
    /// Creates an empty filter (matches everything).
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds an equality constraint.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Iterates over the constraints.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Returns true if the filter has no constraints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `object` satisfies every constraint.
    #[must_use]
    pub fn matches(&self, object: &ProviderObject) -> bool {
        self.0.iter().all(|(key, expected)| {
            let actual = match key.as_str() {
                "id" => Some(object.id.as_str()),
                "name" => object.name.as_deref(),
                "status" => object.status.as_deref(),
                other => object.str_attr(other),
            };
            actual == Some(expected.as_str())
        })
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
