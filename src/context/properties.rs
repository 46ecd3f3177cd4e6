//! Per-instance runtime properties.
//!
//! These are the only state that survives between invocations of an
//! operation. Everything a resumed invocation needs to know ("was the backup
//! already requested?") must be written here before the provider call.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::provider::ResourceKind;

/// Runtime property keys.
pub mod keys {
    /// Provider id of the resource.
    pub const EXTERNAL_ID: &str = "external_id";
    /// Resource kind, as [`crate::provider::ResourceKind::as_str`].
    pub const EXTERNAL_TYPE: &str = "external_type";
    /// Provider name of the resource.
    pub const EXTERNAL_NAME: &str = "external_name";
    /// Scrubbed snapshot of the resource payload.
    pub const EXTERNAL_RESOURCE: &str = "external_resource";
    /// Declared external but created by this engine.
    pub const CONDITIONALLY_CREATED: &str = "conditionally_created";
    /// Availability zone of a volume or server.
    pub const AVAILABILITY_ZONE: &str = "availability_zone";

    /// Addresses per network name.
    pub const NETWORKS: &str = "networks";
    /// Management address of a server.
    pub const IP: &str = "ip";
    /// Preferred IPv4 address.
    pub const IPV4_ADDRESS: &str = "ipv4_address";
    /// Preferred IPv6 address.
    pub const IPV6_ADDRESS: &str = "ipv6_address";
    /// All IPv4 addresses.
    pub const IPV4_ADDRESSES: &str = "ipv4_addresses";
    /// All IPv6 addresses.
    pub const IPV6_ADDRESSES: &str = "ipv6_addresses";
    /// Decrypted admin password.
    pub const PASSWORD: &str = "password";

    /// Name of the snapshot a create attempt is working on, or `done`.
    pub const BACKUP_STATE: &str = "backupstate";
    /// Name of the snapshot a restore attempt is working on, or `done`.
    pub const RESTORE_STATE: &str = "restorestate";

    /// Whether a volume is bootable.
    pub const BOOTABLE: &str = "bootable";
    /// Device a volume is attached as.
    pub const DEVICE_NAME: &str = "device_name";

    /// Fixed IP of a port.
    pub const FIXED_IP_ADDRESS: &str = "fixed_ip_address";
    /// MAC address of a port.
    pub const MAC_ADDRESS: &str = "mac_address";
    /// Address of a floating IP.
    pub const FLOATING_IP_ADDRESS: &str = "floating_ip_address";

    /// Marker value once a backup/restore attempt has finished.
    pub const PROGRESS_DONE: &str = "done";
}

/// Keys every resource kind persists.
pub const COMMON_KEYS: [&str; 5] = [
    keys::EXTERNAL_ID,
    keys::EXTERNAL_TYPE,
    keys::EXTERNAL_NAME,
    keys::EXTERNAL_RESOURCE,
    keys::CONDITIONALLY_CREATED,
];

/// Payload keys that must never be persisted.
pub const SECRET_KEYS: [&str; 2] = ["user_data", "adminPass"];

/// Mutable runtime properties of one resource instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeProperties(Map<String, Value>);

impl RuntimeProperties {
    /// Creates empty properties.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps an existing mapping.
    #[must_use]
    pub const fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Returns the underlying mapping.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Returns a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns a string value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns a boolean value, `false` when absent.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Returns true if `key` is set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Sets a value.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Removes a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Removes every key in `keys`.
    pub fn clear_keys(&mut self, keys: &[&str]) {
        for key in keys {
            self.0.remove(*key);
        }
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the stored keys and values.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Provider id of the resource, once known.
    #[must_use]
    pub fn external_id(&self) -> Option<&str> {
        self.get_str(keys::EXTERNAL_ID)
    }

    /// Provider name of the resource, once known.
    #[must_use]
    pub fn external_name(&self) -> Option<&str> {
        self.get_str(keys::EXTERNAL_NAME)
    }

    /// Resource kind recorded at resolution time.
    #[must_use]
    pub fn external_type(&self) -> Option<ResourceKind> {
        self.get_str(keys::EXTERNAL_TYPE).and_then(|s| s.parse().ok())
    }

    /// Whether the resource was declared external but created here.
    #[must_use]
    pub fn conditionally_created(&self) -> bool {
        self.flag(keys::CONDITIONALLY_CREATED)
    }

    /// Stores a scrubbed snapshot of `payload` under `external_resource`.
    pub fn set_payload(&mut self, payload: &Map<String, Value>) {
        self.set(keys::EXTERNAL_RESOURCE, Value::Object(scrubbed(payload)));
    }
}

/// Returns a copy of `payload` without [`SECRET_KEYS`].
#[must_use]
pub fn scrubbed(payload: &Map<String, Value>) -> Map<String, Value> {
    payload
        .iter()
        .filter(|(key, _)| !SECRET_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
