//! Network interface composition for server creation.
//!
//! NICs come from four sources: the inline `nics` list of the server block,
//! network relationships, port relationships and the management network.
//! The order of the result decides the guest's device order (eth0, eth1, ...).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::OperationContext;
use crate::error::{ConfigError, ProviderError, Result};
use crate::provider::{Filter, Getter, Lister, ResourceKind, find_one};

/// Node property naming the management network.
pub const MANAGEMENT_NETWORK_PROPERTY: &str = "management_network_name";

/// Server metadata key recording the management network id.
pub const MANAGEMENT_NETWORK_ID_META: &str = "cloudify_management_network_id";

/// Server metadata key recording the management network name.
pub const MANAGEMENT_NETWORK_NAME_META: &str = "cloudify_management_network_name";

/// One network interface of a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicSpec {
    /// Network to plug into.
    #[serde(rename = "net-id", default, skip_serializing_if = "Option::is_none")]
    pub net_id: Option<String>,
    /// Pre-created port to plug in.
    #[serde(rename = "port-id", default, skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
}

impl NicSpec {
    /// A NIC on a network.
    #[must_use]
    pub fn network(net_id: impl Into<String>) -> Self {
        Self {
            net_id: Some(net_id.into()),
            port_id: None,
        }
    }

    /// A NIC bound to a port on a known network.
    #[must_use]
    pub fn port(port_id: impl Into<String>, net_id: Option<String>) -> Self {
        Self {
            net_id,
            port_id: Some(port_id.into()),
        }
    }

    /// Drops the network when a port is present; the port implies it.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.port_id.is_some() {
            self.net_id = None;
        }
        self
    }

    fn targets(&self, net_id: &str) -> bool {
        self.net_id.as_deref() == Some(net_id)
    }
}

/// The network servers are managed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementNetwork {
    /// Network id.
    pub id: String,
    /// Network name.
    pub name: String,
}

/// Parses the inline `nics` list of a server block.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if the list is malformed.
pub fn inline_nics(value: Option<&Value>) -> Result<Vec<NicSpec>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::invalid("server.nics", e.to_string()).into()),
    }
}

/// Finds the management network from the node property, else the
/// provider context's internal network.
///
/// # Errors
///
/// Returns [`ProviderError::NotFound`] if the named network does not exist.
pub async fn resolve_management_network(
    lister: &dyn Lister,
    ctx: &OperationContext,
) -> Result<Option<ManagementNetwork>> {
    if let Some(name) = ctx.node.property_str(MANAGEMENT_NETWORK_PROPERTY) {
        let name = crate::context::prefixed(ctx.deployment.resources_prefix.as_deref(), name);
        warn!(
            "A {MANAGEMENT_NETWORK_PROPERTY} was provided ({name}); prefer ordered network or \
             port relationships to choose the server's NICs"
        );
        let network = find_one(
            lister,
            ResourceKind::Network,
            &Filter::new().with("name", name.as_str()),
        )
        .await?
        .ok_or_else(|| ProviderError::not_found(ResourceKind::Network, name.as_str()))?;
        return Ok(Some(ManagementNetwork { id: network.id, name }));
    }

    Ok(ctx.provider.int_network.as_ref().map(|net| ManagementNetwork {
        id: net.id.clone(),
        name: net.name.clone(),
    }))
}

/// Composes the NIC list of a new server.
///
/// Looks up the network of every port (one lookup per port), then applies
/// [`merge`].
///
/// # Errors
///
/// Returns any provider error from the port lookups.
pub async fn compose(
    getter: &dyn Getter,
    inline: Vec<NicSpec>,
    network_ids: &[String],
    port_ids: &[String],
    management: Option<&ManagementNetwork>,
) -> Result<Vec<NicSpec>> {
    let mut port_nics = Vec::with_capacity(port_ids.len());
    for port_id in port_ids {
        let port = getter.get(ResourceKind::Port, port_id).await?;
        let net_id = port.str_attr("network_id").map(str::to_string);
        port_nics.push(NicSpec::port(port.id, net_id));
    }

    let nics = merge(inline, network_ids, port_nics, management.map(|m| m.id.as_str()));
    debug!("Composed NICs: {nics:?}");
    Ok(nics)
}

/// Merges NIC sources in order: inline, network relationships, ports.
///
/// Networks already reached through a port are dropped from the relationship
/// list. The management network is prepended unless some entry targets it.
/// Every entry is then [normalized](NicSpec::normalized).
#[must_use]
pub fn merge(
    inline: Vec<NicSpec>,
    network_ids: &[String],
    port_nics: Vec<NicSpec>,
    management_id: Option<&str>,
) -> Vec<NicSpec> {
    let network_nics: Vec<NicSpec> = network_ids
        .iter()
        .filter(|id| !port_nics.iter().any(|nic| nic.targets(id)))
        .map(NicSpec::network)
        .collect();

    let mut merged: Vec<NicSpec> = inline
        .into_iter()
        .chain(network_nics)
        .chain(port_nics)
        .collect();

    if let Some(management_id) = management_id {
        if !merged.iter().any(|nic| nic.targets(management_id)) {
            merged.insert(0, NicSpec::network(management_id));
        }
    }

    merged.into_iter().map(NicSpec::normalized).collect()
}
