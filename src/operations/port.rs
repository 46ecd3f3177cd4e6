//! Network ports.

use ipnet::IpNet;
use serde_json::{Map, Value, json};
use std::net::IpAddr;
use tracing::{debug, info, warn};

use crate::context::{COMMON_KEYS, OperationContext, RelationshipContext, keys};
use crate::error::{OperationError, ResolveError, Result};
use crate::outcome::Outcome;
use crate::provider::{Cloud, Getter, NetworkVerbs, ProviderObject, ResourceKind};
use crate::resolver::Ownership;
use crate::sequencer;

use super::common::{self, target_id};
use super::links::server_floating_ip;

const ALLOWED_ADDRESS_PAIRS: &str = "allowed_address_pairs";

/// Keys cleared when a port is deleted.
const PORT_KEYS: [&str; 3] = [
    keys::FIXED_IP_ADDRESS,
    keys::MAC_ADDRESS,
    ALLOWED_ADDRESS_PAIRS,
];

/// Seconds to wait for a floating IP to leave the server before detaching.
const FLOATING_IP_DETACH_RETRY_SECS: u64 = 10;

fn record_addresses(ctx: &mut OperationContext, port: &ProviderObject) {
    let fixed_ip = port
        .attr("fixed_ips")
        .and_then(Value::as_array)
        .and_then(|ips| ips.first())
        .and_then(|ip| ip.get("ip_address"))
        .cloned()
        .unwrap_or(Value::Null);
    ctx.props.set(keys::FIXED_IP_ADDRESS, fixed_ip);
    ctx.props.set(
        keys::MAC_ADDRESS,
        port.attr(keys::MAC_ADDRESS).cloned().unwrap_or(Value::Null),
    );
}

fn clear_port_keys(ctx: &mut OperationContext) {
    ctx.props.clear_keys(&COMMON_KEYS);
    ctx.props.clear_keys(&PORT_KEYS);
}

/// Resolves or creates a port.
///
/// The network comes from the `port.network_id` property, else the single
/// network relationship. Fixed IPs merge the declared list, the related
/// subnets and the `fixed_ip` property; security groups come from
/// relationships.
///
/// # Errors
///
/// Returns a relationship-count error without a network, or an external
/// mismatch for an external port on another network.
pub async fn create(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let identity = common::resolve(cloud, ctx).await?;
    if identity.ownership == Ownership::External {
        if let Err(e) = adopt_external(cloud, ctx).await {
            clear_port_keys(ctx);
            return Err(e);
        }
        return Ok(Outcome::done());
    }
    if let Some(port) = common::already_created(cloud, ctx).await? {
        record_addresses(ctx, &port);
        return Ok(Outcome::done());
    }

    let mut base = Map::new();
    if !ctx.node.kind_block().contains_key("network_id") {
        let network_id = target_id(ctx.required_target(ResourceKind::Network)?)?;
        base.insert(String::from("network_id"), Value::from(network_id));
    }
    let mut payload = common::object_payload(ctx, base);
    merge_fixed_ips(cloud, ctx, &mut payload).await?;
    let groups = ctx.target_ids(ResourceKind::SecurityGroup);
    if !groups.is_empty() {
        payload.insert(String::from("security_groups"), json!(groups));
    }

    let port = common::create_object(cloud, &mut ctx.props, ResourceKind::Port, &payload).await?;
    record_addresses(ctx, &port);
    Ok(Outcome::done())
}

/// Combines the declared fixed IPs, related subnets and the `fixed_ip`
/// property into the payload's `fixed_ips`.
///
/// A related subnet already named in the list is not repeated. The
/// `fixed_ip` property replaces the first entry whose subnet contains it,
/// else it is appended on its own.
async fn merge_fixed_ips(
    cloud: &Cloud,
    ctx: &OperationContext,
    payload: &mut Map<String, Value>,
) -> Result<()> {
    let mut fixed_ips: Vec<Value> = payload
        .get("fixed_ips")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let declared_subnets: Vec<String> = fixed_ips
        .iter()
        .filter_map(|ip| ip.get("subnet_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    for subnet_id in ctx.target_ids(ResourceKind::Subnet) {
        if !declared_subnets.contains(&subnet_id) {
            fixed_ips.push(json!({ "subnet_id": subnet_id }));
        }
    }

    if let Some(fixed_ip) = ctx.node.property_str("fixed_ip") {
        let present = fixed_ips
            .iter()
            .any(|ip| ip.get("ip_address").and_then(Value::as_str) == Some(fixed_ip));
        if !present {
            let mut element = Map::new();
            element.insert(String::from("ip_address"), Value::from(fixed_ip));

            let mut matched = None;
            for (index, entry) in fixed_ips.iter().enumerate() {
                let Some(subnet_id) = entry.get("subnet_id").and_then(Value::as_str) else {
                    continue;
                };
                let subnet = cloud.get(ResourceKind::Subnet, subnet_id).await?;
                if subnet_contains(subnet.str_attr("cidr"), fixed_ip) {
                    matched = Some((index, subnet_id.to_string()));
                    break;
                }
            }
            if let Some((index, subnet_id)) = matched {
                fixed_ips.remove(index);
                element.insert(String::from("subnet_id"), Value::from(subnet_id));
            }
            fixed_ips.push(Value::Object(element));
        }
    }

    if !fixed_ips.is_empty() {
        payload.insert(String::from("fixed_ips"), Value::Array(fixed_ips));
    }
    Ok(())
}

fn subnet_contains(cidr: Option<&str>, ip: &str) -> bool {
    debug!("Check ip {ip:?} in subnet {cidr:?}");
    let Some(cidr) = cidr else {
        return false;
    };
    match (cidr.parse::<IpNet>(), ip.parse::<IpAddr>()) {
        (Ok(net), Ok(addr)) => net.contains(&addr),
        _ => false,
    }
}

fn requested_pairs(ctx: &OperationContext) -> Vec<Value> {
    let mut block = ctx.node.kind_block();
    if let Some(args) = ctx.input(ResourceKind::Port.as_str()).and_then(Value::as_object) {
        block.extend(args.clone());
    }
    block
        .get(ALLOWED_ADDRESS_PAIRS)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn pair_ip(pair: &Value) -> Option<&str> {
    pair.get("ip_address").and_then(Value::as_str)
}

/// Applies declared address pairs to an external port, checks its network
/// and records its addresses.
async fn adopt_external(cloud: &Cloud, ctx: &mut OperationContext) -> Result<()> {
    let port_id = common::current_id(ctx)?;
    let port = cloud.get(ResourceKind::Port, &port_id).await?;

    let requested = requested_pairs(ctx);
    if !requested.is_empty() {
        let applied: Vec<Value> = ctx
            .props
            .get(ALLOWED_ADDRESS_PAIRS)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut pairs: Vec<Value> = port
            .attr(ALLOWED_ADDRESS_PAIRS)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for pair in &requested {
            if applied.contains(pair) {
                continue;
            }
            if let Some(ip) = pair_ip(pair) {
                if pairs.iter().any(|old| pair_ip(old) == Some(ip)) {
                    return Err(
                        ResolveError::conflict(format!("Ip {ip} is already assigned to {port_id}."))
                            .into(),
                    );
                }
            }
            pairs.push(pair.clone());
        }

        let mut patch = Map::new();
        patch.insert(String::from(ALLOWED_ADDRESS_PAIRS), Value::Array(pairs.clone()));
        cloud.update(ResourceKind::Port, &port_id, &patch).await?;
        info!("Applied {ALLOWED_ADDRESS_PAIRS} to port {port_id}");
        ctx.props.set(ALLOWED_ADDRESS_PAIRS, Value::Array(pairs));
    }

    if let Some(network) = ctx.single_target(ResourceKind::Network)? {
        let network_id = target_id(network)?;
        if port.str_attr("network_id") != Some(network_id) {
            return Err(OperationError::external_mismatch(format!(
                "Expected external resources port {port_id} and network {network_id} to be \
                 connected"
            ))
            .into());
        }
    }

    record_addresses(ctx, &port);
    Ok(())
}

/// Deletes an owned port; an external port only loses the address pairs
/// this node added. A port already gone counts as deleted.
///
/// # Errors
///
/// Returns any provider error other than not-found.
pub async fn delete(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    if common::ownership(ctx) == Ownership::External {
        if let Err(e) = release_address_pairs(cloud, ctx).await {
            if !e.is_not_found() {
                return Err(e);
            }
        }
    }

    match common::delete_simple(cloud, ctx, &PORT_KEYS).await {
        Err(e) if e.is_not_found() => {
            warn!("Port was already deleted: {e}");
            clear_port_keys(ctx);
            Ok(Outcome::done())
        }
        other => other,
    }
}

async fn release_address_pairs(cloud: &Cloud, ctx: &OperationContext) -> Result<()> {
    let requested = requested_pairs(ctx);
    if requested.is_empty() {
        return Ok(());
    }
    let port_id = common::current_id(ctx)?;
    let port = cloud.get(ResourceKind::Port, &port_id).await?;

    let removed: Vec<&str> = requested.iter().filter_map(pair_ip).collect();
    let remaining: Vec<Value> = port
        .attr(ALLOWED_ADDRESS_PAIRS)
        .and_then(Value::as_array)
        .map(|pairs| {
            pairs
                .iter()
                .filter(|pair| pair_ip(pair).is_none_or(|ip| !removed.contains(&ip)))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let mut patch = Map::new();
    patch.insert(String::from(ALLOWED_ADDRESS_PAIRS), Value::Array(remaining));
    cloud.update(ResourceKind::Port, &port_id, &patch).await?;
    info!("Removed {ALLOWED_ADDRESS_PAIRS} from port {port_id}");
    Ok(())
}

/// Binds the target port to the source server.
///
/// # Errors
///
/// Returns any provider error from the lookup or update.
pub async fn attach(cloud: &Cloud, ctx: &mut RelationshipContext) -> Result<Outcome<()>> {
    if ctx.is_external_pair() {
        info!("Not attaching port from server since external port and server are being used");
        return Ok(Outcome::done());
    }

    let server_id = target_id(&ctx.source)?;
    let port_id = target_id(&ctx.target)?;
    let port = cloud.get(ResourceKind::Port, port_id).await?;

    match port.str_attr("device_id").filter(|d| !d.is_empty()) {
        Some(device_id) if device_id == server_id => {
            info!(
                "Skipping port {port_id} attachment, because it is already attached to device \
                 (server) id {device_id}."
            );
        }
        _ => {
            info!("Attaching port {port_id}...");
            let mut patch = Map::new();
            patch.insert(String::from("device_id"), Value::from(server_id));
            cloud.update(ResourceKind::Port, port_id, &patch).await?;
            info!("Successfully attached port {port_id}");
        }
    }
    Ok(Outcome::done())
}

/// Unbinds the target port from the source server, first removing any
/// floating IP the server still holds.
///
/// # Errors
///
/// Returns any provider error from the floating IP removal or update.
pub async fn detach(cloud: &Cloud, ctx: &mut RelationshipContext) -> Result<Outcome<()>> {
    if ctx.is_external_pair() {
        info!("Not detaching port from server since external port and server are being used");
        return Ok(Outcome::done());
    }

    let server_id = target_id(&ctx.source)?;
    let port_id = target_id(&ctx.target)?;

    if let Some(address) = server_floating_ip(cloud, server_id).await? {
        info!("We have floating ip {address} attached to server");
        sequencer::disconnect_floating_ip(cloud, server_id, &address).await?;
        return Ok(Outcome::retry(
            format!("Waiting for the floating ip {address} to detach from server {server_id}.."),
            FLOATING_IP_DETACH_RETRY_SECS,
        ));
    }

    info!("Detaching port {port_id}...");
    let mut patch = Map::new();
    patch.insert(String::from("device_id"), Value::from(""));
    patch.insert(String::from("device_owner"), Value::from(""));
    cloud.update(ResourceKind::Port, port_id, &patch).await?;
    info!("Successfully detached port {port_id}");
    Ok(Outcome::done())
}

/// Adds the target security group to the source port.
///
/// # Errors
///
/// Returns an external mismatch for an unconnected external pair.
pub async fn connect_security_group(
    cloud: &Cloud,
    ctx: &mut RelationshipContext,
) -> Result<Outcome<()>> {
    let port_id = target_id(&ctx.source)?;
    let group_id = target_id(&ctx.target)?;

    if ctx.is_external_pair() {
        info!("Validating external port and security-group are connected");
        let port = cloud.get(ResourceKind::Port, port_id).await?;
        if port.string_list("security_groups").iter().any(|g| g == group_id) {
            return Ok(Outcome::done());
        }
        return Err(OperationError::external_mismatch(format!(
            "Expected external resources port {port_id} and security-group {group_id} to be \
             connected"
        ))
        .into());
    }

    sequencer::connect_port_security_group(cloud, cloud, port_id, group_id).await
}

/// Removes the target security group from the source port.
///
/// # Errors
///
/// Returns any provider error from the lookup or update.
pub async fn disconnect_security_group(
    cloud: &Cloud,
    ctx: &mut RelationshipContext,
) -> Result<Outcome<()>> {
    let port_id = target_id(&ctx.source)?;
    let group_id = target_id(&ctx.target)?;

    if ctx.is_external_pair() {
        info!(
            "Port {port_id} and Security Group {group_id} are external resources. Not performing \
             disconnect."
        );
        return Ok(Outcome::done());
    }

    sequencer::disconnect_port_security_group(cloud, cloud, port_id, group_id).await
}

/// Validates the declaration against the provider.
///
/// # Errors
///
/// Returns the resolver's not-found or quota error.
pub async fn creation_validation(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    common::validate(cloud, ctx).await
}

/// Stores the ports matching the `filter` input.
///
/// # Errors
///
/// Returns any provider error from the list call.
pub async fn list(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    common::list_into(cloud, ctx, ResourceKind::Port).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DeclaredResource, RelationshipKind};
    use crate::operations::testing::{context, external_target, resolved_context, target};
    use crate::provider::testing::FakeCloud;

    fn port_node() -> DeclaredResource {
        DeclaredResource::new(ResourceKind::Port).with_resource_id("eth0")
    }

    fn subnet(id: &str, cidr: &str) -> ProviderObject {
        ProviderObject::new(id).with_attr("cidr", cidr)
    }

    #[tokio::test]
    async fn test_create_merges_fixed_ips_and_security_groups() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Subnet, subnet("sub-a", "10.0.0.0/24"));
        fake.insert(ResourceKind::Subnet, subnet("sub-b", "10.1.0.0/24"));
        let cloud = fake.cloud();
        let mut ctx = context(port_node().with_property("fixed_ip", "10.1.0.20"))
            .with_relationship(
                RelationshipKind::ConnectedToNetwork,
                target(ResourceKind::Network, "net-1", "private"),
            )
            .with_relationship(
                RelationshipKind::DependsOn,
                target(ResourceKind::Subnet, "sub-a", "a"),
            )
            .with_relationship(
                RelationshipKind::DependsOn,
                target(ResourceKind::Subnet, "sub-b", "b"),
            )
            .with_relationship(
                RelationshipKind::ConnectedToSecurityGroup,
                target(ResourceKind::SecurityGroup, "sg-1", "web"),
            );

        create(&cloud, &mut ctx).await.expect("create");

        let id = ctx.props.external_id().expect("recorded").to_string();
        let port = fake.object(ResourceKind::Port, &id).expect("stored");
        assert_eq!(port.str_attr("network_id"), Some("net-1"));
        assert_eq!(
            port.attr("fixed_ips"),
            Some(&json!([
                {"subnet_id": "sub-a"},
                {"ip_address": "10.1.0.20", "subnet_id": "sub-b"},
            ]))
        );
        assert_eq!(port.string_list("security_groups"), vec!["sg-1"]);
        assert_eq!(ctx.props.get_str(keys::FIXED_IP_ADDRESS), None);
    }

    #[tokio::test]
    async fn test_fixed_ip_outside_subnets_is_appended() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Subnet, subnet("sub-a", "10.0.0.0/24"));
        let cloud = fake.cloud();
        let node = port_node()
            .with_property("fixed_ip", "192.168.5.5")
            .with_property("port", json!({"network_id": "net-9"}));
        let mut ctx = context(node).with_relationship(
            RelationshipKind::DependsOn,
            target(ResourceKind::Subnet, "sub-a", "a"),
        );

        create(&cloud, &mut ctx).await.expect("create");

        let id = ctx.props.external_id().expect("recorded").to_string();
        let port = fake.object(ResourceKind::Port, &id).expect("stored");
        assert_eq!(port.str_attr("network_id"), Some("net-9"));
        assert_eq!(
            port.attr("fixed_ips"),
            Some(&json!([{"subnet_id": "sub-a"}, {"ip_address": "192.168.5.5"}]))
        );
    }

    #[tokio::test]
    async fn test_create_without_network_fails() {
        let fake = FakeCloud::new();
        let cloud = fake.cloud();
        let mut ctx = context(port_node());

        let err = create(&cloud, &mut ctx).await.expect_err("no network");
        assert!(!err.is_recoverable());
        assert_eq!(fake.call_count("create"), 0);
    }

    #[tokio::test]
    async fn test_external_port_network_mismatch_clears_properties() {
        let fake = FakeCloud::new();
        fake.insert(
            ResourceKind::Port,
            ProviderObject::new("port-1")
                .with_name("shared")
                .with_attr("network_id", "net-2"),
        );
        let cloud = fake.cloud();
        let node = DeclaredResource::new(ResourceKind::Port)
            .with_resource_id("shared")
            .external(false);
        let mut ctx = context(node).with_relationship(
            RelationshipKind::ConnectedToNetwork,
            external_target(ResourceKind::Network, "net-1", "private"),
        );

        let err = create(&cloud, &mut ctx).await.expect_err("mismatch");
        assert!(err.to_string().contains("port-1"));
        assert!(ctx.props.external_id().is_none());
    }

    #[tokio::test]
    async fn test_external_port_address_pairs_added_then_released() {
        let fake = FakeCloud::new();
        fake.insert(
            ResourceKind::Port,
            ProviderObject::new("port-1")
                .with_name("shared")
                .with_attr("mac_address", "fa:16:3e:00:00:01")
                .with_attr("fixed_ips", json!([{"ip_address": "10.0.0.4"}]))
                .with_attr(ALLOWED_ADDRESS_PAIRS, json!([{"ip_address": "10.0.0.100"}])),
        );
        let cloud = fake.cloud();
        let node = DeclaredResource::new(ResourceKind::Port)
            .with_resource_id("shared")
            .external(false)
            .with_property(
                "port",
                json!({"allowed_address_pairs": [{"ip_address": "10.0.0.200"}]}),
            );
        let mut ctx = context(node);

        create(&cloud, &mut ctx).await.expect("adopt");
        create(&cloud, &mut ctx).await.expect("rerun is idempotent");
        let port = fake.object(ResourceKind::Port, "port-1").expect("stored");
        assert_eq!(
            port.attr(ALLOWED_ADDRESS_PAIRS),
            Some(&json!([{"ip_address": "10.0.0.100"}, {"ip_address": "10.0.0.200"}]))
        );
        assert_eq!(ctx.props.get_str(keys::FIXED_IP_ADDRESS), Some("10.0.0.4"));
        assert_eq!(ctx.props.get_str(keys::MAC_ADDRESS), Some("fa:16:3e:00:00:01"));

        delete(&cloud, &mut ctx).await.expect("delete");
        let port = fake.object(ResourceKind::Port, "port-1").expect("kept");
        assert_eq!(
            port.attr(ALLOWED_ADDRESS_PAIRS),
            Some(&json!([{"ip_address": "10.0.0.100"}]))
        );
        assert_eq!(fake.call_count("delete"), 0);
    }

    #[tokio::test]
    async fn test_duplicate_address_pair_is_rejected() {
        let fake = FakeCloud::new();
        fake.insert(
            ResourceKind::Port,
            ProviderObject::new("port-1")
                .with_name("shared")
                .with_attr(ALLOWED_ADDRESS_PAIRS, json!([{"ip_address": "10.0.0.100"}])),
        );
        let cloud = fake.cloud();
        let node = DeclaredResource::new(ResourceKind::Port)
            .with_resource_id("shared")
            .external(false)
            .with_property(
                "port",
                json!({"allowed_address_pairs": [{"ip_address": "10.0.0.100"}]}),
            );
        let mut ctx = context(node);

        let err = create(&cloud, &mut ctx).await.expect_err("duplicate");
        assert!(err.to_string().contains("Ip 10.0.0.100 is already assigned to port-1."));
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_port() {
        let fake = FakeCloud::new();
        let cloud = fake.cloud();
        let mut ctx = resolved_context(port_node(), "port-1");
        ctx.props.set(keys::MAC_ADDRESS, "fa:16:3e:00:00:01");

        let outcome = delete(&cloud, &mut ctx).await.expect("already gone");
        assert!(outcome.is_done());
        assert!(ctx.props.is_empty());
    }

    #[tokio::test]
    async fn test_attach_sets_device_once() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Port, ProviderObject::new("port-1"));
        let cloud = fake.cloud();
        let mut ctx = RelationshipContext::new(
            target(ResourceKind::Server, "srv", "web"),
            target(ResourceKind::Port, "port-1", "eth0"),
        );

        attach(&cloud, &mut ctx).await.expect("attach");
        attach(&cloud, &mut ctx).await.expect("again");
        assert_eq!(fake.call_count("update"), 1);
    }

    #[tokio::test]
    async fn test_detach_removes_floating_ip_first() {
        let fake = FakeCloud::new();
        fake.insert(ResourceKind::Server, ProviderObject::new("srv"));
        fake.insert(
            ResourceKind::Port,
            ProviderObject::new("port-1").with_attr("device_id", "srv"),
        );
        fake.insert(
            ResourceKind::FloatingIp,
            ProviderObject::new("fip-1")
                .with_attr("port_id", "port-1")
                .with_attr(keys::FLOATING_IP_ADDRESS, "203.0.113.7"),
        );
        let cloud = fake.cloud();
        let mut ctx = RelationshipContext::new(
            target(ResourceKind::Server, "srv", "web"),
            target(ResourceKind::Port, "port-1", "eth0"),
        );

        let outcome = detach(&cloud, &mut ctx).await.expect("detach");
        assert!(matches!(outcome, Outcome::Retry { after_secs: 10, .. }));
        assert_eq!(fake.call_count("remove_floating_ip"), 1);
        assert_eq!(fake.call_count("update"), 0);
    }

    #[tokio::test]
    async fn test_external_port_security_group_pair_is_validated() {
        let fake = FakeCloud::new();
        fake.insert(
            ResourceKind::Port,
            ProviderObject::new("port-1").with_attr("security_groups", json!(["sg-1"])),
        );
        let cloud = fake.cloud();
        let mut ctx = RelationshipContext::new(
            external_target(ResourceKind::Port, "port-1", "eth0"),
            external_target(ResourceKind::SecurityGroup, "sg-1", "web"),
        );

        let outcome = connect_security_group(&cloud, &mut ctx)
            .await
            .expect("member");
        assert!(outcome.is_done());
        disconnect_security_group(&cloud, &mut ctx)
            .await
            .expect("left alone");
        assert_eq!(fake.call_count("update"), 0);
    }

    #[tokio::test]
    async fn test_port_security_group_connect_through_sequencer() {
        let fake = FakeCloud::new();
        fake.insert(
            ResourceKind::Port,
            ProviderObject::new("port-1").with_attr("security_groups", json!([])),
        );
        let cloud = fake.cloud();
        let mut ctx = RelationshipContext::new(
            target(ResourceKind::Port, "port-1", "eth0"),
            target(ResourceKind::SecurityGroup, "sg-1", "web"),
        );

        connect_security_group(&cloud, &mut ctx).await.expect("connect");
        let port = fake.object(ResourceKind::Port, "port-1").expect("stored");
        assert_eq!(port.string_list("security_groups"), vec!["sg-1"]);
    }
}
