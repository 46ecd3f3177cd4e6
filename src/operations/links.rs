//! Relationship operations between servers, volumes, subnets and routers.
//!
//! Source/target conventions follow the relationship direction: a server
//! connects to floating IPs and security groups, a volume connects to the
//! server it attaches to, a subnet connects to its router.

use std::time::Duration;
use tracing::info;

use crate::context::{RelationshipContext, keys};
use crate::error::{OperationError, Result};
use crate::outcome::Outcome;
use crate::poller::WaitPolicy;
use crate::provider::{
    Cloud, ComputeVerbs, Filter, GroupRef, Lister, NetworkVerbs, ResourceKind,
};
use crate::sequencer::{self, AUTO_DEVICE};

use super::common::target_id;

/// Associates the target floating IP with the source server.
///
/// # Errors
///
/// Returns an external mismatch if both endpoints are external and not
/// associated, or any provider error.
pub async fn connect_floating_ip(
    cloud: &Cloud,
    ctx: &mut RelationshipContext,
) -> Result<Outcome<()>> {
    let server_id = target_id(&ctx.source)?.to_string();
    let fip_id = target_id(&ctx.target)?.to_string();

    if ctx.is_external_pair() {
        info!("Validating external floatingip and server are associated");
        if floating_ip_on_server(cloud, &fip_id, &server_id).await? {
            return Ok(Outcome::done());
        }
        return Err(OperationError::external_mismatch(format!(
            "Expected external resources server {server_id} and floating-ip {fip_id} to be \
             connected"
        ))
        .into());
    }

    let address = match ctx.target.props.get_str(keys::FLOATING_IP_ADDRESS) {
        Some(address) => address.to_string(),
        None => {
            let fip = cloud.try_get(ResourceKind::FloatingIp, &fip_id).await?;
            fip.as_ref()
                .and_then(|f| f.str_attr(keys::FLOATING_IP_ADDRESS))
                .map(str::to_string)
                .ok_or_else(|| {
                    OperationError::invalid_state(format!(
                        "Floating IP {fip_id} has no address"
                    ))
                })?
        }
    };

    sequencer::connect_floating_ip(cloud, cloud, &server_id, &address, ctx.input_str("fixed_ip"))
        .await
}

/// Whether the floating IP is bound to the server, directly or via a port.
async fn floating_ip_on_server(cloud: &Cloud, fip_id: &str, server_id: &str) -> Result<bool> {
    let Some(fip) = cloud.try_get(ResourceKind::FloatingIp, fip_id).await? else {
        return Ok(false);
    };
    if fip.str_attr("instance_id") == Some(server_id) {
        return Ok(true);
    }
    let Some(port_id) = fip.str_attr("port_id").filter(|p| !p.is_empty()) else {
        return Ok(false);
    };
    Ok(cloud
        .try_get(ResourceKind::Port, port_id)
        .await?
        .is_some_and(|port| port.str_attr("device_id") == Some(server_id)))
}

/// Dissociates the floating IP bound to one of the server's ports.
///
/// # Errors
///
/// Returns any provider error other than not-found.
pub async fn disconnect_floating_ip(
    cloud: &Cloud,
    ctx: &mut RelationshipContext,
) -> Result<Outcome<()>> {
    if ctx.is_external_pair() {
        info!(
            "Not disassociating floatingip and server since external floatingip and server are \
             being used"
        );
        return Ok(Outcome::done());
    }

    let server_id = target_id(&ctx.source)?.to_string();
    match server_floating_ip(cloud, &server_id).await? {
        Some(address) => sequencer::disconnect_floating_ip(cloud, &server_id, &address).await?,
        None => info!("Server {server_id} has no floating IP to disassociate"),
    }
    Ok(Outcome::done())
}

/// Address of the first floating IP bound to one of the server's ports.
pub(super) async fn server_floating_ip(cloud: &Cloud, server_id: &str) -> Result<Option<String>> {
    let ports = cloud
        .list(ResourceKind::Port, &Filter::new().with("device_id", server_id))
        .await?;
    for port in ports {
        let bound = cloud
            .list(ResourceKind::FloatingIp, &Filter::new().with("port_id", port.id.as_str()))
            .await?;
        if let Some(address) = bound
            .iter()
            .find_map(|fip| fip.str_attr(keys::FLOATING_IP_ADDRESS))
        {
            return Ok(Some(address.to_string()));
        }
    }
    Ok(None)
}

fn group_ref(ctx: &RelationshipContext, group_id: &str) -> GroupRef {
    GroupRef {
        id: group_id.to_string(),
        name: ctx.target.external_name().unwrap_or(group_id).to_string(),
    }
}

/// Adds the target security group to the source server.
///
/// # Errors
///
/// Returns an external mismatch if both endpoints are external and not
/// connected, or a recoverable error if the provider has not converged.
pub async fn connect_security_group(
    cloud: &Cloud,
    ctx: &mut RelationshipContext,
) -> Result<Outcome<()>> {
    let server_id = target_id(&ctx.source)?.to_string();
    let group_id = target_id(&ctx.target)?.to_string();

    if ctx.is_external_pair() {
        info!("Validating external security group and server are associated");
        let groups = cloud.server_security_groups(&server_id).await?;
        if groups.iter().any(|g| g.id == group_id) {
            return Ok(Outcome::done());
        }
        return Err(OperationError::external_mismatch(format!(
            "Expected external resources server {server_id} and security-group {group_id} to be \
             connected"
        ))
        .into());
    }

    let group = group_ref(ctx, &group_id);
    sequencer::connect_security_group(cloud, &server_id, &group).await?;
    Ok(Outcome::done())
}

/// Removes the target security group from the source server.
///
/// # Errors
///
/// Returns a recoverable error if the group is still attached afterwards.
pub async fn disconnect_security_group(
    cloud: &Cloud,
    ctx: &mut RelationshipContext,
) -> Result<Outcome<()>> {
    if ctx.is_external_pair() {
        info!(
            "Not disconnecting security group and server since external security group and \
             server are being used"
        );
        return Ok(Outcome::done());
    }

    let server_id = target_id(&ctx.source)?.to_string();
    let group_id = target_id(&ctx.target)?.to_string();
    let group = group_ref(ctx, &group_id);
    sequencer::disconnect_security_group(cloud, &server_id, &group).await?;
    Ok(Outcome::done())
}

/// Returns true if the router has an interface port on the subnet.
async fn router_on_subnet(cloud: &Cloud, router_id: &str, subnet_id: &str) -> Result<bool> {
    let ports = cloud
        .list(ResourceKind::Port, &Filter::new().with("device_id", router_id))
        .await?;
    Ok(ports.iter().any(|port| port.has_fixed_ip_on(subnet_id)))
}

/// Plugs the source subnet into the target router.
///
/// # Errors
///
/// Returns an external mismatch if both endpoints are external and not
/// connected, or any provider error.
pub async fn connect_subnet(cloud: &Cloud, ctx: &mut RelationshipContext) -> Result<Outcome<()>> {
    let subnet_id = target_id(&ctx.source)?.to_string();
    let router_id = target_id(&ctx.target)?.to_string();
    let connected = router_on_subnet(cloud, &router_id, &subnet_id).await?;

    if ctx.is_external_pair() {
        info!("Validating external subnet and router are associated");
        if connected {
            return Ok(Outcome::done());
        }
        return Err(OperationError::external_mismatch(format!(
            "Expected external resources router {router_id} and subnet {subnet_id} to be \
             connected"
        ))
        .into());
    }

    if connected {
        info!("Subnet {subnet_id} is already connected to router {router_id}");
        return Ok(Outcome::done());
    }
    cloud.add_router_interface(&router_id, &subnet_id).await?;
    info!("Subnet {subnet_id} connected to router {router_id}");
    Ok(Outcome::done())
}

/// Unplugs the source subnet from the target router.
///
/// # Errors
///
/// Returns any provider error other than a missing interface.
pub async fn disconnect_subnet(
    cloud: &Cloud,
    ctx: &mut RelationshipContext,
) -> Result<Outcome<()>> {
    if ctx.is_external_pair() {
        info!("Not disconnecting subnet and router since external subnet and router are being used");
        return Ok(Outcome::done());
    }

    let subnet_id = target_id(&ctx.source)?.to_string();
    let router_id = target_id(&ctx.target)?.to_string();
    match cloud.remove_router_interface(&router_id, &subnet_id).await {
        Ok(()) => Ok(Outcome::done()),
        Err(e) if e.is_not_found() => {
            info!("Subnet {subnet_id} is not connected to router {router_id}");
            Ok(Outcome::done())
        }
        Err(e) => Err(e),
    }
}

/// Poll bounds from the `status_attempts` and `status_timeout` inputs.
fn attach_policy(ctx: &RelationshipContext) -> WaitPolicy {
    let default = WaitPolicy::VOLUME_ATTACH;
    let attempts = ctx
        .input_u64("status_attempts")
        .and_then(|a| u32::try_from(a).ok())
        .unwrap_or(default.attempts);
    let interval = ctx
        .input_u64("status_timeout")
        .map_or(default.interval, Duration::from_secs);
    WaitPolicy::new(attempts, interval).capped()
}

/// Attaches the source volume to the target server.
///
/// The device comes from the volume's `device_name` property; `auto` lets
/// the provider choose. The device in use is stored on the volume.
///
/// # Errors
///
/// Returns an external mismatch for an unattached external pair, or the
/// sequencer's attach error.
pub async fn attach_volume(cloud: &Cloud, ctx: &mut RelationshipContext) -> Result<Outcome<()>> {
    let volume_id = target_id(&ctx.source)?.to_string();
    let server_id = target_id(&ctx.target)?.to_string();
    let policy = attach_policy(ctx);

    let existing = cloud
        .volume_attachments(&server_id)
        .await?
        .into_iter()
        .find(|a| a.volume_id == volume_id);

    if ctx.is_external_pair() {
        info!("Validating external volume and server are connected");
        if existing.is_some() {
            return Ok(Outcome::done());
        }
        return Err(OperationError::external_mismatch(format!(
            "Expected external resources server {server_id} and volume {volume_id} to be \
             connected"
        ))
        .into());
    }

    if let Some(attachment) = existing {
        info!("Volume {volume_id} is already attached to server {server_id}");
        if let Some(device) = attachment.device {
            ctx.source.props.set(keys::DEVICE_NAME, device);
        }
        return Ok(Outcome::done());
    }

    let requested = ctx
        .source
        .node
        .property_str(keys::DEVICE_NAME)
        .unwrap_or(AUTO_DEVICE)
        .to_string();
    let device = sequencer::attach_volume(
        cloud,
        cloud,
        &server_id,
        &volume_id,
        Some(requested.as_str()),
        policy,
    )
    .await?;
    info!("Volume {volume_id} attached to server {server_id} as {device}");
    ctx.source.props.set(keys::DEVICE_NAME, device);
    Ok(Outcome::done())
}

/// Detaches the source volume from the target server.
///
/// # Errors
///
/// Returns a recoverable timeout if the volume does not become available.
pub async fn detach_volume(cloud: &Cloud, ctx: &mut RelationshipContext) -> Result<Outcome<()>> {
    if ctx.is_external_pair() {
        info!("Not detaching volume from server since external volume and server are being used");
        return Ok(Outcome::done());
    }

    let volume_id = target_id(&ctx.source)?.to_string();
    let server_id = target_id(&ctx.target)?.to_string();
    let policy = attach_policy(ctx);
    sequencer::detach_volume(cloud, cloud, &server_id, &volume_id, policy).await?;
    ctx.source.props.remove(keys::DEVICE_NAME);
    Ok(Outcome::done())
}
