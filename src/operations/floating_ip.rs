//! Floating IPs.
//!
//! Floating IPs have no name: they are looked up by address, and the
//! address is stored as `floating_ip_address`.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::context::{OperationContext, RelationshipContext, keys};
use crate::error::{ConfigError, Result};
use crate::outcome::Outcome;
use crate::provider::{Cloud, NetworkVerbs, ProviderObject, ResourceKind};
use crate::resolver::Ownership;

use super::common::{self, target_id};

const FLOATING_NETWORK_ID: &str = "floating_network_id";
const FLOATING_NETWORK_NAME: &str = "floating_network_name";

fn record_address(ctx: &mut OperationContext, fip: &ProviderObject) {
    if let Some(address) = fip.attr(keys::FLOATING_IP_ADDRESS) {
        ctx.props.set(keys::FLOATING_IP_ADDRESS, address.clone());
    }
}

/// Resolves an external floating IP by address or allocates a new one.
///
/// The floating network is taken, in order, from `floating_network_id`,
/// `floating_network_name`, the single network relationship, or the
/// provider's external network.
///
/// # Errors
///
/// Returns a validation error if no floating network can be determined.
pub async fn create(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let identity = common::resolve(cloud, ctx).await?;
    if identity.ownership == Ownership::External {
        return Ok(Outcome::done());
    }
    if let Some(fip) = common::already_created(cloud, ctx).await? {
        record_address(ctx, &fip);
        return Ok(Outcome::done());
    }

    let mut payload = ctx.node.kind_block();
    if let Some(args) = ctx
        .input(ResourceKind::FloatingIp.as_str())
        .and_then(Value::as_object)
    {
        payload.extend(args.clone());
    }
    select_network(cloud, ctx, &mut payload).await?;

    let fip =
        common::create_object(cloud, &mut ctx.props, ResourceKind::FloatingIp, &payload).await?;
    record_address(ctx, &fip);
    info!("Floating IP creation response: {fip:?}");
    Ok(Outcome::done())
}

async fn select_network(
    cloud: &Cloud,
    ctx: &OperationContext,
    payload: &mut Map<String, Value>,
) -> Result<()> {
    let network_from_relationship = ctx
        .single_target(ResourceKind::Network)?
        .and_then(|network| network.external_id())
        .map(str::to_string);

    if let Some(id) = payload.get(FLOATING_NETWORK_ID).and_then(Value::as_str) {
        debug!("Using floating ip network {id}.");
        return Ok(());
    }

    if let Some(name) = payload.remove(FLOATING_NETWORK_NAME) {
        let name = name.as_str().unwrap_or_default().to_string();
        let network = cloud.find_named(ResourceKind::Network, &name).await?;
        debug!(
            "Using floating ip network {} from name {name} provided.",
            network.id
        );
        payload.insert(String::from(FLOATING_NETWORK_ID), Value::from(network.id));
        return Ok(());
    }

    let id = match (network_from_relationship, &ctx.provider.ext_network) {
        (Some(id), _) => {
            debug!("Using floating ip network {id} from relationship.");
            id
        }
        (None, Some(ext)) => {
            debug!("Using floating ip network {} from provider context.", ext.id);
            ext.id.clone()
        }
        (None, None) => {
            return Err(ConfigError::validation(
                "Network name must be specified by either a floating_network_name, a \
                 floating_network_id, or a relationship to a Network node template",
                FLOATING_NETWORK_ID,
            )
            .into());
        }
    };
    payload.insert(String::from(FLOATING_NETWORK_ID), Value::from(id));
    Ok(())
}

/// Releases an owned floating IP.
///
/// # Errors
///
/// Returns any provider error from the delete call.
pub async fn delete(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    common::delete_simple(cloud, ctx, &[keys::FLOATING_IP_ADDRESS]).await
}

/// Validates the declaration against the provider.
///
/// # Errors
///
/// Returns the resolver's not-found or quota error.
pub async fn creation_validation(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    common::validate(cloud, ctx).await
}

/// Stores the floating IPs matching the `filter` input.
///
/// # Errors
///
/// Returns any provider error from the list call.
pub async fn list(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    common::list_into(cloud, ctx, ResourceKind::FloatingIp).await
}

async fn set_port(cloud: &Cloud, fip_id: &str, port_id: Option<&str>) -> Result<()> {
    let mut patch = Map::new();
    patch.insert(
        String::from("port_id"),
        port_id.map_or(Value::Null, Value::from),
    );
    cloud.update(ResourceKind::FloatingIp, fip_id, &patch).await?;
    Ok(())
}

/// Binds the target floating IP to the source port.
///
/// # Errors
///
/// Returns any provider error from the update.
pub async fn connect_port(cloud: &Cloud, ctx: &mut RelationshipContext) -> Result<Outcome<()>> {
    if ctx.is_external_pair() {
        return Ok(Outcome::done());
    }
    let port_id = target_id(&ctx.source)?;
    let fip_id = target_id(&ctx.target)?;
    set_port(cloud, fip_id, Some(port_id)).await?;
    info!("Floating IP {fip_id} bound to port {port_id}");
    Ok(Outcome::done())
}

/// Unbinds the target floating IP from its port.
///
/// # Errors
///
/// Returns any provider error from the update.
pub async fn disconnect_port(cloud: &Cloud, ctx: &mut RelationshipContext) -> Result<Outcome<()>> {
    if ctx.is_external_pair() {
        info!(
            "Not disassociating floatingip and port since external floatingip and port are being \
             used"
        );
        return Ok(Outcome::done());
    }
    let fip_id = target_id(&ctx.target)?;
    set_port(cloud, fip_id, None).await?;
    Ok(Outcome::done())
}
