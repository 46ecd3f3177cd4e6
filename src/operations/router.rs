//! Routers and their external gateway.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::context::{COMMON_KEYS, OperationContext};
use crate::error::{ConfigError, OperationError, ResolveError, Result};
use crate::outcome::Outcome;
use crate::provider::{Cloud, Getter, ResourceKind};
use crate::resolver::{Ownership, Resolver};

use super::common;

const EXTERNAL_GATEWAY_INFO: &str = "external_gateway_info";
const EXTERNAL_NETWORK: &str = "external_network";
const ROUTER_EXTERNAL: &str = "router:external";
const NETWORK_ID: &str = "network_id";

/// Resolves or creates a router.
///
/// The gateway network comes from `external_gateway_info.network_id`, the
/// `external_network` property (name or id), an external network
/// relationship, or the provider context's external network, in that
/// order. An external router related to an external network must already
/// use it as its gateway.
///
/// # Errors
///
/// Returns a validation error if the gateway is named both by property and
/// by relationship, or an external mismatch for an adopted router.
pub async fn create(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let identity = common::resolve(cloud, ctx).await?;
    if identity.ownership == Ownership::External {
        if let Err(e) = validate_external(cloud, ctx).await {
            ctx.props.clear_keys(&COMMON_KEYS);
            return Err(e);
        }
        return Ok(Outcome::done());
    }
    if common::already_created(cloud, ctx).await?.is_some() {
        return Ok(Outcome::done());
    }

    let mut payload = common::object_payload(ctx, Map::new());
    set_gateway(cloud, ctx, &mut payload).await?;
    common::create_object(cloud, &mut ctx.props, ResourceKind::Router, &payload).await?;
    Ok(Outcome::done())
}

async fn validate_external(cloud: &Cloud, ctx: &OperationContext) -> Result<()> {
    let Some(network_id) = related_external_network(cloud, ctx).await? else {
        return Ok(());
    };
    let router_id = common::current_id(ctx)?;
    let router = cloud.get(ResourceKind::Router, &router_id).await?;
    let gateway = router
        .attr(EXTERNAL_GATEWAY_INFO)
        .and_then(|info| info.get(NETWORK_ID))
        .and_then(Value::as_str);
    if gateway == Some(network_id.as_str()) {
        return Ok(());
    }
    Err(OperationError::external_mismatch(format!(
        "Expected external resources router {router_id} and external network {network_id} to \
         be connected"
    ))
    .into())
}

/// The single related network flagged `router:external`.
async fn related_external_network(cloud: &Cloud, ctx: &OperationContext) -> Result<Option<String>> {
    let mut external = Vec::new();
    for id in ctx.target_ids(ResourceKind::Network) {
        let network = cloud.get(ResourceKind::Network, &id).await?;
        if network.bool_attr(ROUTER_EXTERNAL) == Some(true) {
            external.push(id);
        }
    }
    if external.len() > 1 {
        return Err(ConfigError::validation(
            format!(
                "More than one external network is connected to the router by a relationship; \
                 external network ids: {}",
                external.join(", ")
            ),
            "relationships",
        )
        .into());
    }
    Ok(external.pop())
}

async fn set_gateway(
    cloud: &Cloud,
    ctx: &OperationContext,
    payload: &mut Map<String, Value>,
) -> Result<()> {
    let mut by_property = ctx.node.property_str(EXTERNAL_NETWORK).map(str::to_string);
    if let Some(Value::Object(info)) = payload.get_mut(EXTERNAL_GATEWAY_INFO) {
        if let Some(name) = info.remove("network_name") {
            warn!(
                "\"network_name\" inside \"external_gateway_info\" is deprecated; use the \
                 \"external_network\" property instead"
            );
            by_property = name.as_str().map(str::to_string);
        }
        if let Some(id) = info.get(NETWORK_ID).and_then(Value::as_str) {
            debug!("Using router gateway network {id}.");
            return Ok(());
        }
    }

    let by_relationship = related_external_network(cloud, ctx).await?;
    let network_id = match (by_property, by_relationship) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::validation(
                "Router can't have an external network connected by both a relationship and by \
                 a network name/id",
                EXTERNAL_NETWORK,
            )
            .into());
        }
        (Some(identifier), None) => {
            let found = Resolver::new(cloud, cloud)
                .lookup(ResourceKind::Network, &identifier)
                .await?;
            found
                .ok_or(ResolveError::ResourceNotFound {
                    kind: ResourceKind::Network,
                    identifier,
                })?
                .id
        }
        (None, Some(id)) => id,
        (None, None) => match &ctx.provider.ext_network {
            Some(ext) if defaults_to_provider_network(ctx) => {
                debug!("Using router gateway network {} from provider context.", ext.id);
                ext.id.clone()
            }
            _ => {
                info!("Router has no external gateway");
                return Ok(());
            }
        },
    };

    let mut info = match payload.remove(EXTERNAL_GATEWAY_INFO) {
        Some(Value::Object(info)) => info,
        _ => Map::new(),
    };
    info.insert(String::from(NETWORK_ID), Value::from(network_id));
    payload.insert(String::from(EXTERNAL_GATEWAY_INFO), Value::Object(info));
    Ok(())
}

fn defaults_to_provider_network(ctx: &OperationContext) -> bool {
    ctx.node
        .property("default_to_managers_external_network")
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

/// Deletes an owned router.
///
/// # Errors
///
/// Returns any provider error from the delete call.
pub async fn delete(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    common::delete_simple(cloud, ctx, &[]).await
}

/// Validates the declaration against the provider.
///
/// # Errors
///
/// Returns the resolver's not-found or quota error.
pub async fn creation_validation(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    common::validate(cloud, ctx).await
}

/// Stores the routers matching the `filter` input.
///
/// # Errors
///
/// Returns any provider error from the list call.
pub async fn list(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    common::list_into(cloud, ctx, ResourceKind::Router).await
}
