//! Kinds with no creation logic of their own: keypairs, server groups,
//! security groups and images.

use serde_json::{Map, Value};

use crate::context::OperationContext;
use crate::error::{ConfigError, Result};
use crate::outcome::Outcome;
use crate::provider::{Cloud, ResourceKind};

use super::common;

/// Kinds handled here.
pub const KINDS: [ResourceKind; 4] = [
    ResourceKind::Keypair,
    ResourceKind::ServerGroup,
    ResourceKind::SecurityGroup,
    ResourceKind::Image,
];

fn base_payload(ctx: &OperationContext) -> Result<Map<String, Value>> {
    let mut base = Map::new();
    match ctx.node.kind {
        ResourceKind::ServerGroup => {
            let policy = ctx
                .node
                .property_str("policy")
                .ok_or_else(|| ConfigError::missing("policy"))?;
            base.insert(
                String::from("policies"),
                Value::Array(vec![Value::from(policy)]),
            );
        }
        ResourceKind::SecurityGroup => {
            if let Some(description) = ctx.node.property_str("description") {
                base.insert(String::from("description"), Value::from(description));
            }
        }
        _ => {}
    }
    Ok(base)
}

/// Resolves or creates the node's resource.
///
/// # Errors
///
/// Returns a missing-field error for a server group without `policy`, and
/// propagates resolver and provider errors.
pub async fn create(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let adopt_only = ctx.node.use_external && !ctx.node.wants_conditional_creation();
    let base = if adopt_only { Map::new() } else { base_payload(ctx)? };
    common::create_simple(cloud, ctx, base)
        .await
        .map(Outcome::discard)
}

/// Deletes an owned resource; an external one only loses its properties.
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

/// Stores the resources of the node's kind matching the `filter` input.
///
/// # Errors
///
/// Returns any provider error from the list call.
pub async fn list(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let kind = ctx.node.kind;
    common::list_into(cloud, ctx, kind).await
}
