//! Helpers shared by the per-kind operations.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::context::{NodeInstance, OperationContext, RuntimeProperties, prefixed};
use crate::error::{OperationError, Result};
use crate::outcome::Outcome;
use crate::provider::{Cloud, Creator, Filter, Lister, ProviderObject, ResourceKind};
use crate::resolver::{Ownership, ResolvedIdentity, Resolver, delete_owned, record_created};

/// Builds a creation payload.
///
/// `base` is overlaid by the node's kind block, then by the `<kind>` input
/// mapping. The resulting name gets the deployment prefix; with no name at
/// all the generated resource name is used.
pub fn object_payload(ctx: &OperationContext, base: Map<String, Value>) -> Map<String, Value> {
    let kind = ctx.node.kind;
    let mut payload = base;
    payload.extend(ctx.node.kind_block());
    if let Some(args) = ctx.input(kind.as_str()).and_then(Value::as_object) {
        payload.extend(args.clone());
    }

    let name = match payload.get("name").and_then(Value::as_str).filter(|n| !n.is_empty()) {
        Some(name) => prefixed(ctx.deployment.resources_prefix.as_deref(), name),
        None => ctx.resource_name(),
    };
    payload.insert(String::from("name"), Value::from(name));
    payload
}

/// Resolves the node and persists the identity.
///
/// # Errors
///
/// Propagates resolver errors.
pub async fn resolve(cloud: &Cloud, ctx: &mut OperationContext) -> Result<ResolvedIdentity> {
    let resolver = Resolver::new(cloud, cloud);
    resolver.resolve_into(&ctx.node, &mut ctx.props).await
}

/// Creates the object and records its identity and payload snapshot.
///
/// # Errors
///
/// Returns any provider error from the create call.
pub async fn create_object(
    cloud: &Cloud,
    props: &mut RuntimeProperties,
    kind: ResourceKind,
    payload: &Map<String, Value>,
) -> Result<ProviderObject> {
    debug!("Creating {kind} with payload: {payload:?}");
    props.set_payload(payload);
    let object = cloud.create(kind, payload).await?;
    let name = object
        .name
        .as_deref()
        .or_else(|| payload.get("name").and_then(Value::as_str));
    record_created(props, kind, &object.id, name);
    info!("{kind} {} created", object.id);
    Ok(object)
}

/// Lifecycle ownership as persisted by earlier invocations.
#[must_use]
pub fn ownership(ctx: &OperationContext) -> Ownership {
    ResolvedIdentity::from_properties(&ctx.node, &ctx.props).ownership
}

/// The object an earlier attempt of this operation already created.
///
/// # Errors
///
/// Returns any provider error other than not-found.
pub async fn already_created(
    cloud: &Cloud,
    ctx: &OperationContext,
) -> Result<Option<ProviderObject>> {
    let Some(id) = ctx.props.external_id() else {
        return Ok(None);
    };
    let kind = ctx.props.external_type().unwrap_or(ctx.node.kind);
    let found = cloud.try_get(kind, id).await?;
    if found.is_some() {
        info!("{kind} {id} was already created; reusing it");
    }
    Ok(found)
}

/// Resolve-or-create for kinds with no extra creation logic.
///
/// # Errors
///
/// Propagates resolver and provider errors.
pub async fn create_simple(
    cloud: &Cloud,
    ctx: &mut OperationContext,
    base: Map<String, Value>,
) -> Result<Outcome<ProviderObject>> {
    let kind = ctx.node.kind;
    let identity = resolve(cloud, ctx).await?;
    if identity.ownership == Ownership::External {
        let id = current_id(ctx)?;
        return Ok(Outcome::Done(ProviderObject {
            id,
            name: identity.provider_name,
            status: None,
            attributes: identity.raw_payload,
        }));
    }
    if let Some(object) = already_created(cloud, ctx).await? {
        return Ok(Outcome::Done(object));
    }

    let payload = object_payload(ctx, base);
    let object = create_object(cloud, &mut ctx.props, kind, &payload).await?;
    Ok(Outcome::Done(object))
}

/// Deletes an owned resource and clears its runtime properties.
///
/// # Errors
///
/// Returns any provider error from the delete call.
pub async fn delete_simple(
    cloud: &Cloud,
    ctx: &mut OperationContext,
    extra_keys: &[&str],
) -> Result<Outcome<()>> {
    delete_owned(cloud, &ctx.node, &mut ctx.props, extra_keys).await?;
    Ok(Outcome::done())
}

/// Pre-flight validation through the resolver.
///
/// # Errors
///
/// Returns the resolver's not-found or quota error.
pub async fn validate(cloud: &Cloud, ctx: &OperationContext) -> Result<Outcome<()>> {
    Resolver::new(cloud, cloud)
        .validate(&ctx.node, &ctx.props)
        .await?;
    debug!("OK: {} configuration is valid", ctx.node.kind);
    Ok(Outcome::done())
}

/// Stores every object of `kind` matching the `filter` input under
/// `<kind>_list`.
///
/// # Errors
///
/// Returns any provider error from the list call.
pub async fn list_into(
    cloud: &Cloud,
    ctx: &mut OperationContext,
    kind: ResourceKind,
) -> Result<Outcome<()>> {
    let mut filter = Filter::new();
    if let Some(args) = ctx.input("filter").and_then(Value::as_object) {
        for (key, value) in args {
            let value = value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_string);
            filter = filter.with(key.as_str(), value);
        }
    }

    let objects = cloud.list(kind, &filter).await?;
    info!("Found {} {}", objects.len(), kind.plural());
    let list: Vec<Value> = objects
        .iter()
        .map(|object| Value::Object(crate::context::scrubbed(&object.to_payload())))
        .collect();
    ctx.props.set(&format!("{kind}_list"), Value::Array(list));
    Ok(Outcome::done())
}

/// The provider id of the current node.
///
/// # Errors
///
/// Returns [`OperationError::InvalidState`] if the node was never resolved.
pub fn current_id(ctx: &OperationContext) -> Result<String> {
    ctx.props.external_id().map(str::to_string).ok_or_else(|| {
        OperationError::invalid_state(format!(
            "{} {} has no external_id; was it created?",
            ctx.node.kind, ctx.deployment.instance_id
        ))
        .into()
    })
}

/// Sets `key` to the id of the first image relationship target, if any.
pub fn image_from_relationship(ctx: &OperationContext, payload: &mut Map<String, Value>, key: &str) {
    if let Some(image_id) = ctx.target_ids(ResourceKind::Image).into_iter().next() {
        info!("Using image {image_id} from relationship");
        payload.insert(key.to_string(), Value::from(image_id));
    }
}

/// The provider id of a relationship target.
///
/// # Errors
///
/// Returns [`OperationError::InvalidState`] if the target was never resolved.
pub fn target_id(target: &NodeInstance) -> Result<&str> {
    target.external_id().ok_or_else(|| {
        OperationError::invalid_state(format!(
            "Related {} node has no external_id; was it created?",
            target.kind()
        ))
        .into()
    })
}
