//! Context builders for operation tests.

use crate::context::{
    DeclaredResource, Deployment, NodeInstance, OperationContext, RuntimeProperties, keys,
};
use crate::provider::ResourceKind;

pub fn deployment() -> Deployment {
    Deployment {
        deployment_id: String::from("dep"),
        instance_id: String::from("node_1"),
        resources_prefix: None,
    }
}

pub fn context(node: DeclaredResource) -> OperationContext {
    OperationContext::new(node, deployment())
}

/// A context whose node was already resolved to `id`.
pub fn resolved_context(node: DeclaredResource, id: &str) -> OperationContext {
    let kind = node.kind;
    let mut ctx = context(node);
    ctx.props = resolved_props(kind, id, id);
    ctx
}

pub fn resolved_props(kind: ResourceKind, id: &str, name: &str) -> RuntimeProperties {
    let mut props = RuntimeProperties::new();
    props.set(keys::EXTERNAL_ID, id);
    props.set(keys::EXTERNAL_NAME, name);
    props.set(keys::EXTERNAL_TYPE, kind.as_str());
    props
}

/// A managed, already created relationship target.
pub fn target(kind: ResourceKind, id: &str, name: &str) -> NodeInstance {
    NodeInstance::new(DeclaredResource::new(kind), resolved_props(kind, id, name))
}

/// An external relationship target.
pub fn external_target(kind: ResourceKind, id: &str, name: &str) -> NodeInstance {
    NodeInstance::new(
        DeclaredResource::new(kind).with_resource_id(name).external(false),
        resolved_props(kind, id, name),
    )
}
