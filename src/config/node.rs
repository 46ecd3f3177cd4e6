//! The declared node document.
//!
//! One YAML file describes a single node instance: its declaration, its
//! outgoing relationships, provider-environment defaults and the inputs of
//! the operation about to run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::{
    DeclaredResource, Deployment, NodeInstance, OperationContext, ProviderContext, Relationship,
    RelationshipContext, RelationshipKind, RuntimeProperties,
};
use crate::error::{ConfigError, Result};

/// One outgoing relationship as written in the node document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEntry {
    /// Kind of the edge.
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    /// Instance id of the target, used to load its stored properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_instance: Option<String>,
    /// The target's declaration and any inline runtime properties.
    pub target: NodeInstance,
}

/// A node document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    /// Deployment the node belongs to.
    pub deployment_id: String,
    /// Node instance id; also keys the property store.
    pub instance_id: String,
    /// Prefix prepended to resource names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_prefix: Option<String>,
    /// The node's declaration.
    pub node: DeclaredResource,
    /// Outgoing relationships, in declaration order.
    #[serde(default)]
    pub relationships: Vec<RelationshipEntry>,
    /// Provider-environment defaults.
    #[serde(default)]
    pub provider_context: ProviderContext,
    /// Operation inputs.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Inline provider configuration, highest precedence.
    #[serde(default)]
    pub openstack_config: Map<String, Value>,
}

impl NodeDocument {
    /// Deployment identifiers of this node.
    #[must_use]
    pub fn deployment(&self) -> Deployment {
        Deployment {
            deployment_id: self.deployment_id.clone(),
            instance_id: self.instance_id.clone(),
            resources_prefix: self.resources_prefix.clone(),
        }
    }

    /// Builds the context of a node operation.
    ///
    /// `targets` holds the stored properties of relationship targets, in
    /// relationship order; stored values override inline ones.
    #[must_use]
    pub fn operation_context(
        &self,
        props: RuntimeProperties,
        targets: &[Option<RuntimeProperties>],
        retry_number: u32,
    ) -> OperationContext {
        let mut ctx = OperationContext::new(self.node.clone(), self.deployment());
        ctx.props = props;
        ctx.relationships = self
            .relationships
            .iter()
            .enumerate()
            .map(|(index, entry)| Relationship {
                kind: entry.kind,
                target: merged_target(entry, targets.get(index).and_then(Option::as_ref)),
            })
            .collect();
        ctx.inputs = self.inputs.clone();
        ctx.retry_number = retry_number;
        ctx.provider = self.provider_context.clone();
        ctx
    }

    /// Builds the context of a relationship operation on the edge at
    /// `index`, with this node as the source.
    ///
    /// # Errors
    ///
    /// Returns an invalid-value error if there is no relationship at `index`.
    pub fn relationship_context(
        &self,
        index: usize,
        source_props: RuntimeProperties,
        target_props: Option<&RuntimeProperties>,
        retry_number: u32,
    ) -> Result<RelationshipContext> {
        let entry = self.relationships.get(index).ok_or_else(|| {
            ConfigError::invalid(
                "relationship",
                format!(
                    "node {} has {} relationship(s), no index {index}",
                    self.instance_id,
                    self.relationships.len()
                ),
            )
        })?;

        let source = NodeInstance::new(self.node.clone(), source_props);
        let mut ctx = RelationshipContext::new(source, merged_target(entry, target_props));
        ctx.inputs = self.inputs.clone();
        ctx.retry_number = retry_number;
        Ok(ctx)
    }
}

fn merged_target(entry: &RelationshipEntry, stored: Option<&RuntimeProperties>) -> NodeInstance {
    let mut target = entry.target.clone();
    if let Some(stored) = stored {
        for (key, value) in stored.iter() {
            target.props.set(key, value.clone());
        }
    }
    target
}
