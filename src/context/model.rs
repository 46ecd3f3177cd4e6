//! Declared resources, relationships and the per-invocation context.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::{ConfigError, ResolveError, Result};
use crate::provider::ResourceKind;

use super::properties::RuntimeProperties;

/// A resource as the topology declares it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredResource {
    /// Kind of the resource.
    pub kind: ResourceKind,
    /// Name (or id) of the resource; generated when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Declared node properties, including the kind-specific block.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// The resource pre-exists and is only looked up.
    #[serde(default, rename = "use_external_resource")]
    pub use_external: bool,
    /// Create the resource if it is declared external but missing.
    #[serde(default)]
    pub create_if_missing: bool,
}

impl DeclaredResource {
    /// Creates a managed declaration with no properties.
    #[must_use]
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            resource_id: None,
            properties: Map::new(),
            use_external: false,
            create_if_missing: false,
        }
    }

    /// Sets the resource id.
    #[must_use]
    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    /// Declares the resource external.
    #[must_use]
    pub const fn external(mut self, create_if_missing: bool) -> Self {
        self.use_external = true;
        self.create_if_missing = create_if_missing;
        self
    }

    /// Sets a node property.
    #[must_use]
    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Returns the declared resource id, ignoring empty strings.
    #[must_use]
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Returns a node property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).filter(|v| !v.is_null())
    }

    /// Returns a non-empty string node property.
    #[must_use]
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.property(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Returns a boolean node property, `false` when absent.
    #[must_use]
    pub fn property_flag(&self, key: &str) -> bool {
        self.property(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Returns the kind-specific property block (`server:`, `volume:`, ...).
    #[must_use]
    pub fn kind_block(&self) -> Map<String, Value> {
        self.properties
            .get(self.kind.as_str())
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    /// Conditional creation only applies to external declarations.
    #[must_use]
    pub const fn wants_conditional_creation(&self) -> bool {
        self.use_external && self.create_if_missing
    }
}

/// Kind of a relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Ordering-only dependency.
    DependsOn,
    /// Server, port or router to network.
    ConnectedToNetwork,
    /// Server to port.
    ConnectedToPort,
    /// Server or port to security group.
    ConnectedToSecurityGroup,
    /// Server to volume.
    ConnectedToVolume,
    /// Server to keypair.
    ConnectedToKeypair,
    /// Server or port to floating IP.
    #[serde(rename = "connected_to_floatingip")]
    ConnectedToFloatingIp,
    /// Server to server group.
    ConnectedToServerGroup,
}

/// A node instance: its declaration plus its stored runtime properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInstance {
    /// The declaration.
    pub node: DeclaredResource,
    /// Runtime properties stored for this instance.
    #[serde(default, rename = "runtime_properties")]
    pub props: RuntimeProperties,
}

impl NodeInstance {
    /// Wraps a declaration with its runtime properties.
    #[must_use]
    pub const fn new(node: DeclaredResource, props: RuntimeProperties) -> Self {
        Self { node, props }
    }

    /// Resolved kind: the stored `external_type`, else the declared kind.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.props.external_type().unwrap_or(self.node.kind)
    }

    /// Provider id, once resolved.
    #[must_use]
    pub fn external_id(&self) -> Option<&str> {
        self.props.external_id()
    }

    /// Provider name, once resolved.
    #[must_use]
    pub fn external_name(&self) -> Option<&str> {
        self.props.external_name()
    }

    /// External and not created by this engine.
    #[must_use]
    pub fn is_external_not_created(&self) -> bool {
        self.node.use_external && !self.props.conditionally_created()
    }
}

/// A directed edge from the current node to `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Kind of the edge.
    pub kind: RelationshipKind,
    /// The target instance.
    pub target: NodeInstance,
}

/// A resource the provider environment supplies by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedResource {
    /// Provider id.
    pub id: String,
    /// Provider name.
    pub name: String,
}

/// Defaults supplied by the provider environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderContext {
    /// Keypair injected into servers with no other keypair.
    pub agents_keypair: Option<NamedResource>,
    /// Security group every created server joins.
    pub agents_security_group: Option<NamedResource>,
    /// Default management network.
    pub int_network: Option<NamedResource>,
    /// Default external network for floating IPs.
    pub ext_network: Option<NamedResource>,
    /// Private key used to decrypt generated server passwords.
    pub agent_key_path: Option<String>,
}

/// Deployment identifiers used for generated names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Deployment id.
    pub deployment_id: String,
    /// Node instance id.
    pub instance_id: String,
    /// Prefix prepended to generated and declared names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_prefix: Option<String>,
}

/// Everything a node operation reads and writes.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// The current node's declaration.
    pub node: DeclaredResource,
    /// The current node's runtime properties (read and written).
    pub props: RuntimeProperties,
    /// Outgoing relationships, in declaration order.
    pub relationships: Vec<Relationship>,
    /// Operation arguments.
    pub inputs: Map<String, Value>,
    /// Zero on the first attempt of this operation.
    pub retry_number: u32,
    /// Provider-environment defaults.
    pub provider: ProviderContext,
    /// Deployment identifiers.
    pub deployment: Deployment,
    /// Unique id of this invocation.
    pub invocation_id: Uuid,
}

impl OperationContext {
    /// Creates a context for a first attempt with no relationships.
    #[must_use]
    pub fn new(node: DeclaredResource, deployment: Deployment) -> Self {
        Self {
            node,
            props: RuntimeProperties::new(),
            relationships: Vec::new(),
            inputs: Map::new(),
            retry_number: 0,
            provider: ProviderContext::default(),
            deployment,
            invocation_id: Uuid::new_v4(),
        }
    }

    /// Adds a relationship.
    #[must_use]
    pub fn with_relationship(mut self, kind: RelationshipKind, target: NodeInstance) -> Self {
        self.relationships.push(Relationship { kind, target });
        self
    }

    /// Sets an operation input.
    #[must_use]
    pub fn with_input(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.to_string(), value.into());
        self
    }

    /// Targets whose resolved kind is `kind`, in declaration order.
    pub fn targets_of(&self, kind: ResourceKind) -> impl Iterator<Item = &NodeInstance> {
        self.relationships
            .iter()
            .map(|r| &r.target)
            .filter(move |t| t.kind() == kind)
    }

    /// Provider ids of the targets of `kind`.
    #[must_use]
    pub fn target_ids(&self, kind: ResourceKind) -> Vec<String> {
        self.targets_of(kind)
            .filter_map(NodeInstance::external_id)
            .map(str::to_string)
            .collect()
    }

    /// Provider names of the targets of `kind`.
    #[must_use]
    pub fn target_names(&self, kind: ResourceKind) -> Vec<String> {
        self.targets_of(kind)
            .filter_map(NodeInstance::external_name)
            .map(str::to_string)
            .collect()
    }

    /// The single target of `kind`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::RelationshipCount`] if there is more than one.
    pub fn single_target(&self, kind: ResourceKind) -> Result<Option<&NodeInstance>> {
        let mut targets = self.targets_of(kind);
        let first = targets.next();
        let rest = targets.count();
        if rest > 0 {
            return Err(ResolveError::RelationshipCount {
                kind,
                expected: "at most one",
                found: rest + 1,
            }
            .into());
        }
        Ok(first)
    }

    /// The only target of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::RelationshipCount`] unless there is exactly one.
    pub fn required_target(&self, kind: ResourceKind) -> Result<&NodeInstance> {
        let count = self.targets_of(kind).count();
        match self.targets_of(kind).next() {
            Some(target) if count == 1 => Ok(target),
            _ => Err(ResolveError::RelationshipCount {
                kind,
                expected: "exactly one",
                found: count,
            }
            .into()),
        }
    }

    /// Returns an input value.
    #[must_use]
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key).filter(|v| !v.is_null())
    }

    /// Returns a non-empty string input.
    #[must_use]
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Returns a string input or a missing-property error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingProperty`] if the input is absent.
    pub fn require_input(&self, key: &str) -> Result<&str> {
        self.input_str(key)
            .ok_or_else(|| ConfigError::missing(key).into())
    }

    /// Returns an unsigned integer input, accepting numeric strings.
    #[must_use]
    pub fn input_u64(&self, key: &str) -> Option<u64> {
        self.input(key).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        })
    }

    /// Returns a boolean input, `default` when absent.
    #[must_use]
    pub fn input_flag(&self, key: &str, default: bool) -> bool {
        self.input(key).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Name for a resource this engine creates.
    ///
    /// Uses the declared `resource_id`, else `{kind}_{deployment}_{instance}`,
    /// with the deployment's resource prefix prepended.
    #[must_use]
    pub fn resource_name(&self) -> String {
        let base = self.node.resource_id().map_or_else(
            || {
                format!(
                    "{}_{}_{}",
                    self.node.kind, self.deployment.deployment_id, self.deployment.instance_id
                )
            },
            str::to_string,
        );
        prefixed(self.deployment.resources_prefix.as_deref(), &base)
    }
}

/// Prepends `prefix` to `name` unless it already starts with it.
#[must_use]
pub fn prefixed(prefix: Option<&str>, name: &str) -> String {
    match prefix.filter(|p| !p.is_empty()) {
        Some(prefix) if name.starts_with(prefix) => {
            tracing::warn!("Prefixing resource with name {name} which already has prefix {prefix}");
            format!("{prefix}{name}")
        }
        Some(prefix) => format!("{prefix}{name}"),
        None => name.to_string(),
    }
}

/// Everything a relationship operation reads and writes.
#[derive(Debug, Clone)]
pub struct RelationshipContext {
    /// The source instance (e.g. the server).
    pub source: NodeInstance,
    /// The target instance (e.g. the volume).
    pub target: NodeInstance,
    /// Operation arguments.
    pub inputs: Map<String, Value>,
    /// Zero on the first attempt of this operation.
    pub retry_number: u32,
    /// Unique id of this invocation.
    pub invocation_id: Uuid,
}

impl RelationshipContext {
    /// Creates a context for a first attempt.
    #[must_use]
    pub fn new(source: NodeInstance, target: NodeInstance) -> Self {
        Self {
            source,
            target,
            inputs: Map::new(),
            retry_number: 0,
            invocation_id: Uuid::new_v4(),
        }
    }

    /// Sets an operation input.
    #[must_use]
    pub fn with_input(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.to_string(), value.into());
        self
    }

    /// Both endpoints are external and neither was conditionally created.
    #[must_use]
    pub fn is_external_pair(&self) -> bool {
        self.source.is_external_not_created() && self.target.is_external_not_created()
    }

    /// Returns a non-empty string input.
    #[must_use]
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.inputs
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Returns an unsigned integer input, accepting numeric strings.
    #[must_use]
    pub fn input_u64(&self, key: &str) -> Option<u64> {
        self.inputs.get(key).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        })
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DependsOn => "depends_on",
            Self::ConnectedToNetwork => "connected_to_network",
            Self::ConnectedToPort => "connected_to_port",
            Self::ConnectedToSecurityGroup => "connected_to_security_group",
            Self::ConnectedToVolume => "connected_to_volume",
            Self::ConnectedToKeypair => "connected_to_keypair",
            Self::ConnectedToFloatingIp => "connected_to_floatingip",
            Self::ConnectedToServerGroup => "connected_to_server_group",
        };
        write!(f, "{name}")
    }
}
