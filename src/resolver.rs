//! Resource identity resolution.
//!
//! Decides whether a declared resource is managed (created and deleted here),
//! external (looked up, never deleted) or conditionally created (declared
//! external, missing, and therefore created and owned here).

use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::context::{COMMON_KEYS, DeclaredResource, RuntimeProperties, keys};
use crate::error::{ConfigError, ResolveError, Result};
use crate::provider::{
    Deleter, Filter, Lister, ProviderObject, QuotaProvider, ResourceKind, UNLIMITED_QUOTA,
    find_one,
};

/// Who owns the lifecycle of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Created and deleted by this engine.
    Managed,
    /// Pre-existing; only looked up.
    External,
    /// Declared external but missing, so created and deleted by this engine.
    ConditionallyCreated,
}

impl Ownership {
    /// Whether teardown issues a provider delete.
    #[must_use]
    pub const fn deletes_on_teardown(self) -> bool {
        !matches!(self, Self::External)
    }

    /// Whether the resource still has to be created.
    #[must_use]
    pub const fn needs_creation(self) -> bool {
        !matches!(self, Self::External)
    }
}

/// The outcome of resolving a declared resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIdentity {
    /// Provider id; `None` until a managed resource is created.
    pub provider_id: Option<String>,
    /// Provider name.
    pub provider_name: Option<String>,
    /// Lifecycle ownership.
    pub ownership: Ownership,
    /// The provider object as found.
    pub raw_payload: Map<String, Value>,
}

impl ResolvedIdentity {
    /// Identity of a resource that will be created.
    #[must_use]
    pub fn to_create(ownership: Ownership) -> Self {
        Self {
            provider_id: None,
            provider_name: None,
            ownership,
            raw_payload: Map::new(),
        }
    }

    /// Identity of an existing external resource.
    #[must_use]
    pub fn external(object: &ProviderObject) -> Self {
        Self {
            provider_id: Some(object.id.clone()),
            provider_name: object.name.clone(),
            ownership: Ownership::External,
            raw_payload: object.to_payload(),
        }
    }

    /// Rebuilds the identity from what an earlier invocation persisted.
    #[must_use]
    pub fn from_properties(node: &DeclaredResource, props: &RuntimeProperties) -> Self {
        let ownership = if !node.use_external {
            Ownership::Managed
        } else if props.conditionally_created() {
            Ownership::ConditionallyCreated
        } else {
            Ownership::External
        };
        Self {
            provider_id: props.external_id().map(str::to_string),
            provider_name: props.external_name().map(str::to_string),
            ownership,
            raw_payload: props
                .get(keys::EXTERNAL_RESOURCE)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Writes the identity into the runtime properties.
    ///
    /// Floating IPs store their address instead of a name.
    pub fn persist(&self, kind: ResourceKind, props: &mut RuntimeProperties) {
        match self.ownership {
            Ownership::Managed => {}
            Ownership::ConditionallyCreated => props.set(keys::CONDITIONALLY_CREATED, true),
            Ownership::External => {
                if let Some(id) = &self.provider_id {
                    props.set(keys::EXTERNAL_ID, id.as_str());
                }
                props.set(keys::EXTERNAL_TYPE, kind.as_str());
                props.set_payload(&self.raw_payload);
                if kind == ResourceKind::FloatingIp {
                    if let Some(address) = self.raw_payload.get(keys::FLOATING_IP_ADDRESS) {
                        props.set(keys::FLOATING_IP_ADDRESS, address.clone());
                    }
                } else if let Some(name) = &self.provider_name {
                    props.set(keys::EXTERNAL_NAME, name.as_str());
                }
            }
        }
    }
}

/// Records a newly created resource's identity.
pub fn record_created(
    props: &mut RuntimeProperties,
    kind: ResourceKind,
    id: &str,
    name: Option<&str>,
) {
    props.set(keys::EXTERNAL_ID, id);
    props.set(keys::EXTERNAL_TYPE, kind.as_str());
    if let Some(name) = name {
        props.set(keys::EXTERNAL_NAME, name);
    }
}

/// Fails if an identity is supplied both inline and through a relationship.
///
/// # Errors
///
/// Returns [`ResolveError::ConflictingConfiguration`] if both are present.
pub fn ensure_single_source(
    field: &str,
    inline_present: bool,
    related: ResourceKind,
    relationship_present: bool,
) -> Result<()> {
    if inline_present && relationship_present {
        return Err(ResolveError::conflict(format!(
            "can't both have the \"{field}\" nested property and be connected to a {related} \
             via a relationship at the same time"
        ))
        .into());
    }
    Ok(())
}

/// Resolves declared resources against the provider.
pub struct Resolver<'a> {
    lister: &'a dyn Lister,
    quotas: &'a dyn QuotaProvider,
    quota_exempt: Vec<ResourceKind>,
}

impl std::fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("quota_exempt", &self.quota_exempt)
            .finish_non_exhaustive()
    }
}

impl<'a> Resolver<'a> {
    /// Creates a resolver; compute servers are exempt from the quota check.
    #[must_use]
    pub fn new(lister: &'a dyn Lister, quotas: &'a dyn QuotaProvider) -> Self {
        Self {
            lister,
            quotas,
            quota_exempt: vec![ResourceKind::Server],
        }
    }

    /// Replaces the kinds exempt from the quota check.
    #[must_use]
    pub fn with_quota_exempt(mut self, kinds: Vec<ResourceKind>) -> Self {
        self.quota_exempt = kinds;
        self
    }

    /// Finds a resource by name (or the kind's name-equivalent), falling
    /// back to its id.
    ///
    /// # Errors
    ///
    /// Returns an ambiguity error if a lookup matches several objects.
    pub async fn lookup(
        &self,
        kind: ResourceKind,
        identifier: &str,
    ) -> Result<Option<ProviderObject>> {
        let by_name = Filter::new().with(kind.name_field(), identifier);
        if let Some(found) = find_one(self.lister, kind, &by_name).await? {
            return Ok(Some(found));
        }
        find_one(self.lister, kind, &Filter::new().with("id", identifier)).await
    }

    /// Resolves a declared resource.
    ///
    /// A stored `external_id` takes precedence over the declared
    /// `resource_id`, so a re-invoked operation finds the same object. A
    /// resource this engine created on demand stays conditionally created
    /// and is not looked up again.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ResourceNotFound`] if an external resource is
    /// missing and may not be created, or a validation error if an external
    /// declaration has no `resource_id`.
    pub async fn resolve(
        &self,
        node: &DeclaredResource,
        props: &RuntimeProperties,
    ) -> Result<ResolvedIdentity> {
        if !node.use_external {
            return Ok(ResolvedIdentity::to_create(Ownership::Managed));
        }
        if props.conditionally_created() {
            debug!(
                "{} {} was created on demand; keeping ownership",
                node.kind,
                props.external_id().unwrap_or("(pending)")
            );
            return Ok(ResolvedIdentity::from_properties(node, props));
        }

        let identifier = props
            .external_id()
            .or_else(|| node.resource_id())
            .ok_or_else(|| {
                ConfigError::validation(
                    "Can't set 'use_external_resource' to True without supplying a value for \
                     'resource_id'",
                    "resource_id",
                )
            })?;

        match self.lookup(node.kind, identifier).await? {
            Some(object) => {
                info!(
                    "Using external resource {}: {}",
                    node.kind,
                    object.name.as_deref().unwrap_or(identifier)
                );
                Ok(ResolvedIdentity::external(&object))
            }
            None if node.create_if_missing => {
                info!(
                    "External {} {identifier} not found; it will be created",
                    node.kind
                );
                Ok(ResolvedIdentity::to_create(Ownership::ConditionallyCreated))
            }
            None => Err(ResolveError::ResourceNotFound {
                kind: node.kind,
                identifier: identifier.to_string(),
            }
            .into()),
        }
    }

    /// Resolves and persists the identity.
    ///
    /// # Errors
    ///
    /// Propagates [`Resolver::resolve`] errors.
    pub async fn resolve_into(
        &self,
        node: &DeclaredResource,
        props: &mut RuntimeProperties,
    ) -> Result<ResolvedIdentity> {
        let identity = self.resolve(node, props).await?;
        identity.persist(node.kind, props);
        Ok(identity)
    }

    /// Pre-flight validation: external resources must exist, and resources
    /// to be created must fit in the provider quota.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ResourceNotFound`] or
    /// [`ResolveError::QuotaExceeded`].
    pub async fn validate(&self, node: &DeclaredResource, props: &RuntimeProperties) -> Result<()> {
        debug!("Validating resource {} ({})", node.kind, node.resource_id().unwrap_or("-"));

        match self.resolve(node, props).await {
            Ok(identity) if identity.ownership == Ownership::External => {
                debug!("OK: {} {} found in pool", node.kind, node.resource_id().unwrap_or("-"));
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                error!("VALIDATION ERROR: {e}");
                self.log_existing(node.kind).await;
                return Err(e);
            }
        }

        self.check_quota(node.kind).await
    }

    /// Fails if creating one more resource of `kind` would exceed the quota.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::QuotaExceeded`] when at capacity.
    pub async fn check_quota(&self, kind: ResourceKind) -> Result<()> {
        if self.quota_exempt.contains(&kind) {
            debug!("Skipping quota check for {}", kind.plural());
            return Ok(());
        }

        let provisioned = self.lister.list(kind, &Filter::new()).await?.len();
        let quota = self.quotas.quota(kind).await?;

        let within = quota == UNLIMITED_QUOTA
            || i64::try_from(provisioned).is_ok_and(|count| count < quota);
        if within {
            debug!(
                "OK: {kind} can be created. provisioned {}: {provisioned}, quota: {quota}",
                kind.plural()
            );
            Ok(())
        } else {
            let err = ResolveError::QuotaExceeded {
                kind,
                plural: kind.plural(),
                provisioned,
                quota,
            };
            error!("VALIDATION ERROR: {err}");
            Err(err.into())
        }
    }

    async fn log_existing(&self, kind: ResourceKind) {
        match self.lister.list(kind, &Filter::new()).await {
            Ok(existing) if existing.is_empty() => {
                info!("there are no existing {}", kind.plural());
            }
            Ok(existing) => {
                info!("list of existing {}:", kind.plural());
                for object in existing {
                    info!("    {:>10} - {}", object.id, object.name.unwrap_or_default());
                }
            }
            Err(e) => debug!("Could not list existing {}: {e}", kind.plural()),
        }
    }
}

/// Tears a resource down according to its ownership, then clears the
/// identity keys and `extra_keys`.
///
/// # Errors
///
/// Returns any provider error from the delete call.
pub async fn delete_owned(
    deleter: &dyn Deleter,
    node: &DeclaredResource,
    props: &mut RuntimeProperties,
    extra_keys: &[&str],
) -> Result<()> {
    let identity = ResolvedIdentity::from_properties(node, props);
    let kind = props.external_type().unwrap_or(node.kind);

    if identity.ownership.deletes_on_teardown() {
        if let Some(id) = identity.provider_id.as_deref() {
            info!("Deleting {kind} {id}");
            deleter.delete(kind, id).await?;
        } else {
            info!("{kind} was never created; nothing to delete");
        }
    } else {
        info!("Not deleting {kind} since an external {kind} is being used");
    }

    props.clear_keys(&COMMON_KEYS);
    props.clear_keys(extra_keys);
    Ok(())
}
