//! Networks and subnets.

use serde_json::{Map, Value};
use tracing::info;

use crate::context::OperationContext;
use crate::error::{OperationError, Result};
use crate::outcome::Outcome;
use crate::provider::{Cloud, Getter, NetworkVerbs, ResourceKind};

use super::common;

const ADMIN_STATE_UP: &str = "admin_state_up";

/// Resolves or creates a network, administratively up.
///
/// # Errors
///
/// Propagates resolver and provider errors.
pub async fn create(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let mut base = Map::new();
    base.insert(String::from(ADMIN_STATE_UP), Value::Bool(true));
    common::create_simple(cloud, ctx, base).await.map(Outcome::discard)
}

async fn set_admin_state(cloud: &Cloud, id: &str, up: bool) -> Result<()> {
    let mut patch = Map::new();
    patch.insert(String::from(ADMIN_STATE_UP), Value::Bool(up));
    cloud.update(ResourceKind::Network, id, &patch).await?;
    Ok(())
}

/// Brings the network administratively up; an external network is only
/// checked.
///
/// # Errors
///
/// Returns an external mismatch if an external network is down.
pub async fn start(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let id = common::current_id(ctx)?;
    if ctx.node.use_external && !ctx.props.conditionally_created() {
        info!("Validating external network is started");
        let network = cloud.get(ResourceKind::Network, &id).await?;
        if network.bool_attr(ADMIN_STATE_UP) != Some(true) {
            return Err(OperationError::external_mismatch(format!(
                "Expected external resource network {id} to be in \"admin_state_up\"=True"
            ))
            .into());
        }
        return Ok(Outcome::done());
    }

    set_admin_state(cloud, &id, true).await?;
    Ok(Outcome::done())
}

/// Brings the network administratively down.
///
/// # Errors
///
/// Returns any provider error from the update.
pub async fn stop(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    if ctx.node.use_external {
        info!("Not stopping network since an external network is being used");
        return Ok(Outcome::done());
    }
    let id = common::current_id(ctx)?;
    set_admin_state(cloud, &id, false).await?;
    Ok(Outcome::done())
}

/// Deletes an owned network.
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

/// Stores the networks matching the `filter` input.
///
/// # Errors
///
/// Returns any provider error from the list call.
pub async fn list(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    common::list_into(cloud, ctx, ResourceKind::Network).await
}

/// Subnet operations. The parent network comes from the single network
/// relationship.
pub mod subnet {
    use ipnet::IpNet;
    use serde_json::{Map, Value};
    use std::net::IpAddr;
    use tracing::error;

    use crate::context::{COMMON_KEYS, OperationContext};
    use crate::error::{ConfigError, OperationError, Result};
    use crate::outcome::Outcome;
    use crate::provider::{Cloud, Getter, ResourceKind};
    use crate::resolver::Ownership;

    use super::common;

    const NETWORK_ID: &str = "network_id";
    const CIDR: &str = "cidr";

    /// Resolves or creates a subnet on the related network.
    ///
    /// An external subnet must already belong to the related network, if
    /// one is declared.
    ///
    /// # Errors
    ///
    /// Returns a relationship-count error without exactly one network, or an
    /// external mismatch.
    pub async fn create(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
        let identity = common::resolve(cloud, ctx).await?;
        if identity.ownership == Ownership::External {
            if let Err(e) = validate_external(cloud, ctx).await {
                ctx.props.clear_keys(&COMMON_KEYS);
                return Err(e);
            }
            return Ok(Outcome::done());
        }

        let network_id = common::target_id(ctx.required_target(ResourceKind::Network)?)?;
        let mut base = Map::new();
        base.insert(String::from(NETWORK_ID), Value::from(network_id));
        common::create_simple(cloud, ctx, base).await.map(Outcome::discard)
    }

    async fn validate_external(cloud: &Cloud, ctx: &OperationContext) -> Result<()> {
        let Some(network) = ctx.single_target(ResourceKind::Network)? else {
            return Ok(());
        };
        let network_id = common::target_id(network)?;
        let subnet_id = common::current_id(ctx)?;
        let subnet = cloud.get(ResourceKind::Subnet, &subnet_id).await?;
        if subnet.str_attr(NETWORK_ID) == Some(network_id) {
            Ok(())
        } else {
            Err(OperationError::external_mismatch(format!(
                "Expected external resources subnet {subnet_id} and network {network_id} to be \
                 connected"
            ))
            .into())
        }
    }

    /// Deletes an owned subnet.
    ///
    /// # Errors
    ///
    /// Returns any provider error from the delete call.
    pub async fn delete(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
        common::delete_simple(cloud, ctx, &[]).await
    }

    /// Validates the declaration and its `cidr`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a missing or malformed `cidr`.
    pub async fn creation_validation(
        cloud: &Cloud,
        ctx: &mut OperationContext,
    ) -> Result<Outcome<()>> {
        common::validate(cloud, ctx).await?;

        let mut subnet = ctx.node.kind_block();
        if let Some(args) = ctx.input(ResourceKind::Subnet.as_str()).and_then(Value::as_object) {
            subnet.extend(args.clone());
        }
        let Some(cidr) = subnet.get(CIDR).and_then(Value::as_str) else {
            let message =
                "\"cidr\" property must appear under the \"subnet\" property of a subnet node";
            error!("VALIDATION ERROR: {message}");
            return Err(ConfigError::validation(message, CIDR).into());
        };
        validate_cidr(cidr)?;
        Ok(Outcome::done())
    }

    /// Accepts a single address or a network in CIDR notation.
    pub(crate) fn validate_cidr(value: &str) -> Result<()> {
        if value.parse::<IpNet>().is_ok() || value.parse::<IpAddr>().is_ok() {
            return Ok(());
        }
        error!("VALIDATION ERROR: {value} is not a valid ip or range");
        Err(ConfigError::validation(format!("{value} is not a valid ip or range"), CIDR).into())
    }

    /// Stores the subnets matching the `filter` input.
    ///
    /// # Errors
    ///
    /// Returns any provider error from the list call.
    pub async fn list(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
        common::list_into(cloud, ctx, ResourceKind::Subnet).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DeclaredResource, RelationshipKind};
    use crate::operations::testing::{context, external_target, resolved_context, target};
    use crate::provider::ProviderObject;
    use crate::provider::testing::FakeCloud;
    use serde_json::json;

    #[tokio::test]
    async fn test_network_created_up_then_toggled() {
        let fake = FakeCloud::new();
        let cloud = fake.cloud();
        let mut ctx = context(DeclaredResource::new(ResourceKind::Network).with_resource_id("private"));

        create(&cloud, &mut ctx).await.expect("create");
        let id = ctx.props.external_id().expect("recorded").to_string();
        let network = fake.object(ResourceKind::Network, &id).expect("stored");
        assert_eq!(network.name.as_deref(), Some("private"));
        assert_eq!(network.bool_attr(ADMIN_STATE_UP), Some(true));

        stop(&cloud, &mut ctx).await.expect("stop");
        let network = fake.object(ResourceKind::Network, &id).expect("stored");
        assert_eq!(network.bool_attr(ADMIN_STATE_UP), Some(false));

        start(&cloud, &mut ctx).await.expect("start");
        assert_eq!(fake.call_count("update"), 2);
    }

    #[tokio::test]
    async fn test_external_network_must_be_up() {
        let fake = FakeCloud::new();
        fake.insert(
            ResourceKind::Network,
            ProviderObject::new("net-1")
                .with_name("public")
                .with_attr(ADMIN_STATE_UP, false),
        );
        let cloud = fake.cloud();
        let node = DeclaredResource::new(ResourceKind::Network)
            .with_resource_id("public")
            .external(false);
        let mut ctx = resolved_context(node, "net-1");

        let err = start(&cloud, &mut ctx).await.expect_err("down");
        assert!(err.to_string().contains("admin_state_up"));

        stop(&cloud, &mut ctx).await.expect("skipped");
        assert_eq!(fake.call_count("update"), 0);
    }

    #[tokio::test]
    async fn test_subnet_takes_network_from_relationship() {
        let fake = FakeCloud::new();
        let cloud = fake.cloud();
        let node = DeclaredResource::new(ResourceKind::Subnet)
            .with_property("subnet", json!({"cidr": "10.0.0.0/24", "ip_version": 4}));
        let mut ctx = context(node).with_relationship(
            RelationshipKind::DependsOn,
            target(ResourceKind::Network, "net-1", "private"),
        );

        subnet::create(&cloud, &mut ctx).await.expect("create");
        let id = ctx.props.external_id().expect("recorded").to_string();
        let created = fake.object(ResourceKind::Subnet, &id).expect("stored");
        assert_eq!(created.str_attr("network_id"), Some("net-1"));
        assert_eq!(created.str_attr("cidr"), Some("10.0.0.0/24"));
    }

    #[tokio::test]
    async fn test_subnet_requires_a_network() {
        let fake = FakeCloud::new();
        let cloud = fake.cloud();
        let mut ctx = context(DeclaredResource::new(ResourceKind::Subnet));

        let err = subnet::create(&cloud, &mut ctx).await.expect_err("no network");
        assert!(!err.is_recoverable());
        assert_eq!(fake.call_count("create"), 0);
    }

    #[tokio::test]
    async fn test_external_subnet_on_other_network_clears_properties() {
        let fake = FakeCloud::new();
        fake.insert(
            ResourceKind::Subnet,
            ProviderObject::new("sub-1")
                .with_name("shared")
                .with_attr("network_id", "net-2"),
        );
        let cloud = fake.cloud();
        let node = DeclaredResource::new(ResourceKind::Subnet)
            .with_resource_id("shared")
            .external(false);
        let mut ctx = context(node).with_relationship(
            RelationshipKind::DependsOn,
            external_target(ResourceKind::Network, "net-1", "private"),
        );

        let err = subnet::create(&cloud, &mut ctx).await.expect_err("mismatch");
        assert!(err.to_string().contains("sub-1"));
        assert!(ctx.props.external_id().is_none());
    }

    #[test]
    fn test_cidr_syntax() {
        assert!(subnet::validate_cidr("10.0.0.0/24").is_ok());
        assert!(subnet::validate_cidr("fd00::/64").is_ok());
        assert!(subnet::validate_cidr("10.0.0.1").is_ok());
        assert!(subnet::validate_cidr("10.0.0.0/33").is_err());
        assert!(subnet::validate_cidr("private").is_err());
    }

    #[tokio::test]
    async fn test_subnet_validation_requires_cidr() {
        let fake = FakeCloud::new();
        let cloud = fake.cloud();
        let mut ctx = context(DeclaredResource::new(ResourceKind::Subnet));

        let err = subnet::creation_validation(&cloud, &mut ctx)
            .await
            .expect_err("no cidr");
        assert!(err.to_string().contains("cidr"));
    }
}
