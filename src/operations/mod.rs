//! Lifecycle operations per resource kind.
//!
//! Every operation takes the facade and an explicit context and returns a
//! [`Result`] of an [`Outcome`]. [`run_node`] and [`run_relationship`] map
//! an [`Operation`] name onto the handler for the node's kind.

mod common;
pub mod floating_ip;
pub mod generic;
pub mod links;
pub mod network;
pub mod port;
pub mod router;
pub mod server;
pub mod snapshot;
#[cfg(test)]
mod testing;
pub mod volume;

use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::context::{OperationContext, RelationshipContext};
use crate::error::{ConfigError, LifecycleError, Result};
use crate::outcome::Outcome;
use crate::provider::{Cloud, ResourceKind};

/// A lifecycle operation name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Resolve or create.
    Create,
    /// Bring up.
    Start,
    /// Bring down.
    Stop,
    /// Reboot a server.
    Reboot,
    /// Suspend a server.
    Suspend,
    /// Resume a suspended server.
    Resume,
    /// Delete an owned resource and clear its properties.
    Delete,
    /// Pre-flight validation.
    CreationValidation,
    /// Store matching provider objects in the runtime properties.
    List,
    /// Take a backup or incremental snapshot.
    SnapshotCreate,
    /// Restore from a backup or snapshot.
    SnapshotApply,
    /// Remove a backup or snapshot.
    SnapshotDelete,
    /// Connect a relationship source to its target.
    Establish,
    /// Disconnect a relationship source from its target.
    Unlink,
}

impl Operation {
    /// All operations, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::Create,
        Self::Start,
        Self::Stop,
        Self::Reboot,
        Self::Suspend,
        Self::Resume,
        Self::Delete,
        Self::CreationValidation,
        Self::List,
        Self::SnapshotCreate,
        Self::SnapshotApply,
        Self::SnapshotDelete,
        Self::Establish,
        Self::Unlink,
    ];

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reboot => "reboot",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::Delete => "delete",
            Self::CreationValidation => "creation_validation",
            Self::List => "list",
            Self::SnapshotCreate => "snapshot_create",
            Self::SnapshotApply => "snapshot_apply",
            Self::SnapshotDelete => "snapshot_delete",
            Self::Establish => "establish",
            Self::Unlink => "unlink",
        }
    }

    /// Returns true for operations run on a relationship edge.
    #[must_use]
    pub const fn is_relationship(self) -> bool {
        matches!(self, Self::Establish | Self::Unlink)
    }

    /// Returns true for the snapshot operations, which need snapshot inputs.
    #[must_use]
    pub const fn is_snapshot(self) -> bool {
        matches!(
            self,
            Self::SnapshotCreate | Self::SnapshotApply | Self::SnapshotDelete
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = LifecycleError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase().replace('-', "_");
        match name.as_str() {
            "freeze_suspend" => return Ok(Self::Suspend),
            "freeze_resume" => return Ok(Self::Resume),
            "validate" => return Ok(Self::CreationValidation),
            "connect" => return Ok(Self::Establish),
            "disconnect" => return Ok(Self::Unlink),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == name)
            .ok_or_else(|| {
                ConfigError::invalid("operation", format!("unknown operation '{s}'")).into()
            })
    }
}

fn unsupported(kind: ResourceKind, op: Operation) -> LifecycleError {
    ConfigError::invalid(
        "operation",
        format!("operation '{op}' is not supported for {kind} nodes"),
    )
    .into()
}

/// Runs a node operation for the context's node kind.
///
/// # Errors
///
/// Returns a configuration error for an unsupported kind/operation pair,
/// and propagates the handler's error otherwise.
pub async fn run_node(
    cloud: &Cloud,
    op: Operation,
    ctx: &mut OperationContext,
) -> Result<Outcome<()>> {
    use ResourceKind as K;
    let kind = ctx.node.kind;

    match (kind, op) {
        (K::Server, Operation::Create) => server::create(cloud, ctx).await,
        (K::Server, Operation::Start) => server::start(cloud, ctx).await,
        (K::Server, Operation::Stop) => server::stop(cloud, ctx).await,
        (K::Server, Operation::Reboot) => server::reboot(cloud, ctx).await,
        (K::Server, Operation::Suspend) => server::suspend(cloud, ctx).await,
        (K::Server, Operation::Resume) => server::resume(cloud, ctx).await,
        (K::Server, Operation::Delete) => server::delete(cloud, ctx).await,
        (K::Server, Operation::CreationValidation) => server::creation_validation(cloud, ctx).await,
        (K::Server, Operation::List) => server::list(cloud, ctx).await,
        (K::Server, Operation::SnapshotCreate) => snapshot::create(cloud, ctx).await,
        (K::Server, Operation::SnapshotApply) => snapshot::apply(cloud, ctx).await,
        (K::Server, Operation::SnapshotDelete) => snapshot::delete(cloud, ctx).await,

        (K::Volume, Operation::Create) => volume::create(cloud, ctx).await,
        (K::Volume, Operation::Delete) => volume::delete(cloud, ctx).await,
        (K::Volume, Operation::CreationValidation) => volume::creation_validation(cloud, ctx).await,
        (K::Volume, Operation::List) => volume::list(cloud, ctx).await,
        (K::Volume, Operation::SnapshotCreate) => volume::snapshot_create(cloud, ctx).await,
        (K::Volume, Operation::SnapshotApply) => volume::snapshot_apply(cloud, ctx).await,
        (K::Volume, Operation::SnapshotDelete) => volume::snapshot_delete(cloud, ctx).await,

        (K::Network, Operation::Create) => network::create(cloud, ctx).await,
        (K::Network, Operation::Start) => network::start(cloud, ctx).await,
        (K::Network, Operation::Stop) => network::stop(cloud, ctx).await,
        (K::Network, Operation::Delete) => network::delete(cloud, ctx).await,
        (K::Network, Operation::CreationValidation) => {
            network::creation_validation(cloud, ctx).await
        }
        (K::Network, Operation::List) => network::list(cloud, ctx).await,

        (K::Subnet, Operation::Create) => network::subnet::create(cloud, ctx).await,
        (K::Subnet, Operation::Delete) => network::subnet::delete(cloud, ctx).await,
        (K::Subnet, Operation::CreationValidation) => {
            network::subnet::creation_validation(cloud, ctx).await
        }
        (K::Subnet, Operation::List) => network::subnet::list(cloud, ctx).await,

        (K::Port, Operation::Create) => port::create(cloud, ctx).await,
        (K::Port, Operation::Delete) => port::delete(cloud, ctx).await,
        (K::Port, Operation::CreationValidation) => port::creation_validation(cloud, ctx).await,
        (K::Port, Operation::List) => port::list(cloud, ctx).await,

        (K::FloatingIp, Operation::Create) => floating_ip::create(cloud, ctx).await,
        (K::FloatingIp, Operation::Delete) => floating_ip::delete(cloud, ctx).await,
        (K::FloatingIp, Operation::CreationValidation) => {
            floating_ip::creation_validation(cloud, ctx).await
        }
        (K::FloatingIp, Operation::List) => floating_ip::list(cloud, ctx).await,

        (K::Router, Operation::Create) => router::create(cloud, ctx).await,
        (K::Router, Operation::Delete) => router::delete(cloud, ctx).await,
        (K::Router, Operation::CreationValidation) => router::creation_validation(cloud, ctx).await,
        (K::Router, Operation::List) => router::list(cloud, ctx).await,

        (kind, Operation::Create) if generic::KINDS.contains(&kind) => {
            generic::create(cloud, ctx).await
        }
        (kind, Operation::Delete) if generic::KINDS.contains(&kind) => {
            generic::delete(cloud, ctx).await
        }
        (kind, Operation::CreationValidation) if generic::KINDS.contains(&kind) => {
            generic::creation_validation(cloud, ctx).await
        }
        (kind, Operation::List) if generic::KINDS.contains(&kind) => {
            generic::list(cloud, ctx).await
        }

        _ => Err(unsupported(kind, op)),
    }
}

/// Runs a relationship operation, dispatching on the source and target
/// kinds.
///
/// Pairs with nothing to do on the provider succeed without a call.
///
/// # Errors
///
/// Returns a configuration error for a node operation, and propagates the
/// handler's error otherwise.
pub async fn run_relationship(
    cloud: &Cloud,
    op: Operation,
    ctx: &mut RelationshipContext,
) -> Result<Outcome<()>> {
    use ResourceKind as K;
    let connect = match op {
        Operation::Establish => true,
        Operation::Unlink => false,
        _ => return Err(unsupported(ctx.source.kind(), op)),
    };

    match (ctx.source.kind(), ctx.target.kind(), connect) {
        (K::Server, K::SecurityGroup, true) => links::connect_security_group(cloud, ctx).await,
        (K::Server, K::SecurityGroup, false) => links::disconnect_security_group(cloud, ctx).await,
        (K::Server, K::FloatingIp, true) => links::connect_floating_ip(cloud, ctx).await,
        (K::Server, K::FloatingIp, false) => links::disconnect_floating_ip(cloud, ctx).await,
        (K::Server, K::Port, true) => port::attach(cloud, ctx).await,
        (K::Server, K::Port, false) => port::detach(cloud, ctx).await,
        (K::Volume, K::Server, true) => links::attach_volume(cloud, ctx).await,
        (K::Volume, K::Server, false) => links::detach_volume(cloud, ctx).await,
        (K::Port, K::SecurityGroup, true) => port::connect_security_group(cloud, ctx).await,
        (K::Port, K::SecurityGroup, false) => port::disconnect_security_group(cloud, ctx).await,
        (K::Port, K::FloatingIp, true) => floating_ip::connect_port(cloud, ctx).await,
        (K::Port, K::FloatingIp, false) => floating_ip::disconnect_port(cloud, ctx).await,
        (K::Subnet, K::Router, true) => links::connect_subnet(cloud, ctx).await,
        (K::Subnet, K::Router, false) => links::disconnect_subnet(cloud, ctx).await,
        (source, target, _) => {
            info!("Nothing to {op} between {source} and {target}");
            Ok(Outcome::done())
        }
    }
}
