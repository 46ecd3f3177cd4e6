//! Block-storage volumes and their snapshots.

use serde_json::Map;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::context::{OperationContext, keys};
use crate::error::{OperationError, Result};
use crate::outcome::Outcome;
use crate::poller::{RETRY_INTERVAL_SECS, SETTLE_DELAY, WaitPolicy, volume, wait_for_status};
use crate::proceed;
use crate::provider::{
    BlockStorageVerbs, Cloud, Deleter, Filter, Getter, Lister, ProviderObject, ResourceKind,
};
use crate::resolver::Ownership;

use super::common;
use super::snapshot::SnapshotRequest;

/// Keys cleared when a volume is deleted.
const VOLUME_KEYS: [&str; 3] = [keys::AVAILABILITY_ZONE, keys::BOOTABLE, keys::DEVICE_NAME];

fn create_policy(ctx: &OperationContext) -> WaitPolicy {
    let default = WaitPolicy::VOLUME_CREATE;
    WaitPolicy::new(
        ctx.input_u64("status_attempts")
            .and_then(|a| u32::try_from(a).ok())
            .unwrap_or(default.attempts),
        ctx.input_u64("status_timeout")
            .map_or(default.interval, Duration::from_secs),
    )
    .capped()
}

fn set_volume_properties(ctx: &mut OperationContext, volume: &ProviderObject) {
    match volume.str_attr(keys::AVAILABILITY_ZONE) {
        Some(zone) => ctx.props.set(keys::AVAILABILITY_ZONE, zone),
        None => error!("Volume availability_zone not found."),
    }
    let bootable = volume
        .bool_attr(keys::BOOTABLE)
        .unwrap_or_else(|| ctx.node.property_flag("boot"));
    ctx.props.set(keys::BOOTABLE, bootable);
}

/// Resolves or creates the volume and waits for it to become available.
///
/// # Errors
///
/// Returns a permanent error if the volume reaches an error status.
pub async fn create(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let identity = common::resolve(cloud, ctx).await?;
    if identity.ownership == Ownership::External {
        let id = common::current_id(ctx)?;
        let volume = cloud.get(ResourceKind::Volume, &id).await?;
        set_volume_properties(ctx, &volume);
        return Ok(Outcome::done());
    }

    let created = match common::already_created(cloud, ctx).await? {
        Some(existing) => existing,
        None => {
            let mut payload = common::object_payload(ctx, Map::new());
            common::image_from_relationship(ctx, &mut payload, "imageRef");
            common::create_object(cloud, &mut ctx.props, ResourceKind::Volume, &payload).await?
        }
    };

    let (volume, reached) = wait_for_status(
        cloud,
        ResourceKind::Volume,
        &created.id,
        &[volume::AVAILABLE],
        &volume::ERROR_STATUSES,
        create_policy(ctx),
    )
    .await?;
    if !reached {
        return Ok(Outcome::retry(
            format!("Waiting for volume {} to become available", volume.id),
            RETRY_INTERVAL_SECS,
        ));
    }

    set_volume_properties(ctx, &volume);
    Ok(Outcome::done())
}

/// Removes the volume's snapshots, then the volume itself.
///
/// # Errors
///
/// Returns any provider error from the snapshot or volume delete.
pub async fn delete(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    if common::ownership(ctx).deletes_on_teardown() {
        if let Some(id) = ctx.props.external_id() {
            let filter = Filter::new().with("volume_id", id);
            proceed!(purge(cloud, ResourceKind::VolumeSnapshot, &filter, None).await?);
        }
    }
    common::delete_simple(cloud, ctx, &VOLUME_KEYS).await
}

/// Deletes the available objects matching `filter` (and `name`), settles,
/// and retries while any of them is still listed.
async fn purge(
    cloud: &Cloud,
    kind: ResourceKind,
    filter: &Filter,
    name: Option<&str>,
) -> Result<Outcome<()>> {
    let wanted = |object: &ProviderObject| name.is_none_or(|n| object.name.as_deref() == Some(n));

    let objects = cloud.list(kind, filter).await?;
    if objects.is_empty() {
        return Ok(Outcome::done());
    }
    for object in objects.iter().filter(|o| wanted(o)) {
        debug!(
            "Check {kind} before delete: {}:{} with state {}",
            object.id,
            object.name.as_deref().unwrap_or_default(),
            object.status()
        );
        if object.status() == volume::AVAILABLE {
            cloud.delete(kind, &object.id).await?;
        }
    }

    tokio::time::sleep(SETTLE_DELAY).await;

    let remaining = cloud.list(kind, filter).await?;
    if let Some(object) = remaining.iter().find(|o| wanted(o)) {
        return Ok(Outcome::retry(
            format!("{} is still alive", object.name.as_deref().unwrap_or(&object.id)),
            RETRY_INTERVAL_SECS,
        ));
    }
    Ok(Outcome::done())
}

fn snapshot_name(volume_id: &str, request: &SnapshotRequest) -> String {
    format!("vol-{volume_id}-{}", request.name)
}

/// Creates a backup, or a forced snapshot when incremental.
///
/// # Errors
///
/// Returns a missing-property error without `snapshot_name`.
pub async fn snapshot_create(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let request = SnapshotRequest::from_inputs(ctx)?;
    let volume_id = common::current_id(ctx)?;
    let name = snapshot_name(&volume_id, &request);

    if request.incremental {
        info!("Snapshot create: {name}");
        cloud.create_snapshot(&volume_id, &name, true).await?;
    } else {
        info!("Backup create: {name}");
        cloud.create_backup(&volume_id, &name).await?;
    }
    Ok(Outcome::done())
}

/// Restores the named backup onto the volume.
///
/// # Errors
///
/// Returns a permanent error if no backup has that name.
pub async fn snapshot_apply(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let request = SnapshotRequest::from_inputs(ctx)?;
    let volume_id = common::current_id(ctx)?;
    let name = snapshot_name(&volume_id, &request);

    if request.incremental {
        error!("Apply snapshot is unsupported");
        return Ok(Outcome::done());
    }

    info!("Backup apply {name} to {volume_id}");
    let filter = Filter::new()
        .with("volume_id", volume_id.as_str())
        .with("name", name.as_str());
    let backups = cloud.list(ResourceKind::VolumeBackup, &filter).await?;
    let Some(backup) = backups.iter().find(|b| b.name.as_deref() == Some(name.as_str())) else {
        return Err(OperationError::invalid_state(format!("No such {name} backup.")).into());
    };
    debug!("Used first with {} to {volume_id}", backup.id);
    cloud.restore_backup(&backup.id, &volume_id).await?;
    Ok(Outcome::done())
}

/// Deletes the named backup or snapshot.
///
/// # Errors
///
/// Returns any provider error from the list or delete calls.
pub async fn snapshot_delete(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let request = SnapshotRequest::from_inputs(ctx)?;
    let volume_id = common::current_id(ctx)?;
    let name = snapshot_name(&volume_id, &request);
    let filter = Filter::new().with("volume_id", volume_id.as_str());

    if request.incremental {
        info!("Snapshot for remove: {name}");
        purge(cloud, ResourceKind::VolumeSnapshot, &filter, Some(&name)).await
    } else {
        info!("Backup for remove: {name}");
        purge(cloud, ResourceKind::VolumeBackup, &filter, Some(&name)).await
    }
}

/// Validates the declaration against the provider.
///
/// # Errors
///
/// Returns the resolver's not-found or quota error.
pub async fn creation_validation(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    common::validate(cloud, ctx).await
}

/// Stores the volumes matching the `filter` input.
///
/// # Errors
///
/// Returns any provider error from the list call.
pub async fn list(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    common::list_into(cloud, ctx, ResourceKind::Volume).await
}
