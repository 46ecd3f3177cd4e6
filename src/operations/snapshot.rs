//! Server snapshots: rotated backups and incremental images.
//!
//! Each step persists a progress marker (`backupstate`, `restorestate`)
//! naming the image before the irreversible provider call, so a re-invoked
//! operation resumes at the polling step instead of issuing the call again.

use tracing::info;

use crate::context::{OperationContext, keys};
use crate::error::{OperationError, Result};
use crate::outcome::Outcome;
use crate::poller::{self, Decision, IMAGE_ACTIVE, SETTLE_DELAY, server as status};
use crate::proceed;
use crate::provider::{
    Cloud, ComputeVerbs, Deleter, Filter, Getter, Lister, ProviderObject, ResourceKind,
};

use super::{common, server};

/// Snapshot inputs shared by create, apply and delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// User-facing snapshot name.
    pub name: String,
    /// Incremental image instead of a rotated backup.
    pub incremental: bool,
    /// Backup type, e.g. `daily`.
    pub backup_type: String,
    /// Number of backups of this type to keep.
    pub rotation: u32,
}

impl SnapshotRequest {
    /// Reads `snapshot_name`, `snapshot_incremental`, `snapshot_type` and
    /// `snapshot_rotation`.
    ///
    /// # Errors
    ///
    /// Returns a missing-property error without `snapshot_name`.
    pub fn from_inputs(ctx: &OperationContext) -> Result<Self> {
        Ok(Self {
            name: ctx.require_input("snapshot_name")?.to_string(),
            incremental: ctx.input_flag("snapshot_incremental", false),
            backup_type: ctx.input_str("snapshot_type").unwrap_or_default().to_string(),
            rotation: ctx
                .input_u64("snapshot_rotation")
                .and_then(|r| u32::try_from(r).ok())
                .unwrap_or(1),
        })
    }

    /// Provider image name for this snapshot of `resource_id`.
    #[must_use]
    pub fn image_name(&self, resource_id: &str) -> String {
        let suffix = if self.incremental { "increment" } else { "backup" };
        format!("vm-{resource_id}-{}-{suffix}", self.name)
    }

    const fn image_type(&self) -> &'static str {
        if self.incremental { "snapshot" } else { "backup" }
    }
}

async fn find_image(
    cloud: &Cloud,
    name: &str,
    request: &SnapshotRequest,
) -> Result<Option<ProviderObject>> {
    let images = cloud
        .list(ResourceKind::Image, &Filter::new().with("name", name))
        .await?;
    Ok(images
        .into_iter()
        .inspect(|image| info!("Found image {} ({})", image.id, image.status()))
        .find(|image| image.str_attr("image_type") == Some(request.image_type())))
}

/// Retries while the server's task state is one of `busy`.
async fn upload_step(cloud: &Cloud, server_id: &str, busy: &[&str]) -> Result<Outcome<()>> {
    info!("Check upload state....");
    let server = cloud.get(ResourceKind::Server, server_id).await?;
    match poller::busy_task(server.task_state(), busy) {
        Decision::RetryAfter(secs) => Ok(Outcome::retry(
            format!(
                "Server has {}/{} state.",
                server.status(),
                server.task_state().unwrap_or_default()
            ),
            secs,
        )),
        _ => Ok(Outcome::done()),
    }
}

/// Creates a backup or incremental image of the server.
///
/// # Errors
///
/// Returns [`OperationError::InvalidState`] if an image with that name
/// exists and this instance did not start creating it.
pub async fn create(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let server_id = common::current_id(ctx)?;
    let request = SnapshotRequest::from_inputs(ctx)?;
    let name = request.image_name(&server_id);
    info!("Create snapshot for {server_id}");

    let in_progress = ctx.props.get_str(keys::BACKUP_STATE) == Some(name.as_str());
    if !in_progress && find_image(cloud, &name, &request).await?.is_some() {
        return Err(OperationError::invalid_state(format!("Snapshot {name} already exists.")).into());
    }

    proceed!(upload_step(cloud, &server_id, &[status::IMAGE_UPLOADING]).await?);

    if !in_progress {
        ctx.props.set(keys::BACKUP_STATE, name.as_str());
        let issued = if request.incremental {
            cloud
                .create_server_image(&server_id, &name)
                .await
                .map(|image_id| info!("Server snapshot {name} creation started ({image_id})"))
        } else {
            cloud
                .backup_server(&server_id, &name, &request.backup_type, request.rotation)
                .await
                .map(|()| info!("Server backup {name} creation started"))
        };
        if let Err(e) = issued {
            ctx.props.remove(keys::BACKUP_STATE);
            return Err(e);
        }
    }

    proceed!(upload_step(cloud, &server_id, &[status::IMAGE_UPLOADING]).await?);
    ctx.props.set(keys::BACKUP_STATE, keys::PROGRESS_DONE);
    Ok(Outcome::done())
}

/// Rebuilds the server from a snapshot: stop, rebuild, wait, start.
///
/// # Errors
///
/// Returns [`OperationError::InvalidState`] if no such snapshot exists.
pub async fn apply(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let server_id = common::current_id(ctx)?;
    let request = SnapshotRequest::from_inputs(ctx)?;
    let name = request.image_name(&server_id);
    if request.incremental {
        info!("Apply snapshot {name} for {server_id}");
    } else {
        info!("Apply backup {name} for {server_id}");
    }

    let image = find_image(cloud, &name, &request)
        .await?
        .ok_or_else(|| OperationError::invalid_state(format!("No snapshots found with name: {name}.")))?;

    proceed!(
        upload_step(
            cloud,
            &server_id,
            &[status::IMAGE_UPLOADING, status::REBUILD_SPAWNING]
        )
        .await?
    );

    if ctx.props.get_str(keys::RESTORE_STATE) != Some(name.as_str()) {
        let current = cloud.get(ResourceKind::Server, &server_id).await?;
        proceed!(server::stop_server_step(cloud, &current).await?);

        info!("Rebuild {server_id} with {name}");
        ctx.props.set(keys::RESTORE_STATE, name.as_str());
        if let Err(e) = cloud.rebuild_server(&server_id, &image.id).await {
            ctx.props.remove(keys::RESTORE_STATE);
            return Err(e);
        }
    }

    proceed!(upload_step(cloud, &server_id, &[status::REBUILD_SPAWNING]).await?);
    let current = cloud.get(ResourceKind::Server, &server_id).await?;
    proceed!(server::start_server_step(cloud, &current).await?);
    ctx.props.set(keys::RESTORE_STATE, keys::PROGRESS_DONE);
    Ok(Outcome::done())
}

/// Deletes the snapshot image, retrying until it is no longer listed.
///
/// # Errors
///
/// Returns any provider error from the list or delete call.
pub async fn delete(cloud: &Cloud, ctx: &mut OperationContext) -> Result<Outcome<()>> {
    let server_id = common::current_id(ctx)?;
    let request = SnapshotRequest::from_inputs(ctx)?;
    let name = request.image_name(&server_id);
    if request.incremental {
        info!("Remove snapshot {name} for {server_id}");
    } else {
        info!("Remove backup {name} for {server_id}");
    }

    let Some(image) = find_image(cloud, &name, &request).await? else {
        info!("No snapshots found with name: {name}.");
        return Ok(Outcome::done());
    };

    if poller::same_state(image.status(), IMAGE_ACTIVE) {
        cloud.delete(ResourceKind::Image, &image.id).await?;
        tokio::time::sleep(SETTLE_DELAY).await;
    }

    match find_image(cloud, &name, &request).await? {
        Some(image) => Ok(Outcome::retry(
            format!("{} is still alive", image.id),
            poller::RETRY_INTERVAL_SECS,
        )),
        None => Ok(Outcome::done()),
    }
}
