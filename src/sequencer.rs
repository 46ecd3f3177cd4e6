//! Attach/detach transaction sequencing.
//!
//! Multi-step attach operations are issued, observed, and compensated here.
//! Membership changes (security groups, floating IPs) follow the
//! check-then-mutate-then-verify pattern: an already-satisfied request issues
//! no call, and an unconverged provider yields a recoverable result.

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::{LifecycleError, OperationError, Result};
use crate::outcome::Outcome;
use crate::poller::{
    PORT_SECURITY_GROUP_RETRY_SECS, RETRY_INTERVAL_SECS, WaitPolicy, volume, wait_for_status,
};
use crate::provider::{ComputeVerbs, GroupRef, Getter, NetworkVerbs, ResourceKind};

/// Requested device value asking the provider to choose.
pub const AUTO_DEVICE: &str = "auto";

/// Attaches a volume and waits for it to report `in-use`.
///
/// Returns the device name: the requested one, or the one the provider
/// assigned when `device` is `None` or [`AUTO_DEVICE`]. If the wait fails
/// with anything other than a permanent error, or the assigned device cannot
/// be read back, the volume is detached again before the original error is
/// returned.
///
/// # Errors
///
/// Returns the attach or wait error, or [`OperationError::CleanupFailed`] if
/// the compensating detach fails too.
pub async fn attach_volume(
    compute: &dyn ComputeVerbs,
    getter: &dyn Getter,
    server_id: &str,
    volume_id: &str,
    device: Option<&str>,
    policy: WaitPolicy,
) -> Result<String> {
    let requested = device.filter(|d| !d.is_empty() && *d != AUTO_DEVICE);

    info!("Attaching volume {volume_id} to server {server_id}");
    compute
        .attach_volume(server_id, volume_id, requested.map(str::to_string))
        .await?;

    if let Err(e) = wait_attached(getter, volume_id, policy).await {
        if !e.is_recoverable() {
            return Err(e);
        }
        error!("Volume {volume_id} did not attach to server {server_id}: {e}");
        return Err(compensate(compute, server_id, volume_id, e).await);
    }

    if let Some(device) = requested {
        return Ok(device.to_string());
    }
    match discover_device(compute, server_id, volume_id).await {
        Ok(device) => Ok(device),
        Err(e) => {
            error!("Device of volume {volume_id} on server {server_id} is unknown: {e}");
            Err(compensate(compute, server_id, volume_id, e).await)
        }
    }
}

async fn wait_attached(getter: &dyn Getter, volume_id: &str, policy: WaitPolicy) -> Result<()> {
    let (_, reached) = wait_for_status(
        getter,
        ResourceKind::Volume,
        volume_id,
        &[volume::IN_USE],
        &volume::ERROR_STATUSES,
        policy,
    )
    .await?;

    if reached {
        Ok(())
    } else {
        Err(OperationError::Timeout {
            kind: ResourceKind::Volume,
            id: volume_id.to_string(),
            expected: volume::IN_USE.to_string(),
            waited_secs: policy.budget().as_secs(),
        }
        .into())
    }
}

/// Issues the rollback detach and returns the error to surface.
async fn compensate(
    compute: &dyn ComputeVerbs,
    server_id: &str,
    volume_id: &str,
    original: LifecycleError,
) -> LifecycleError {
    info!("Detaching volume {volume_id} from server {server_id} after failed attach");
    match compute.detach_volume(server_id, volume_id).await {
        Ok(()) => original,
        Err(cleanup) => {
            error!("Cleanup detach of volume {volume_id} failed: {cleanup}");
            OperationError::CleanupFailed {
                message: format!(
                    "Failed to detach volume {volume_id} from server {server_id} after a failed \
                     attach: {cleanup}"
                ),
                original: Box::new(original),
            }
            .into()
        }
    }
}

async fn discover_device(
    compute: &dyn ComputeVerbs,
    server_id: &str,
    volume_id: &str,
) -> Result<String> {
    let attachments = compute.volume_attachments(server_id).await?;
    attachments
        .into_iter()
        .find(|a| a.volume_id == volume_id)
        .and_then(|a| a.device)
        .ok_or_else(|| {
            OperationError::invalid_state(format!(
                "Volume {volume_id} is attached to server {server_id} but reports no device"
            ))
            .into()
        })
}

/// Detaches a volume and waits for it to report `available`.
///
/// Succeeds immediately when no attachment to `server_id` exists.
///
/// # Errors
///
/// Returns a recoverable [`OperationError::Timeout`] if the volume does not
/// become available within `policy`.
pub async fn detach_volume(
    compute: &dyn ComputeVerbs,
    getter: &dyn Getter,
    server_id: &str,
    volume_id: &str,
    policy: WaitPolicy,
) -> Result<()> {
    let attachment = compute
        .volume_attachments(server_id)
        .await?
        .into_iter()
        .find(|a| a.volume_id == volume_id);

    let Some(attachment) = attachment else {
        info!("Volume {volume_id} is not attached to server {server_id}");
        return Ok(());
    };

    info!("Detaching volume {volume_id} from server {server_id}");
    let attachment_id = if attachment.id.is_empty() {
        volume_id
    } else {
        attachment.id.as_str()
    };
    compute.detach_volume(server_id, attachment_id).await?;

    let (_, reached) = wait_for_status(
        getter,
        ResourceKind::Volume,
        volume_id,
        &[volume::AVAILABLE],
        &volume::ERROR_STATUSES,
        policy,
    )
    .await?;

    if reached {
        Ok(())
    } else {
        Err(OperationError::Timeout {
            kind: ResourceKind::Volume,
            id: volume_id.to_string(),
            expected: volume::AVAILABLE.to_string(),
            waited_secs: policy.budget().as_secs(),
        }
        .into())
    }
}

/// Adds a security group to a server by name and verifies membership.
///
/// # Errors
///
/// Returns a recoverable [`OperationError::NotConverged`] if the group is not
/// listed on the server afterwards.
pub async fn connect_security_group(
    compute: &dyn ComputeVerbs,
    server_id: &str,
    group: &GroupRef,
) -> Result<()> {
    let current = compute.server_security_groups(server_id).await?;
    if current.iter().any(|g| g.matches(&group.id, &group.name)) {
        info!(
            "Security group {} is already attached to server {server_id}",
            group.name
        );
        return Ok(());
    }

    compute.add_security_group(server_id, &group.name).await?;

    let after = compute.server_security_groups(server_id).await?;
    if after.iter().any(|g| g.matches(&group.id, &group.name)) {
        info!("Security group {} attached to server {server_id}", group.name);
        Ok(())
    } else {
        Err(OperationError::not_converged(format!(
            "Expected to see security group {} attached to server {server_id}",
            group.id
        ))
        .into())
    }
}

/// Removes a security group from a server by name and verifies removal.
///
/// A 404 from the remove call counts as already removed.
///
/// # Errors
///
/// Returns a recoverable [`OperationError::NotConverged`] if the group is
/// still listed on the server afterwards.
pub async fn disconnect_security_group(
    compute: &dyn ComputeVerbs,
    server_id: &str,
    group: &GroupRef,
) -> Result<()> {
    let current = compute.server_security_groups(server_id).await?;
    if !current.iter().any(|g| g.matches(&group.id, &group.name)) {
        info!(
            "Security group {} is not attached to server {server_id}",
            group.name
        );
        return Ok(());
    }

    match compute.remove_security_group(server_id, &group.name).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            warn!("Security group {} was already removed: {e}", group.name);
        }
        Err(e) => return Err(e),
    }

    let after = compute.server_security_groups(server_id).await?;
    if after.iter().any(|g| g.matches(&group.id, &group.name)) {
        Err(OperationError::not_converged(format!(
            "Expected to see security group {} detached from server {server_id}",
            group.id
        ))
        .into())
    } else {
        info!("Security group {} detached from server {server_id}", group.name);
        Ok(())
    }
}

/// Adds a security group to a port's list and verifies it.
///
/// # Errors
///
/// Returns any provider error from the lookup or update.
pub async fn connect_port_security_group(
    getter: &dyn Getter,
    network: &dyn NetworkVerbs,
    port_id: &str,
    group_id: &str,
) -> Result<Outcome<()>> {
    let port = getter.get(ResourceKind::Port, port_id).await?;
    let mut groups = port.string_list("security_groups");
    if groups.iter().any(|g| g == group_id) {
        debug!("Port {port_id} already has security group {group_id}");
        return Ok(Outcome::done());
    }

    groups.push(group_id.to_string());
    let updated = update_port_groups(network, port_id, groups).await?;

    if updated.iter().any(|g| g == group_id) {
        Ok(Outcome::done())
    } else {
        Ok(Outcome::retry(
            format!("Security group {group_id} not yet attached to port {port_id}"),
            PORT_SECURITY_GROUP_RETRY_SECS,
        ))
    }
}

/// Removes a security group from a port's list and verifies it.
///
/// # Errors
///
/// Returns any provider error from the lookup or update.
pub async fn disconnect_port_security_group(
    getter: &dyn Getter,
    network: &dyn NetworkVerbs,
    port_id: &str,
    group_id: &str,
) -> Result<Outcome<()>> {
    let port = getter.get(ResourceKind::Port, port_id).await?;
    let groups = port.string_list("security_groups");
    if !groups.iter().any(|g| g == group_id) {
        debug!("Port {port_id} does not have security group {group_id}");
        return Ok(Outcome::done());
    }

    let remaining: Vec<String> = groups.into_iter().filter(|g| g != group_id).collect();
    let updated = update_port_groups(network, port_id, remaining).await?;

    if updated.iter().any(|g| g == group_id) {
        Ok(Outcome::retry(
            format!("Security group {group_id} still attached to port {port_id}"),
            PORT_SECURITY_GROUP_RETRY_SECS,
        ))
    } else {
        Ok(Outcome::done())
    }
}

async fn update_port_groups(
    network: &dyn NetworkVerbs,
    port_id: &str,
    groups: Vec<String>,
) -> Result<Vec<String>> {
    let mut patch = Map::new();
    patch.insert(
        String::from("security_groups"),
        Value::Array(groups.into_iter().map(Value::from).collect()),
    );
    let port = network.update(ResourceKind::Port, port_id, &patch).await?;
    Ok(port.string_list("security_groups"))
}

/// Associates a floating IP with a server and checks the server reports it.
///
/// # Errors
///
/// Returns any provider error from the association or lookup.
pub async fn connect_floating_ip(
    compute: &dyn ComputeVerbs,
    getter: &dyn Getter,
    server_id: &str,
    address: &str,
    fixed_ip: Option<&str>,
) -> Result<Outcome<()>> {
    let server = getter.get(ResourceKind::Server, server_id).await?;
    if server.all_addresses().iter().any(|ip| ip == address) {
        info!("Floating IP {address} is already associated with server {server_id}");
        return Ok(Outcome::done());
    }

    compute
        .add_floating_ip(server_id, address, fixed_ip.map(str::to_string))
        .await?;

    let server = getter.get(ResourceKind::Server, server_id).await?;
    if server.all_addresses().iter().any(|ip| ip == address) {
        info!("Floating IP {address} associated with server {server_id}");
        Ok(Outcome::done())
    } else {
        Ok(Outcome::retry(
            format!("Waiting for floating IP {address} to show on server {server_id}"),
            RETRY_INTERVAL_SECS,
        ))
    }
}

/// Dissociates a floating IP from a server; a missing association is a no-op.
///
/// # Errors
///
/// Returns any provider error other than not-found.
pub async fn disconnect_floating_ip(
    compute: &dyn ComputeVerbs,
    server_id: &str,
    address: &str,
) -> Result<()> {
    match compute.remove_floating_ip(server_id, address).await {
        Ok(()) => {
            info!("Floating IP {address} dissociated from server {server_id}");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            warn!("Floating IP {address} was not associated with server {server_id}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
