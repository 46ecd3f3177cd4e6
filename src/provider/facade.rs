//! Provider capability facade.
//!
//! One trait per capability ([`Lister`], [`Getter`], [`Creator`], [`Deleter`],
//! [`QuotaProvider`]) is implemented once per sub-service. [`Cloud`] routes each
//! [`ResourceKind`] to the sub-service that owns it and forwards the
//! resource-specific verbs, so operations only ever hold one handle.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::{LifecycleError, ProviderError, Result};

use super::types::{
    Filter, GroupRef, Interface, ProviderObject, RebootKind, ResourceKind, Service,
    VolumeAttachment,
};

/// Lists objects of a kind, filtered by equality on attributes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Lister: Send + Sync {
    /// Lists objects matching `filter`.
    async fn list(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<ProviderObject>>;
}

/// Fetches one object by id.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Getter: Send + Sync {
    /// Gets an object by id.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] if the object does not exist.
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<ProviderObject>;
}

/// Creates objects from a payload.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Creator: Send + Sync {
    /// Creates an object and returns it as the provider reports it.
    async fn create(&self, kind: ResourceKind, payload: &Map<String, Value>)
    -> Result<ProviderObject>;
}

/// Deletes objects by id.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Deleter: Send + Sync {
    /// Deletes an object.
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()>;
}

/// Reports resource quotas.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QuotaProvider: Send + Sync {
    /// Returns the quota for `kind`; [`super::UNLIMITED_QUOTA`] means unlimited.
    async fn quota(&self, kind: ResourceKind) -> Result<i64>;
}

/// Compute-specific verbs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComputeVerbs: Send + Sync {
    /// Powers on a stopped server.
    async fn start_server(&self, server_id: &str) -> Result<()>;
    /// Powers off a server.
    async fn stop_server(&self, server_id: &str) -> Result<()>;
    /// Reboots a server.
    async fn reboot_server(&self, server_id: &str, kind: RebootKind) -> Result<()>;
    /// Suspends a server.
    async fn suspend_server(&self, server_id: &str) -> Result<()>;
    /// Resumes a suspended server.
    async fn resume_server(&self, server_id: &str) -> Result<()>;
    /// Rebuilds a server from an image.
    async fn rebuild_server(&self, server_id: &str, image_id: &str) -> Result<()>;
    /// Creates a rotated backup image of a server.
    async fn backup_server(
        &self,
        server_id: &str,
        name: &str,
        backup_type: &str,
        rotation: u32,
    ) -> Result<()>;
    /// Creates a snapshot image of a server and returns the image id.
    async fn create_server_image(&self, server_id: &str, name: &str) -> Result<String>;
    /// Attaches a volume; `device` of `None` lets the provider choose.
    async fn attach_volume(
        &self,
        server_id: &str,
        volume_id: &str,
        device: Option<String>,
    ) -> Result<()>;
    /// Removes a volume attachment.
    async fn detach_volume(&self, server_id: &str, attachment_id: &str) -> Result<()>;
    /// Lists the volume attachments of a server.
    async fn volume_attachments(&self, server_id: &str) -> Result<Vec<VolumeAttachment>>;
    /// Plugs a port or network into a server.
    async fn attach_interface(
        &self,
        server_id: &str,
        port_id: Option<String>,
        net_id: Option<String>,
    ) -> Result<()>;
    /// Lists the interfaces plugged into a server.
    async fn interfaces(&self, server_id: &str) -> Result<Vec<Interface>>;
    /// Adds a security group to a server by name.
    async fn add_security_group(&self, server_id: &str, group_name: &str) -> Result<()>;
    /// Removes a security group from a server by name.
    async fn remove_security_group(&self, server_id: &str, group_name: &str) -> Result<()>;
    /// Lists the security groups of a server.
    async fn server_security_groups(&self, server_id: &str) -> Result<Vec<GroupRef>>;
    /// Associates a floating IP with a server.
    async fn add_floating_ip(
        &self,
        server_id: &str,
        address: &str,
        fixed_ip: Option<String>,
    ) -> Result<()>;
    /// Disassociates a floating IP from a server.
    async fn remove_floating_ip(&self, server_id: &str, address: &str) -> Result<()>;
    /// Returns the encrypted admin password, if the metadata service has one.
    async fn encrypted_password(&self, server_id: &str) -> Result<Option<String>>;
}

/// Network-specific verbs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NetworkVerbs: Send + Sync {
    /// Applies a partial update and returns the updated object.
    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        patch: &Map<String, Value>,
    ) -> Result<ProviderObject>;
    /// Plugs a subnet into a router.
    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()>;
    /// Unplugs a subnet from a router.
    async fn remove_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()>;
}

/// Block-storage-specific verbs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlockStorageVerbs: Send + Sync {
    /// Creates a backup of a volume and returns the backup id.
    async fn create_backup(&self, volume_id: &str, name: &str) -> Result<String>;
    /// Restores a backup onto a volume.
    async fn restore_backup(&self, backup_id: &str, volume_id: &str) -> Result<()>;
    /// Creates a snapshot of a volume and returns the snapshot id.
    async fn create_snapshot(&self, volume_id: &str, name: &str, force: bool) -> Result<String>;
}

/// The generic capabilities every sub-service provides.
pub trait ServiceCapabilities: Lister + Getter + Creator + Deleter + QuotaProvider {}

impl<T: Lister + Getter + Creator + Deleter + QuotaProvider> ServiceCapabilities for T {}

/// A compute sub-service.
pub trait ComputeService: ServiceCapabilities + ComputeVerbs {}

impl<T: ServiceCapabilities + ComputeVerbs> ComputeService for T {}

/// A networking sub-service.
pub trait NetworkService: ServiceCapabilities + NetworkVerbs {}

impl<T: ServiceCapabilities + NetworkVerbs> NetworkService for T {}

/// A block-storage sub-service.
pub trait BlockStorageService: ServiceCapabilities + BlockStorageVerbs {}

impl<T: ServiceCapabilities + BlockStorageVerbs> BlockStorageService for T {}

/// Uniform handle over all provider sub-services.
#[derive(Clone)]
pub struct Cloud {
    compute: Arc<dyn ComputeService>,
    network: Arc<dyn NetworkService>,
    block_storage: Arc<dyn BlockStorageService>,
    image: Arc<dyn ServiceCapabilities>,
}

impl std::fmt::Debug for Cloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cloud").finish_non_exhaustive()
    }
}

impl Cloud {
    /// Assembles a facade from one implementation per sub-service.
    #[must_use]
    pub fn new(
        compute: Arc<dyn ComputeService>,
        network: Arc<dyn NetworkService>,
        block_storage: Arc<dyn BlockStorageService>,
        image: Arc<dyn ServiceCapabilities>,
    ) -> Self {
        Self {
            compute,
            network,
            block_storage,
            image,
        }
    }

    /// Gets an object, mapping not-found to `None`.
    ///
    /// # Errors
    ///
    /// Returns any provider error other than not-found.
    pub async fn try_get(&self, kind: ResourceKind, id: &str) -> Result<Option<ProviderObject>> {
        try_get(self, kind, id).await
    }

    /// Lists objects and requires at most one match.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::AmbiguousMatch`] if more than one object matches.
    pub async fn find_one(
        &self,
        kind: ResourceKind,
        filter: &Filter,
    ) -> Result<Option<ProviderObject>> {
        find_one(self, kind, filter).await
    }

    /// Finds an object by name and requires it to exist.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] if no object has that name.
    pub async fn find_named(&self, kind: ResourceKind, name: &str) -> Result<ProviderObject> {
        self.find_one(kind, &Filter::new().with(kind.name_field(), name))
            .await?
            .ok_or_else(|| ProviderError::not_found(kind, name).into())
    }
}

/// Gets an object, mapping not-found to `None`.
///
/// # Errors
///
/// Returns any provider error other than not-found.
pub async fn try_get(
    getter: &dyn Getter,
    kind: ResourceKind,
    id: &str,
) -> Result<Option<ProviderObject>> {
    match getter.get(kind, id).await {
        Ok(object) => Ok(Some(object)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Lists objects and requires at most one match.
///
/// # Errors
///
/// Returns [`ProviderError::AmbiguousMatch`] if more than one object matches.
pub async fn find_one(
    lister: &dyn Lister,
    kind: ResourceKind,
    filter: &Filter,
) -> Result<Option<ProviderObject>> {
    let mut matches = lister.list(kind, filter).await?;
    debug!("Lookup of {kind} by {filter} matched {} object(s)", matches.len());
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        count => Err(LifecycleError::Provider(ProviderError::AmbiguousMatch {
            kind,
            filter: filter.to_string(),
            count,
        })),
    }
}

#[async_trait]
impl Lister for Cloud {
    async fn list(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<ProviderObject>> {
        match kind.service() {
            Service::Compute => self.compute.list(kind, filter).await,
            Service::Network => self.network.list(kind, filter).await,
            Service::BlockStorage => self.block_storage.list(kind, filter).await,
            Service::Image => self.image.list(kind, filter).await,
        }
    }
}

#[async_trait]
impl Getter for Cloud {
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<ProviderObject> {
        match kind.service() {
            Service::Compute => self.compute.get(kind, id).await,
            Service::Network => self.network.get(kind, id).await,
            Service::BlockStorage => self.block_storage.get(kind, id).await,
            Service::Image => self.image.get(kind, id).await,
        }
    }
}

#[async_trait]
impl Creator for Cloud {
    async fn create(
        &self,
        kind: ResourceKind,
        payload: &Map<String, Value>,
    ) -> Result<ProviderObject> {
        match kind.service() {
            Service::Compute => self.compute.create(kind, payload).await,
            Service::Network => self.network.create(kind, payload).await,
            Service::BlockStorage => self.block_storage.create(kind, payload).await,
            Service::Image => self.image.create(kind, payload).await,
        }
    }
}

#[async_trait]
impl Deleter for Cloud {
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<()> {
        match kind.service() {
            Service::Compute => self.compute.delete(kind, id).await,
            Service::Network => self.network.delete(kind, id).await,
            Service::BlockStorage => self.block_storage.delete(kind, id).await,
            Service::Image => self.image.delete(kind, id).await,
        }
    }
}

#[async_trait]
impl QuotaProvider for Cloud {
    async fn quota(&self, kind: ResourceKind) -> Result<i64> {
        match kind.service() {
            Service::Compute => self.compute.quota(kind).await,
            Service::Network => self.network.quota(kind).await,
            Service::BlockStorage => self.block_storage.quota(kind).await,
            Service::Image => self.image.quota(kind).await,
        }
    }
}

#[async_trait]
impl ComputeVerbs for Cloud {
    async fn start_server(&self, server_id: &str) -> Result<()> {
        self.compute.start_server(server_id).await
    }

    async fn stop_server(&self, server_id: &str) -> Result<()> {
        self.compute.stop_server(server_id).await
    }

    async fn reboot_server(&self, server_id: &str, kind: RebootKind) -> Result<()> {
        self.compute.reboot_server(server_id, kind).await
    }

    async fn suspend_server(&self, server_id: &str) -> Result<()> {
        self.compute.suspend_server(server_id).await
    }

    async fn resume_server(&self, server_id: &str) -> Result<()> {
        self.compute.resume_server(server_id).await
    }

    async fn rebuild_server(&self, server_id: &str, image_id: &str) -> Result<()> {
        self.compute.rebuild_server(server_id, image_id).await
    }

    async fn backup_server(
        &self,
        server_id: &str,
        name: &str,
        backup_type: &str,
        rotation: u32,
    ) -> Result<()> {
        self.compute
            .backup_server(server_id, name, backup_type, rotation)
            .await
    }

    async fn create_server_image(&self, server_id: &str, name: &str) -> Result<String> {
        self.compute.create_server_image(server_id, name).await
    }

    async fn attach_volume(
        &self,
        server_id: &str,
        volume_id: &str,
        device: Option<String>,
    ) -> Result<()> {
        self.compute.attach_volume(server_id, volume_id, device).await
    }

    async fn detach_volume(&self, server_id: &str, attachment_id: &str) -> Result<()> {
        self.compute.detach_volume(server_id, attachment_id).await
    }

    async fn volume_attachments(&self, server_id: &str) -> Result<Vec<VolumeAttachment>> {
        self.compute.volume_attachments(server_id).await
    }

    async fn attach_interface(
        &self,
        server_id: &str,
        port_id: Option<String>,
        net_id: Option<String>,
    ) -> Result<()> {
        self.compute
            .attach_interface(server_id, port_id, net_id)
            .await
    }

    async fn interfaces(&self, server_id: &str) -> Result<Vec<Interface>> {
        self.compute.interfaces(server_id).await
    }

    async fn add_security_group(&self, server_id: &str, group_name: &str) -> Result<()> {
        self.compute.add_security_group(server_id, group_name).await
    }

    async fn remove_security_group(&self, server_id: &str, group_name: &str) -> Result<()> {
        self.compute
            .remove_security_group(server_id, group_name)
            .await
    }

    async fn server_security_groups(&self, server_id: &str) -> Result<Vec<GroupRef>> {
        self.compute.server_security_groups(server_id).await
    }

    async fn add_floating_ip(
        &self,
        server_id: &str,
        address: &str,
        fixed_ip: Option<String>,
    ) -> Result<()> {
        self.compute
            .add_floating_ip(server_id, address, fixed_ip)
            .await
    }

    async fn remove_floating_ip(&self, server_id: &str, address: &str) -> Result<()> {
        self.compute.remove_floating_ip(server_id, address).await
    }

    async fn encrypted_password(&self, server_id: &str) -> Result<Option<String>> {
        self.compute.encrypted_password(server_id).await
    }
}

#[async_trait]
impl NetworkVerbs for Cloud {
    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        patch: &Map<String, Value>,
    ) -> Result<ProviderObject> {
        self.network.update(kind, id, patch).await
    }

    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        self.network.add_router_interface(router_id, subnet_id).await
    }

    async fn remove_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        self.network.remove_router_interface(router_id, subnet_id).await
    }
}

#[async_trait]
impl BlockStorageVerbs for Cloud {
    async fn create_backup(&self, volume_id: &str, name: &str) -> Result<String> {
        self.block_storage.create_backup(volume_id, name).await
    }

    async fn restore_backup(&self, backup_id: &str, volume_id: &str) -> Result<()> {
        self.block_storage.restore_backup(backup_id, volume_id).await
    }

    async fn create_snapshot(&self, volume_id: &str, name: &str, force: bool) -> Result<String> {
        self.block_storage
            .create_snapshot(volume_id, name, force)
            .await
    }
}
