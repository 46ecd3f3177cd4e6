//! Provider capability facade.
//!
//! This module provides the uniform interface over the compute, network,
//! block-storage and image sub-services:
//! - [`types`]: normalized object model
//! - [`facade`]: capability traits and the [`Cloud`] dispatcher
//! - [`classify`]: translation of provider failures into the error taxonomy
//! - [`openstack`]: the REST binding

pub mod classify;
pub mod facade;
pub mod openstack;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use facade::{
    BlockStorageService, BlockStorageVerbs, Cloud, ComputeService, ComputeVerbs, Creator,
    Deleter, Getter, Lister, NetworkService, NetworkVerbs, QuotaProvider, ServiceCapabilities,
    find_one, try_get,
};
pub use types::{
    Filter, GroupRef, Interface, ProviderObject, RebootKind, ResourceKind, Service,
    UNLIMITED_QUOTA, UNMETERED_QUOTA, VolumeAttachment,
};
