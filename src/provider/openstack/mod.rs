//! OpenStack REST binding of the capability facade.
//!
//! This module provides the thin sub-service bindings (Nova, Neutron, Cinder,
//! Glance) behind [`crate::provider::Cloud`].

mod auth;
mod client;
mod normalize;
mod services;

pub use auth::{Endpoints, Session, authenticate};
pub use client::{ApiRequest, DEFAULT_TIMEOUT_SECS, RestClient};
pub use normalize::{normalize, normalize_all};
pub use services::{BlockStorageApi, ComputeApi, ImageApi, NetworkApi};

use std::sync::Arc;
use tracing::info;

use crate::config::ProviderConfig;
use crate::error::Result;

use super::Cloud;

/// Authenticates and assembles a [`Cloud`] over the four sub-services.
///
/// # Errors
///
/// Returns an error if authentication fails or the HTTP client cannot be built.
pub async fn connect(config: &ProviderConfig) -> Result<Cloud> {
    let session = authenticate(config).await?;
    info!("Connected to project {}", session.project_id);
    cloud_from_session(&session, config)
}

fn cloud_from_session(session: &Session, config: &ProviderConfig) -> Result<Cloud> {
    let client = Arc::new(RestClient::new(
        session.token.clone(),
        config.timeout_secs,
        config.insecure,
    )?);
    let endpoints = &session.endpoints;

    Ok(Cloud::new(
        Arc::new(ComputeApi::new(
            Arc::clone(&client),
            endpoints.compute.clone(),
            session.project_id.clone(),
        )),
        Arc::new(NetworkApi::new(
            Arc::clone(&client),
            &endpoints.network,
            session.project_id.clone(),
        )),
        Arc::new(BlockStorageApi::new(
            Arc::clone(&client),
            endpoints.block_storage.clone(),
            session.project_id.clone(),
        )),
        Arc::new(ImageApi::new(client, &endpoints.image)),
    ))
}
