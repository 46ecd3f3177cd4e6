//! Runtime-property store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::properties::RuntimeProperties;

/// Properties of one instance as written to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredProperties {
    /// Node instance id.
    pub instance_id: String,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// The stored properties.
    pub properties: RuntimeProperties,
}

impl StoredProperties {
    /// Stamps `properties` with the current time.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, properties: RuntimeProperties) -> Self {
        Self {
            instance_id: instance_id.into(),
            updated_at: Utc::now(),
            properties,
        }
    }
}

/// Persists runtime properties across operation invocations.
#[async_trait]
pub trait PropertyStore: Send + Sync {
    /// Loads the properties of an instance.
    ///
    /// Returns `None` if nothing was stored yet.
    async fn load(&self, instance_id: &str) -> Result<Option<StoredProperties>>;

    /// Replaces the properties of an instance.
    async fn save(&self, instance_id: &str, properties: &RuntimeProperties) -> Result<()>;

    /// Deletes the properties of an instance.
    async fn delete(&self, instance_id: &str) -> Result<()>;

    /// Lists the instances with stored properties.
    async fn instances(&self) -> Result<Vec<String>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl PropertyStore for Box<dyn PropertyStore> {
    async fn load(&self, instance_id: &str) -> Result<Option<StoredProperties>> {
        (**self).load(instance_id).await
    }

    async fn save(&self, instance_id: &str, properties: &RuntimeProperties) -> Result<()> {
        (**self).save(instance_id, properties).await
    }

    async fn delete(&self, instance_id: &str) -> Result<()> {
        (**self).delete(instance_id).await
    }

    async fn instances(&self) -> Result<Vec<String>> {
        (**self).instances().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
