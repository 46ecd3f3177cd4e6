//! Local file-based runtime-property store.
//!
//! One JSON file per node instance under `.nimbus/props/`. Writes go to a
//! temporary file that is then renamed over the target.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{LifecycleError, Result, StateError};

use super::properties::RuntimeProperties;
use super::store::{PropertyStore, StoredProperties};

/// Default store directory name.
pub const STORE_DIR: &str = ".nimbus";

const PROPS_DIR: &str = "props";

/// Local file-based property store.
#[derive(Debug)]
pub struct LocalPropertyStore {
    /// Directory holding one file per instance.
    dir: PathBuf,
}

impl LocalPropertyStore {
    /// Creates a store under `.nimbus/` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| {
                LifecycleError::internal(format!("Cannot determine current directory: {e}"))
            })?
            .join(STORE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store under a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: base_dir.into().join(PROPS_DIR),
        }
    }

    fn path_for(&self, instance_id: &str) -> Result<PathBuf> {
        let valid = !instance_id.is_empty()
            && instance_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !instance_id.starts_with('.');
        if !valid {
            return Err(StateError::write(format!("Invalid instance id: {instance_id:?}")).into());
        }
        Ok(self.dir.join(format!("{instance_id}.json")))
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            debug!("Creating property directory: {}", self.dir.display());
            fs::create_dir_all(&self.dir).await.map_err(|e| {
                StateError::write(format!("Failed to create property directory: {e}"))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl PropertyStore for LocalPropertyStore {
    async fn load(&self, instance_id: &str) -> Result<Option<StoredProperties>> {
        let path = self.path_for(instance_id)?;
        if !path.exists() {
            debug!("No stored properties for {instance_id}");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await.map_err(|e| StateError::Corrupted {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;

        let stored = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse {}: {e}", path.display()),
        })?;

        Ok(Some(stored))
    }

    async fn save(&self, instance_id: &str, properties: &RuntimeProperties) -> Result<()> {
        let path = self.path_for(instance_id)?;
        self.ensure_dir().await?;

        let stored = StoredProperties::new(instance_id, properties.clone());
        let content = serde_json::to_string_pretty(&stored)
            .map_err(|e| StateError::serialization(format!("Failed to serialize properties: {e}")))?;

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create temp file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write properties: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync properties: {e}")))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename properties file: {e}")))?;

        debug!("Saved {} properties for {instance_id}", properties.len());
        Ok(())
    }

    async fn delete(&self, instance_id: &str) -> Result<()> {
        let path = self.path_for(instance_id)?;
        if path.exists() {
            info!("Deleting stored properties for {instance_id}");
            fs::remove_file(&path)
                .await
                .map_err(|e| StateError::write(format!("Failed to delete properties: {e}")))?;
        }
        Ok(())
    }

    async fn instances(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        let mut instances = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    instances.push(stem.to_string());
                }
            }
        }
        instances.sort();
        Ok(instances)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
