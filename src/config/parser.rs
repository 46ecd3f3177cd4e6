//! Node document parser.
//!
//! Loads the YAML node document, applies environment overrides and the
//! optional `.env` file next to it.

use crate::error::{ConfigError, LifecycleError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::node::NodeDocument;

/// Parser for node documents.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory the `.env` file is looked up in.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a node document from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<NodeDocument> {
        let path = path.as_ref();
        info!("Loading node document from: {}", path.display());

        if !path.exists() {
            return Err(LifecycleError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            LifecycleError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a node document from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<NodeDocument> {
        debug!("Parsing YAML node document");

        let document: NodeDocument = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            LifecycleError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed {} node instance {}",
            document.node.kind, document.instance_id
        );
        Ok(document)
    }

    /// Loads a node document with environment variable overrides.
    ///
    /// `NIMBUS_DEPLOYMENT_ID` and `NIMBUS_RESOURCES_PREFIX` replace the
    /// document's values when set and non-empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<NodeDocument> {
        let mut document = self.load_file(path)?;
        Self::apply_env_overrides(&mut document, |name| std::env::var(name).ok());
        Ok(document)
    }

    fn apply_env_overrides(document: &mut NodeDocument, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(deployment_id) = non_empty("NIMBUS_DEPLOYMENT_ID") {
            debug!("Overriding deployment_id from environment");
            document.deployment_id = deployment_id;
        }

        if let Some(prefix) = non_empty("NIMBUS_RESOURCES_PREFIX") {
            debug!("Overriding resources_prefix from environment");
            document.resources_prefix = Some(prefix);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                LifecycleError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default node document names to search for.
pub const DEFAULT_NODE_FILES: &[&str] = &[
    "nimbus.node.yaml",
    "nimbus.node.yml",
    "node.yaml",
    "node.yml",
];

/// Finds the node document in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no node document is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_NODE_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found node document: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(LifecycleError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_NODE_FILES[0]),
    }))
}
