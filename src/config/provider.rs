//! Provider endpoint configuration.
//!
//! Values are layered with this precedence (later wins): `OS_*` environment
//! variables, the JSON file at `$OPENSTACK_CONFIG_PATH` (default
//! `~/openstack_config.json`), then the node document's inline
//! `openstack_config` block. Empty values never override.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, LifecycleError, Result};

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "OPENSTACK_CONFIG_PATH";

/// Default config file name, relative to the home directory.
pub const DEFAULT_CONFIG_FILE: &str = "openstack_config.json";

const DEFAULT_INTERFACE: &str = "public";
const DEFAULT_DOMAIN: &str = "Default";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment variables and the config keys they set.
const ENV_KEYS: &[(&str, &str)] = &[
    ("OS_AUTH_URL", "auth_url"),
    ("OS_USERNAME", "username"),
    ("OS_PASSWORD", "password"),
    ("OS_PROJECT_ID", "project_id"),
    ("OS_TENANT_ID", "project_id"),
    ("OS_PROJECT_NAME", "project_name"),
    ("OS_TENANT_NAME", "project_name"),
    ("OS_USER_DOMAIN_NAME", "user_domain_name"),
    ("OS_PROJECT_DOMAIN_NAME", "project_domain_name"),
    ("OS_REGION_NAME", "region_name"),
    ("OS_AUTH_TOKEN", "auth_token"),
    ("OS_INTERFACE", "interface"),
    ("OS_COMPUTE_URL", "compute_url"),
    ("OS_NETWORK_URL", "network_url"),
    ("OS_VOLUME_URL", "volume_url"),
    ("OS_IMAGE_URL", "image_url"),
    ("OS_INSECURE", "insecure"),
];

/// Credentials and endpoints of the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Keystone v3 endpoint.
    pub auth_url: Option<String>,
    /// User name for password authentication.
    pub username: Option<String>,
    /// Password for password authentication.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Project id to scope the token to.
    pub project_id: Option<String>,
    /// Project name to scope the token to.
    pub project_name: Option<String>,
    /// Domain of the user.
    pub user_domain_name: Option<String>,
    /// Domain of the project.
    pub project_domain_name: Option<String>,
    /// Region used to pick catalog endpoints.
    pub region_name: Option<String>,
    /// Pre-issued token; skips Keystone together with explicit endpoints.
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    /// Explicit compute endpoint.
    pub compute_url: Option<String>,
    /// Explicit network endpoint.
    pub network_url: Option<String>,
    /// Explicit block-storage endpoint.
    pub volume_url: Option<String>,
    /// Explicit image endpoint.
    pub image_url: Option<String>,
    /// Catalog interface (`public`, `internal`, `admin`).
    pub interface: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Skip TLS certificate verification.
    pub insecure: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            auth_url: None,
            username: None,
            password: None,
            project_id: None,
            project_name: None,
            user_domain_name: None,
            project_domain_name: None,
            region_name: None,
            auth_token: None,
            compute_url: None,
            network_url: None,
            volume_url: None,
            image_url: None,
            interface: String::from(DEFAULT_INTERFACE),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            insecure: false,
        }
    }
}

impl ProviderConfig {
    /// Builds the layered configuration from the process environment, the
    /// config file and the inline block.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but is not valid JSON.
    pub fn load(inline: &Map<String, Value>) -> Result<Self> {
        let mut config = Self::from_env_with(|name| std::env::var(name).ok());

        let path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_FILE)));
        if let Some(path) = path {
            if let Some(values) = read_config_file(&path)? {
                config.apply(&values);
            }
        }

        config.apply(inline);
        Ok(config)
    }

    /// Builds a configuration from environment lookups.
    #[must_use]
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let values: Map<String, Value> = ENV_KEYS
            .iter()
            .filter_map(|(var, key)| lookup(var).map(|v| ((*key).to_string(), Value::String(v))))
            .collect();
        let mut config = Self::default();
        config.apply(&values);
        config
    }

    /// Overrides fields with every non-empty value in `values`.
    pub fn apply(&mut self, values: &Map<String, Value>) {
        for (key, value) in values {
            if is_empty(value) {
                continue;
            }
            self.set(key, value);
        }
    }

    fn set(&mut self, key: &str, value: &Value) {
        let text = || match value {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        };
        match key {
            "auth_url" => self.auth_url = text(),
            "username" => self.username = text(),
            "password" => self.password = text(),
            "project_id" | "tenant_id" => self.project_id = text(),
            "project_name" | "tenant_name" => self.project_name = text(),
            "user_domain_name" => self.user_domain_name = text(),
            "project_domain_name" => self.project_domain_name = text(),
            "region_name" | "region" => self.region_name = text(),
            "auth_token" | "token" => self.auth_token = text(),
            "compute_url" => self.compute_url = text(),
            "network_url" => self.network_url = text(),
            "volume_url" => self.volume_url = text(),
            "image_url" => self.image_url = text(),
            "interface" => {
                if let Some(interface) = text() {
                    self.interface = interface;
                }
            }
            "timeout_secs" | "timeout" => match value_as_u64(value) {
                Some(secs) => self.timeout_secs = secs,
                None => warn!("Ignoring non-numeric provider timeout: {value}"),
            },
            "insecure" => self.insecure = value_as_bool(value),
            other => debug!("Ignoring unknown provider config key: {other}"),
        }
    }

    /// Domain of the user, `Default` if unset.
    #[must_use]
    pub fn user_domain_name(&self) -> &str {
        self.user_domain_name.as_deref().unwrap_or(DEFAULT_DOMAIN)
    }

    /// Domain of the project, `Default` if unset.
    #[must_use]
    pub fn project_domain_name(&self) -> &str {
        self.project_domain_name.as_deref().unwrap_or(DEFAULT_DOMAIN)
    }
}

fn read_config_file(path: &Path) -> Result<Option<Map<String, Value>>> {
    if !path.exists() {
        debug!("Provider config file not found at: {}", path.display());
        return Ok(None);
    }

    info!("Loading provider configuration from: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map(Some).map_err(|e| {
        LifecycleError::Config(ConfigError::ParseError {
            message: format!("Invalid provider config: {e}"),
            location: Some(path.display().to_string()),
        })
    })
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn value_as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    }
}
