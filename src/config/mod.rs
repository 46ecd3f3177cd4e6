//! Configuration module.
//!
//! This module handles:
//! - Parsing the YAML node document and its environment overrides
//! - Validation of the declaration and operation inputs
//! - Layered provider endpoint configuration

mod node;
mod parser;
mod provider;
mod validator;

pub use node::{NodeDocument, RelationshipEntry};
pub use parser::{ConfigParser, DEFAULT_NODE_FILES, find_config_file};
pub use provider::{CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE, ProviderConfig};
pub use validator::{NodeValidator, ValidationError, ValidationResult};
