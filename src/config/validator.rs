//! Node document validation.
//!
//! Catches declarations no operation could act on before any provider call
//! is made.

use crate::context::prefixed;
use crate::error::{ConfigError, LifecycleError, Result};
use crate::operations::Operation;
use crate::provider::{RebootKind, ResourceKind};
use tracing::debug;

use super::node::NodeDocument;

/// Longest resource name the provider accepts.
const MAX_NAME_LEN: usize = 255;

/// Validator for node documents.
#[derive(Debug, Default)]
pub struct NodeValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl NodeValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a node document, and the inputs of `operation` if given.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(
        &self,
        document: &NodeDocument,
        operation: Option<Operation>,
    ) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_identifiers(document, &mut result);
        Self::validate_node(document, &mut result);
        Self::validate_relationships(document, &mut result);
        if let Some(operation) = operation {
            Self::validate_operation(document, operation, &mut result);
        }

        if result.errors.is_empty() {
            debug!("Node document validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(LifecycleError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_identifiers(document: &NodeDocument, result: &mut ValidationResult) {
        if document.deployment_id.is_empty() {
            result.error("deployment_id", "Deployment id cannot be empty");
        }
        if !is_valid_instance_id(&document.instance_id) {
            result.error(
                "instance_id",
                format!(
                    "Instance id '{}' is invalid. Must be alphanumeric with '_', '-' or '.', \
                     not starting with '.'.",
                    document.instance_id
                ),
            );
        }
    }

    fn validate_node(document: &NodeDocument, result: &mut ValidationResult) {
        let node = &document.node;

        if node.use_external && node.resource_id().is_none() {
            result.error(
                "node.resource_id",
                "resource_id is required when use_external_resource is true",
            );
        }
        if node.create_if_missing && !node.use_external {
            result.warnings.push(String::from(
                "create_if_missing has no effect without use_external_resource",
            ));
        }

        let name = node.resource_id().map_or_else(
            || {
                format!(
                    "{}_{}_{}",
                    node.kind, document.deployment_id, document.instance_id
                )
            },
            str::to_string,
        );
        if !node.use_external {
            let name = prefixed(document.resources_prefix.as_deref(), &name);
            if name.len() > MAX_NAME_LEN {
                result.error(
                    "node.resource_id",
                    format!("Resource name '{name}' exceeds {MAX_NAME_LEN} characters"),
                );
            }
        }
    }

    fn validate_relationships(document: &NodeDocument, result: &mut ValidationResult) {
        for (index, entry) in document.relationships.iter().enumerate() {
            let target = &entry.target;
            if target.node.use_external
                && target.node.resource_id().is_none()
                && target.external_id().is_none()
            {
                result.error(
                    format!("relationships[{index}].target.node.resource_id"),
                    format!(
                        "External {} target needs a resource_id or an external_id",
                        target.node.kind
                    ),
                );
            }
            if entry.target_instance.as_deref().is_some_and(|id| !is_valid_instance_id(id)) {
                result.error(
                    format!("relationships[{index}].target_instance"),
                    "Target instance id is invalid",
                );
            }
        }
    }

    fn validate_operation(
        document: &NodeDocument,
        operation: Operation,
        result: &mut ValidationResult,
    ) {
        let inputs = &document.inputs;

        if operation == Operation::Reboot {
            if let Some(reboot_type) = inputs.get("reboot_type").and_then(|v| v.as_str()) {
                if let Err(e) = reboot_type.parse::<RebootKind>() {
                    result.error("inputs.reboot_type", e.to_string());
                }
            }
        }

        if operation.is_snapshot() {
            if !matches!(document.node.kind, ResourceKind::Server | ResourceKind::Volume) {
                result.error(
                    "node.kind",
                    format!("{} nodes have no snapshots", document.node.kind),
                );
            }
            let named = inputs
                .get("snapshot_name")
                .and_then(|v| v.as_str())
                .is_some_and(|name| !name.is_empty());
            if !named {
                result.error(
                    "inputs.snapshot_name",
                    format!("{operation} requires a snapshot_name input"),
                );
            }
        }

        if operation.is_relationship() && document.relationships.is_empty() {
            result.error(
                "relationships",
                format!("{operation} needs at least one relationship"),
            );
        }
    }
}

/// Instance ids key the property store, so they must be safe file names.
fn is_valid_instance_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
