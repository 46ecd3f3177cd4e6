//! Error types for the lifecycle engine.
//!
//! Every failure is classified as either recoverable (the external retry
//! trampoline should re-invoke the operation later) or permanent (surface to
//! the operator). See [`LifecycleError::is_recoverable`].

use std::path::PathBuf;
use thiserror::Error;

use crate::provider::ResourceKind;

/// HTTP-like status codes the provider uses for errors that retrying cannot fix.
pub const PERMANENT_STATUS_CODES: [u16; 5] = [400, 401, 403, 404, 409];

/// Delay used when a recoverable error carries no hint of its own.
pub const DEFAULT_RETRY_SECS: u64 = 30;

/// The main error type for the lifecycle engine.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors raised by a provider sub-service.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// Identity resolution errors.
    #[error("{0}")]
    Resolve(#[from] ResolveError),

    /// Errors raised while driving a lifecycle operation.
    #[error("{0}")]
    Operation(#[from] OperationError),

    /// Runtime-property store errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A required node property or operation input is missing.
    #[error("Missing required property: {name}")]
    MissingProperty {
        /// Name of the missing property.
        name: String,
    },

    /// A property holds a value the operation cannot use.
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        /// Property name.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
}

/// Errors raised by a provider sub-service, already normalized.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested object does not exist.
    #[error("{kind} {id} not found [status_code=404]")]
    NotFound {
        /// Kind of the missing object.
        kind: ResourceKind,
        /// Identifier that was looked up.
        id: String,
    },

    /// The provider rejected the request.
    #[error("{message} [status_code={status}]")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// The provider reports rate limiting or an exhausted absolute limit.
    #[error("Provider over limit: {message}")]
    OverLimit {
        /// Provider-suggested delay, if it offered a usable one.
        retry_after_secs: Option<u64>,
        /// Error message from the provider.
        message: String,
    },

    /// A list filter that should select at most one object matched several.
    #[error("Expected at most one {kind} matching {filter}, found {count}")]
    AmbiguousMatch {
        /// Kind that was listed.
        kind: ResourceKind,
        /// Human-readable rendering of the filter.
        filter: String,
        /// Number of matches.
        count: usize,
    },

    /// The sub-service has no such capability.
    #[error("{service} does not support {capability}")]
    Unsupported {
        /// Sub-service name.
        service: &'static str,
        /// The missing capability.
        capability: String,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the provider. Repeating the call returns the
    /// same body, so this is permanent.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// Authentication with the identity service failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },
}

/// Identity resolution errors.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// An external resource is required but does not exist.
    #[error("Couldn't find a resource of type {kind} with the name or id {identifier}")]
    ResourceNotFound {
        /// Kind that was looked up.
        kind: ResourceKind,
        /// Name or id that was looked up.
        identifier: String,
    },

    /// Creating another resource of this kind would exceed the provider quota.
    #[error("{kind} cannot be created due to quota limitations. provisioned {plural}: {provisioned}, quota: {quota}")]
    QuotaExceeded {
        /// Kind being created.
        kind: ResourceKind,
        /// Plural form used in the message.
        plural: &'static str,
        /// Number of existing resources.
        provisioned: usize,
        /// Provider-reported quota.
        quota: i64,
    },

    /// Two sources supply the same piece of identity.
    #[error("Conflicting configuration: {message}")]
    ConflictingConfiguration {
        /// Description of the conflict.
        message: String,
    },

    /// A relationship count constraint was violated.
    #[error("Expected {expected} {kind} relationship(s), found {found}")]
    RelationshipCount {
        /// Target kind.
        kind: ResourceKind,
        /// Human-readable expectation ("exactly one", "at most one").
        expected: &'static str,
        /// Number of matching relationships.
        found: usize,
    },
}

/// Errors raised while driving a lifecycle operation.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The provider reports a status the operation cannot continue from.
    #[error("Unexpected {kind} state {status}. Reason: {reason}")]
    UnexpectedStatus {
        /// Kind of the observed resource.
        kind: ResourceKind,
        /// Observed status.
        status: String,
        /// Provider-supplied or synthesized reason.
        reason: String,
    },

    /// The provider has not yet converged on the requested change.
    #[error("{message}")]
    NotConverged {
        /// Description of the expected post-condition.
        message: String,
    },

    /// A bounded wait ran out.
    #[error("Timed out after {waited_secs}s waiting for {kind} {id} to reach {expected}")]
    Timeout {
        /// Kind being waited on.
        kind: ResourceKind,
        /// Id being waited on.
        id: String,
        /// Expected state.
        expected: String,
        /// Seconds spent waiting.
        waited_secs: u64,
    },

    /// An external resource does not match its declaration.
    #[error("{message}")]
    ExternalMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// The operation's preconditions are not met.
    #[error("{message}")]
    InvalidState {
        /// Description of the failed precondition.
        message: String,
    },

    /// A compensating action failed after an earlier step had failed.
    #[error("{message}; original error: {original}")]
    CleanupFailed {
        /// Description of the failed compensation.
        message: String,
        /// The error that triggered the compensation.
        original: Box<LifecycleError>,
    },
}

/// Runtime-property store errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Stored properties are corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// The backing store could not be written.
    #[error("State write failed: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;

impl LifecycleError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if re-invoking the operation later may succeed.
    ///
    /// Provider errors with a status outside [`PERMANENT_STATUS_CODES`] are
    /// treated as transient, as are unconverged post-conditions and timeouts.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_recoverable(),
            Self::Operation(OperationError::NotConverged { .. } | OperationError::Timeout { .. }) => {
                true
            }
            _ => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if the error carries one.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::OverLimit { retry_after_secs, .. }) => *retry_after_secs,
            Self::Provider(ProviderError::NetworkError { .. }) => Some(5),
            _ => None,
        }
    }

    /// Returns true if this is a provider not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::NotFound { .. }))
    }
}

impl ProviderError {
    /// Returns true if the error is transient.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::ApiRequestFailed { status, .. } => !is_permanent_status(*status),
            Self::OverLimit { .. } | Self::NetworkError { .. } => true,
            Self::NotFound { .. }
            | Self::InvalidResponse { .. }
            | Self::AmbiguousMatch { .. }
            | Self::Unsupported { .. }
            | Self::AuthenticationFailed { .. } => false,
        }
    }

    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates an invalid-response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Returns true if `status` is one of [`PERMANENT_STATUS_CODES`].
#[must_use]
pub const fn is_permanent_status(status: u16) -> bool {
    matches!(status, 400 | 401 | 403 | 404 | 409)
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a missing-property error.
    #[must_use]
    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingProperty { name: name.into() }
    }

    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl ResolveError {
    /// Creates a conflicting-configuration error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::ConflictingConfiguration {
            message: message.into(),
        }
    }
}

impl OperationError {
    /// Creates a not-converged (recoverable) error.
    #[must_use]
    pub fn not_converged(message: impl Into<String>) -> Self {
        Self::NotConverged {
            message: message.into(),
        }
    }

    /// Creates an invalid-state (permanent) error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an external-mismatch (permanent) error.
    #[must_use]
    pub fn external_mismatch(message: impl Into<String>) -> Self {
        Self::ExternalMismatch {
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}
