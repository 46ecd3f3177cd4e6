// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Nimbus Lifecycle
//!
//! Retry-safe lifecycle operations for `OpenStack` resources declared by an
//! orchestrator.
//!
//! ## Overview
//!
//! An orchestrator invokes one operation at a time (create, start, stop,
//! delete, snapshot, establish a relationship, ...) on one node. Each
//! operation either finishes, asks to be re-invoked after a delay, or fails.
//! Progress lives in the node's runtime properties so a re-invocation picks
//! up where the previous one stopped.
//!
//! Nimbus lets you:
//!
//! - Adopt existing resources or create them on demand
//! - Converge servers through their power states without blocking
//! - Attach volumes, ports, security groups and floating IPs, and plug
//!   subnets into routers
//! - Drive the whole loop locally with the `nimbus` trampoline
//!
//! ## Architecture
//!
//! 1. **Declaration**: the node document (`nimbus.node.yaml`)
//! 2. **Runtime properties**: persisted per instance between invocations
//! 3. **Operations**: reconcile one node against the provider and report an
//!    [`outcome::OperationResult`]
//!
//! ## Modules
//!
//! - [`config`]: Node document parsing, validation and provider settings
//! - [`context`]: Operation contexts and the runtime-property store
//! - [`provider`]: Capability facade and the `OpenStack` REST binding
//! - [`resolver`]: External/managed identity resolution
//! - [`poller`]: Status convergence decisions
//! - [`nics`]: Server NIC list composition
//! - [`sequencer`]: Attach/detach sequencing between resources
//! - [`operations`]: Per-kind lifecycle operations
//! - [`trampoline`]: Local retry loop
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! deployment_id: web
//! instance_id: vm_x1y2z3
//! resources_prefix: web-
//! node:
//!   kind: server
//!   resource_id: frontend
//!   properties:
//!     server:
//!       flavor: m1.small
//!       image: ubuntu-24.04
//!     management_network_name: mgmt
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod nics;
pub mod operations;
pub mod outcome;
pub mod poller;
pub mod provider;
pub mod resolver;
pub mod sequencer;
pub mod trampoline;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, NodeDocument, NodeValidator, ProviderConfig};
pub use context::{
    LocalPropertyStore, OperationContext, PropertyStore, RelationshipContext, RuntimeProperties,
};
pub use error::{LifecycleError, Result};
pub use operations::Operation;
pub use outcome::{OperationResult, Outcome};
pub use provider::{Cloud, ProviderObject, ResourceKind};
pub use resolver::{Ownership, Resolver};
pub use trampoline::{InvocationReport, Trampoline};
