//! Explicit per-invocation context.
//!
//! Every operation receives its declared node, relationships, inputs and
//! runtime properties through an [`OperationContext`] or
//! [`RelationshipContext`]; nothing is read from ambient state.

mod local;
mod model;
mod properties;
mod store;

pub use local::{LocalPropertyStore, STORE_DIR};
pub use model::{
    DeclaredResource, Deployment, NamedResource, NodeInstance, OperationContext, ProviderContext,
    Relationship, RelationshipContext, RelationshipKind, prefixed,
};
pub use properties::{COMMON_KEYS, RuntimeProperties, SECRET_KEYS, keys, scrubbed};
pub use store::{PropertyStore, StoredProperties};
