//! ixsync core: index definitions, overrides, validation rules, node maps
//! and the live index read model.

#![forbid(unsafe_code)]

pub mod definition;
pub mod error;
pub mod export;
pub mod hooks;
pub mod index;
pub mod node_map;
pub mod patch;
pub mod validate;

pub use definition::{with_default_port, IndexDefinition, Lifecycle, Partition, DEFAULT_PORT, DEFAULT_SECURE_PORT};
pub use error::{ValidationError, ValidationResult};
pub use hooks::{Hook, HookRegistry};
pub use index::{ClusterVersion, CouchbaseIndex, IndexState, WithClause, DEFAULT_COLLECTION, DEFAULT_SCOPE};
pub use node_map::NodeMap;
pub use patch::{DefinitionPatch, IndexKey, LifecyclePatch, PartitionPatch, PartitionStrategy};
pub use validate::{DocumentKind, Validators};

pub mod prelude {
    pub use super::{
        ClusterVersion, CouchbaseIndex, DefinitionPatch, DocumentKind, HookRegistry, IndexDefinition, IndexState, NodeMap,
        ValidationError, Validators, WithClause,
    };
}
