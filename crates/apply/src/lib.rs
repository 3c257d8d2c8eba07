//! ixsync apply engine: loading, reconciliation and phased execution.

#![forbid(unsafe_code)]

pub mod ddl;
pub mod error;
pub mod load;
pub mod mutation;
pub mod normalize;
pub mod plan;
pub mod reconcile;
pub mod sync;

pub use error::{SyncError, SyncResult};
pub use load::{load_definitions, DefinitionSet, Document, SourceDocument};
pub use mutation::{Mutation, MutationKind};
pub use normalize::{normalize, NORMALIZE_INDEX_NAME};
pub use plan::{Plan, PlanOptions, PlanSummary};
pub use reconcile::{get_mutations, MutationContext, MAX_REPLICA_SLOTS};
pub use sync::{export, plan_mutations, sync, validate, SyncOptions, SyncOutcome};
