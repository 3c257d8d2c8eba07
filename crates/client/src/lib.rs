//! ixsync client: the index store interface and its cluster implementation.

#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use ixsync_core::{ClusterVersion, CouchbaseIndex, WithClause};

pub mod couchbase;
pub mod error;
pub mod explain;
pub mod n1ql;
pub mod status;
pub mod version;

pub use couchbase::{CouchbaseStore, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use explain::{ExplainPartition, ExplainPlan};

/// Poll interval used while waiting for indexes to come online.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// How often `wait_until_online` reports that it is still waiting.
pub const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Everything the sync engine needs from the cluster. Bound to one bucket.
#[async_trait]
pub trait IndexStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Live indexes with node placement and replica counts.
    async fn list_indexes(&self) -> StoreResult<Vec<CouchbaseIndex>>;

    async fn cluster_version(&self) -> StoreResult<ClusterVersion>;

    async fn create_index(&self, statement: &str) -> StoreResult<()>;

    async fn alter_index(&self, name: &str, scope: &str, collection: &str, with: &WithClause) -> StoreResult<()>;

    async fn drop_index(&self, name: &str, scope: &str, collection: &str) -> StoreResult<()>;

    /// Dry-run a CREATE INDEX statement; must not create anything.
    async fn explain_create(&self, statement: &str) -> StoreResult<ExplainPlan>;

    /// Kick off BUILD INDEX for deferred/pending indexes; returns their names.
    async fn build_deferred_indexes(&self, scope: &str, collection: &str) -> StoreResult<Vec<String>>;

    /// `Ok(false)` on timeout.
    async fn wait_until_online(
        &self,
        scope: &str,
        collection: &str,
        timeout: Duration,
        on_tick: &(dyn Fn() + Send + Sync),
    ) -> StoreResult<bool>;
}
