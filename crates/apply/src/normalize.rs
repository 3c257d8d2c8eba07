use ixsync_client::IndexStore;
use ixsync_core::{IndexDefinition, Partition, PartitionStrategy};
use tracing::debug;

use crate::ddl::create_statement;
use crate::error::{SyncError, SyncResult};

/// Reserved name used for dry-run statements; never created.
pub const NORMALIZE_INDEX_NAME: &str = "__ixsync_normalize";

/// Replace keys, condition and partition expressions with the store's
/// canonical rendering so they compare equal to live indexes.
///
/// Primary and drop-marked definitions are left alone. `num_partition` is
/// kept from the definition since the plan never echoes it.
pub async fn normalize<S: IndexStore + ?Sized>(def: &mut IndexDefinition, store: &S) -> SyncResult<()> {
    if def.is_primary || def.lifecycle.drop {
        return Ok(());
    }
    let statement = create_statement(def, NORMALIZE_INDEX_NAME, store.bucket(), None);
    let plan = store
        .explain_create(&statement)
        .await
        .map_err(|source| SyncError::InvalidDefinition { name: def.name.clone(), source })?;
    debug!(index = %def.name, keys = ?plan.keys, "normalized definition");

    def.index_key = plan.keys;
    def.condition = plan.condition.unwrap_or_default();
    if let Some(p) = plan.partition {
        let previous = def.partition.take();
        def.partition = Some(Partition {
            exprs: p.exprs,
            strategy: if p.strategy.eq_ignore_ascii_case("hash") {
                PartitionStrategy::Hash
            } else {
                previous.as_ref().map(|x| x.strategy).unwrap_or_default()
            },
            num_partition: previous.and_then(|x| x.num_partition),
        });
    }
    Ok(())
}
