//! Top-level operations: sync, validate and export.

use std::collections::BTreeMap;
use std::io;

use ixsync_client::IndexStore;
use ixsync_core::export::patch_from_live;
use ixsync_core::{CouchbaseIndex, DefinitionPatch, IndexDefinition};
use tracing::{info, warn};

use crate::error::SyncResult;
use crate::mutation::Mutation;
use crate::normalize::normalize;
use crate::plan::{Plan, PlanOptions, PlanSummary};
use crate::reconcile::{get_mutations, MutationContext};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Leave out mutations that would make an index unavailable.
    pub safe: bool,
    /// Print the plan without executing it.
    pub dry_run: bool,
    /// Node lists default to the secure management port.
    pub is_secure: bool,
    pub plan: PlanOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub planned: usize,
    pub skipped_unsafe: usize,
    /// `None` when nothing was executed.
    pub summary: Option<PlanSummary>,
}

/// Normalize every definition and diff it against one snapshot of the
/// cluster.
pub async fn plan_mutations<S: IndexStore + ?Sized>(
    store: &S,
    definitions: &mut [IndexDefinition],
    is_secure: bool,
) -> SyncResult<Vec<Mutation>> {
    let cluster_version = store.cluster_version().await?;
    let current_indexes = store.list_indexes().await?;
    info!(bucket = %store.bucket(), version = %cluster_version, live = current_indexes.len(), "fetched cluster state");

    for def in definitions.iter_mut() {
        normalize(def, store).await?;
    }
    let ctx = MutationContext { current_indexes, cluster_version: Some(cluster_version), is_secure };
    let mut mutations = Vec::new();
    for def in definitions.iter_mut() {
        mutations.extend(get_mutations(def, &ctx));
    }
    Ok(mutations)
}

pub async fn sync<S: IndexStore + ?Sized>(
    store: &S,
    mut definitions: Vec<IndexDefinition>,
    options: &SyncOptions,
    out: &mut (dyn io::Write + Send),
) -> SyncResult<SyncOutcome> {
    let mutations = plan_mutations(store, &mut definitions, options.is_secure).await?;

    let (mutations, unsafe_mutations): (Vec<_>, Vec<_>) = if options.safe {
        mutations.into_iter().partition(Mutation::is_safe)
    } else {
        (mutations, Vec::new())
    };
    for m in &unsafe_mutations {
        warn!(kind = %m.kind(), index = %m.name(), "skipping unsafe mutation");
    }

    let plan = Plan::new(store, mutations, options.plan.clone());
    let mut outcome = SyncOutcome {
        planned: plan.mutations().len(),
        skipped_unsafe: unsafe_mutations.len(),
        summary: None,
    };
    if plan.is_empty() {
        writeln!(out, "No index changes required.")?;
        return Ok(outcome);
    }
    plan.print(out)?;
    if options.dry_run {
        writeln!(out, "Dry run; no changes made.")?;
        return Ok(outcome);
    }
    outcome.summary = Some(plan.execute().await?);
    Ok(outcome)
}

/// Definitions are already structurally valid once loaded; with a store,
/// also have the query service accept each one.
pub async fn validate<S: IndexStore + ?Sized>(store: Option<&S>, definitions: &mut [IndexDefinition]) -> SyncResult<()> {
    let Some(store) = store else { return Ok(()) };
    for def in definitions.iter_mut() {
        normalize(def, store).await?;
    }
    Ok(())
}

/// Definition documents describing every live index in the store's bucket.
/// Manual `_replicaN` copies are folded into their base definition.
pub async fn export<S: IndexStore + ?Sized>(store: &S) -> SyncResult<Vec<DefinitionPatch>> {
    let live = store.list_indexes().await?;
    Ok(export_indexes(&live))
}

pub fn export_indexes(live: &[CouchbaseIndex]) -> Vec<DefinitionPatch> {
    let mut bases: BTreeMap<(&str, &str, &str), &CouchbaseIndex> = BTreeMap::new();
    for idx in live {
        bases.insert((idx.scope.as_str(), idx.collection.as_str(), idx.name.as_str()), idx);
    }
    let mut replicas: BTreeMap<(&str, &str, &str), BTreeMap<u32, &CouchbaseIndex>> = BTreeMap::new();
    let mut folded = Vec::new();
    for idx in live {
        if let Some((base, n)) = replica_of(&idx.name) {
            let key = (idx.scope.as_str(), idx.collection.as_str(), base);
            if bases.contains_key(&key) {
                replicas.entry(key).or_default().insert(n, idx);
                folded.push((idx.scope.as_str(), idx.collection.as_str(), idx.name.as_str()));
            }
        }
    }
    for key in folded {
        bases.remove(&key);
    }
    bases
        .into_iter()
        .map(|(key, idx)| {
            let copies: Vec<&CouchbaseIndex> = replicas.get(&key).map(|r| r.values().copied().collect()).unwrap_or_default();
            patch_from_live(idx, &copies)
        })
        .collect()
}

/// `("idx", 2)` for `idx_replica2`.
fn replica_of(name: &str) -> Option<(&str, u32)> {
    let (base, n) = name.rsplit_once("_replica")?;
    if base.is_empty() || n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    n.parse::<u32>().ok().filter(|n| *n > 0).map(|n| (base, n))
}
