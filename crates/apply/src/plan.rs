//! Phased execution of mutations.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::time::{Duration, Instant};

use ixsync_client::IndexStore;
use metrics::{counter, histogram};
use tracing::{error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::mutation::{Mutation, MutationKind};

#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Pause after each phase before triggering builds.
    pub settle_delay: Duration,
    /// Per-keyspace limit on waiting for indexes to come online.
    pub build_timeout: Duration,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self { settle_delay: Duration::from_millis(2000), build_timeout: Duration::from_secs(300) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub executed: usize,
    pub phases: usize,
}

pub struct Plan<'a, S: IndexStore + ?Sized> {
    store: &'a S,
    mutations: Vec<Mutation>,
    options: PlanOptions,
}

impl<'a, S: IndexStore + ?Sized> Plan<'a, S> {
    pub fn new(store: &'a S, mut mutations: Vec<Mutation>, options: PlanOptions) -> Self {
        mutations.sort_by_key(Mutation::phase);
        Self { store, mutations, options }
    }

    pub fn is_empty(&self) -> bool { self.mutations.is_empty() }

    pub fn mutations(&self) -> &[Mutation] { &self.mutations }

    /// Mutations grouped by ascending phase, in plan order within a phase.
    pub fn phases(&self) -> BTreeMap<u32, Vec<&Mutation>> {
        let mut phases: BTreeMap<u32, Vec<&Mutation>> = BTreeMap::new();
        for m in &self.mutations {
            phases.entry(m.phase()).or_default().push(m);
        }
        phases
    }

    pub fn print(&self, out: &mut dyn io::Write) -> io::Result<()> {
        for (phase, mutations) in self.phases() {
            writeln!(out, "Phase {}", phase)?;
            for m in mutations {
                m.print(out)?;
            }
        }
        Ok(())
    }

    /// Run every phase in order. Errors within a phase do not stop that
    /// phase, but once any error is recorded later phases are skipped.
    pub async fn execute(&self) -> SyncResult<PlanSummary> {
        let phases = self.phases();
        let mut errors = 0usize;
        let mut skipped = 0usize;
        let mut executed = 0usize;

        for (phase, mutations) in &phases {
            if errors > 0 {
                skipped += mutations.len();
                continue;
            }
            info!(phase = *phase, count = mutations.len(), "executing phase");
            let started = Instant::now();
            for m in mutations {
                let kind = m.kind();
                info!(phase = *phase, kind = %kind, index = %m.name(), "executing mutation");
                match m.execute(self.store).await {
                    Ok(()) => {
                        executed += 1;
                        counter!("ixsync_mutations_total", 1u64, "kind" => kind.as_str());
                    }
                    Err(e) => {
                        errors += 1;
                        counter!("ixsync_mutation_errors_total", 1u64, "kind" => kind.as_str());
                        error!(phase = *phase, kind = %kind, index = %m.name(), error = %e, "mutation failed");
                    }
                }
            }
            self.build_phase(*phase, mutations).await;
            histogram!("ixsync_phase_ms", started.elapsed().as_secs_f64() * 1000.0);
        }

        if skipped > 0 {
            counter!("ixsync_mutations_skipped_total", skipped as u64);
            warn!(skipped, "skipped remaining phases after errors");
        }
        if errors > 0 {
            return Err(SyncError::PlanFailure { errors, skipped });
        }
        Ok(PlanSummary { executed, phases: phases.len() })
    }

    /// Trigger deferred builds and wait for the phase's keyspaces to settle.
    async fn build_phase(&self, phase: u32, mutations: &[&Mutation]) {
        tokio::time::sleep(self.options.settle_delay).await;
        let keyspaces: BTreeSet<(String, String)> = mutations
            .iter()
            .filter(|m| m.kind() != MutationKind::Drop)
            .map(|m| {
                let (scope, collection) = m.keyspace();
                (scope.to_string(), collection.to_string())
            })
            .collect();

        for (scope, collection) in &keyspaces {
            match self.store.build_deferred_indexes(scope, collection).await {
                Ok(names) if !names.is_empty() => info!(phase, scope = %scope, collection = %collection, indexes = ?names, "building"),
                Ok(_) => {}
                Err(e) => warn!(phase, scope = %scope, collection = %collection, error = %e, "build trigger failed"),
            }
            let tick = || info!(phase, scope = %scope, collection = %collection, "waiting for indexes to come online");
            match self.store.wait_until_online(scope, collection, self.options.build_timeout, &tick).await {
                Ok(true) => {}
                Ok(false) => {
                    counter!("ixsync_phase_build_timeouts_total", 1u64);
                    warn!(
                        phase,
                        scope = %scope,
                        collection = %collection,
                        timeout_secs = self.options.build_timeout.as_secs(),
                        "timed out waiting for indexes to build"
                    );
                }
                Err(e) => warn!(phase, scope = %scope, collection = %collection, error = %e, "wait for build failed"),
            }
        }
    }
}
