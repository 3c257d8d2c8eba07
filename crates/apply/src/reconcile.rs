//! Diff one definition against the live indexes and produce phased mutations.

use std::sync::Arc;

use ixsync_core::{ClusterVersion, CouchbaseIndex, IndexDefinition};

use crate::mutation::{
    CreateIndexMutation, DropIndexMutation, MoveIndexMutation, Mutation, ResizeIndexMutation, UpdateIndexMutation,
};

/// Replica slots above `num_replica` are scanned up to this bound for
/// leftover copies to drop.
pub const MAX_REPLICA_SLOTS: u32 = 10;

/// Everything reconciliation needs to know about the cluster. Fetched once
/// per sync run and shared across definitions.
#[derive(Debug, Clone, Default)]
pub struct MutationContext {
    pub current_indexes: Vec<CouchbaseIndex>,
    pub cluster_version: Option<ClusterVersion>,
    pub is_secure: bool,
}

impl MutationContext {
    fn supports_alter_index(&self) -> bool {
        self.cluster_version.map(|v| v.supports_alter_index()).unwrap_or(true)
    }

    fn supports_replica_count(&self) -> bool {
        self.cluster_version.map(|v| v.supports_replica_count()).unwrap_or(false)
    }

    fn find(&self, def: &IndexDefinition, name: &str, replica: u32) -> Option<&CouchbaseIndex> {
        let mut in_keyspace = self.current_indexes.iter().filter(|i| i.in_keyspace(&def.scope, &def.collection));
        let exact = in_keyspace.clone().find(|i| i.name == name);
        if exact.is_some() || replica != 0 || !def.is_primary {
            return exact;
        }
        in_keyspace.find(|i| i.is_primary)
    }
}

/// Mutations needed to bring the live state in line with `def`, with phases
/// assigned.
///
/// Normalizes `def`'s node list first, so repeated calls with the same
/// context are stable.
pub fn get_mutations(def: &mut IndexDefinition, ctx: &MutationContext) -> std::vec::IntoIter<Mutation> {
    def.normalize_node_list(&ctx.current_indexes, ctx.is_secure);
    let def = Arc::new(def.clone());

    let mut out = Vec::new();
    if def.manual_replica {
        let wanted = def.num_replica.unwrap_or(0);
        for replica in 0..=wanted {
            out.extend(slot_mutation(&def, ctx, replica, false));
        }
        for replica in wanted + 1..=MAX_REPLICA_SLOTS {
            out.extend(slot_mutation(&def, ctx, replica, true));
        }
    } else {
        out.extend(slot_mutation(&def, ctx, 0, false));
    }
    assign_phases(&mut out);
    out.into_iter()
}

fn slot_mutation(def: &Arc<IndexDefinition>, ctx: &MutationContext, replica: u32, force_drop: bool) -> Option<Mutation> {
    let name = def.index_name(replica);
    let drop = def.lifecycle.drop || force_drop;

    let Some(live) = ctx.find(def, &name, replica) else {
        if drop {
            return None;
        }
        return Some(Mutation::Create(CreateIndexMutation { definition: def.clone(), name, replica, phase: 0 }));
    };
    let existing = live.clone();

    if drop {
        return Some(Mutation::Drop(DropIndexMutation { definition: def.clone(), name, phase: 0, existing }));
    }
    if !def.is_primary && def.requires_update(live) {
        return Some(Mutation::Update(UpdateIndexMutation { definition: def.clone(), name, replica, phase: 0, existing }));
    }
    if !def.manual_replica {
        if let (Some(wanted), Some(have)) = (def.num_replica, live.num_replica) {
            if wanted != have {
                return Some(if ctx.supports_replica_count() {
                    Mutation::Resize(ResizeIndexMutation { definition: def.clone(), name, phase: 0, existing })
                } else {
                    Mutation::Update(UpdateIndexMutation { definition: def.clone(), name, replica, phase: 0, existing })
                });
            }
        }
    }
    if nodes_differ(def, live, replica) {
        return Some(if def.manual_replica {
            Mutation::Update(UpdateIndexMutation { definition: def.clone(), name, replica, phase: 0, existing })
        } else {
            Mutation::Move(MoveIndexMutation {
                definition: def.clone(),
                name,
                phase: 0,
                existing,
                unsupported: !ctx.supports_alter_index(),
            })
        });
    }
    None
}

/// Only compared when the definition pins nodes; order is irrelevant.
fn nodes_differ(def: &IndexDefinition, live: &CouchbaseIndex, replica: u32) -> bool {
    let Some(nodes) = &def.nodes else { return false };
    if def.manual_replica {
        return match nodes.get(replica as usize) {
            Some(wanted) => live.nodes.first() != Some(wanted),
            None => false,
        };
    }
    let mut wanted = nodes.clone();
    wanted.sort();
    let mut have = live.nodes.clone();
    have.sort();
    wanted != have
}

/// Creates run first, each update gets its own phase after that, and
/// everything else shares the final phase.
fn assign_phases(mutations: &mut [Mutation]) {
    let mut last = 0;
    for m in mutations.iter_mut().filter(|m| matches!(m, Mutation::Create(_))) {
        m.set_phase(1);
        last = 1;
    }
    for m in mutations.iter_mut().filter(|m| matches!(m, Mutation::Update(_))) {
        last = last.max(1) + 1;
        m.set_phase(last);
    }
    let final_phase = last + 1;
    for m in mutations.iter_mut().filter(|m| !matches!(m, Mutation::Create(_) | Mutation::Update(_))) {
        m.set_phase(final_phase);
    }
}
