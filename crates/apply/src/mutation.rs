//! Single planned changes against the index store.

use std::fmt;
use std::io;
use std::sync::Arc;

use ixsync_client::{IndexStore, StoreResult};
use ixsync_core::{CouchbaseIndex, IndexDefinition, WithClause};
use tracing::warn;

use crate::ddl::create_statement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MutationKind {
    Create,
    Update,
    Drop,
    Move,
    Resize,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Drop => "drop",
            MutationKind::Move => "move",
            MutationKind::Resize => "resize",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone)]
pub struct CreateIndexMutation {
    pub definition: Arc<IndexDefinition>,
    pub name: String,
    pub replica: u32,
    pub phase: u32,
}

/// Drop and recreate; used when the change cannot be altered in place.
#[derive(Debug, Clone)]
pub struct UpdateIndexMutation {
    pub definition: Arc<IndexDefinition>,
    pub name: String,
    pub replica: u32,
    pub phase: u32,
    pub existing: CouchbaseIndex,
}

#[derive(Debug, Clone)]
pub struct DropIndexMutation {
    pub definition: Arc<IndexDefinition>,
    pub name: String,
    pub phase: u32,
    pub existing: CouchbaseIndex,
}

#[derive(Debug, Clone)]
pub struct MoveIndexMutation {
    pub definition: Arc<IndexDefinition>,
    pub name: String,
    pub phase: u32,
    pub existing: CouchbaseIndex,
    /// Cluster predates ALTER INDEX; reported but never executed.
    pub unsupported: bool,
}

#[derive(Debug, Clone)]
pub struct ResizeIndexMutation {
    pub definition: Arc<IndexDefinition>,
    pub name: String,
    pub phase: u32,
    pub existing: CouchbaseIndex,
}

#[derive(Debug, Clone)]
pub enum Mutation {
    Create(CreateIndexMutation),
    Update(UpdateIndexMutation),
    Drop(DropIndexMutation),
    Move(MoveIndexMutation),
    Resize(ResizeIndexMutation),
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Create(_) => MutationKind::Create,
            Mutation::Update(_) => MutationKind::Update,
            Mutation::Drop(_) => MutationKind::Drop,
            Mutation::Move(_) => MutationKind::Move,
            Mutation::Resize(_) => MutationKind::Resize,
        }
    }

    pub fn definition(&self) -> &IndexDefinition {
        match self {
            Mutation::Create(m) => &m.definition,
            Mutation::Update(m) => &m.definition,
            Mutation::Drop(m) => &m.definition,
            Mutation::Move(m) => &m.definition,
            Mutation::Resize(m) => &m.definition,
        }
    }

    /// Resolved index name, including any `_replicaN` suffix.
    pub fn name(&self) -> &str {
        match self {
            Mutation::Create(m) => &m.name,
            Mutation::Update(m) => &m.name,
            Mutation::Drop(m) => &m.name,
            Mutation::Move(m) => &m.name,
            Mutation::Resize(m) => &m.name,
        }
    }

    pub fn phase(&self) -> u32 {
        match self {
            Mutation::Create(m) => m.phase,
            Mutation::Update(m) => m.phase,
            Mutation::Drop(m) => m.phase,
            Mutation::Move(m) => m.phase,
            Mutation::Resize(m) => m.phase,
        }
    }

    pub fn set_phase(&mut self, phase: u32) {
        match self {
            Mutation::Create(m) => m.phase = phase,
            Mutation::Update(m) => m.phase = phase,
            Mutation::Drop(m) => m.phase = phase,
            Mutation::Move(m) => m.phase = phase,
            Mutation::Resize(m) => m.phase = phase,
        }
    }

    /// `(scope, collection)` of the target index.
    pub fn keyspace(&self) -> (&str, &str) {
        let def = self.definition();
        (&def.scope, &def.collection)
    }

    /// Whether the mutation keeps the index queryable throughout.
    ///
    /// A drop-and-recreate is only safe when other manual replicas keep
    /// serving; drops never are.
    pub fn is_safe(&self) -> bool {
        match self {
            Mutation::Update(m) => m.definition.manual_replica && m.definition.num_replica.unwrap_or(0) > 0,
            Mutation::Drop(_) => false,
            Mutation::Create(_) | Mutation::Move(_) | Mutation::Resize(_) => true,
        }
    }

    pub async fn execute<S: IndexStore + ?Sized>(&self, store: &S) -> StoreResult<()> {
        match self {
            Mutation::Create(m) => {
                let with = m.definition.with_clause(m.replica);
                store.create_index(&create_statement(&m.definition, &m.name, store.bucket(), Some(&with))).await
            }
            Mutation::Update(m) => {
                let def = &m.definition;
                store.drop_index(&m.existing.name, &def.scope, &def.collection).await?;
                let with = def.with_clause(m.replica);
                store.create_index(&create_statement(def, &m.name, store.bucket(), Some(&with))).await
            }
            Mutation::Drop(m) => {
                let def = &m.definition;
                store.drop_index(&m.existing.name, &def.scope, &def.collection).await
            }
            Mutation::Move(m) => {
                let def = &m.definition;
                if m.unsupported {
                    warn!(index = %m.name, "cluster does not support ALTER INDEX; move skipped");
                    return Ok(());
                }
                let with = WithClause { action: Some("move".to_string()), nodes: def.nodes.clone(), ..Default::default() };
                store.alter_index(&m.existing.name, &def.scope, &def.collection, &with).await
            }
            Mutation::Resize(m) => {
                let def = &m.definition;
                let with = WithClause {
                    action: Some("replica_count".to_string()),
                    num_replica: def.num_replica,
                    nodes: def.nodes.clone(),
                    ..Default::default()
                };
                store.alter_index(&m.existing.name, &def.scope, &def.collection, &with).await
            }
        }
    }

    pub fn print(&self, out: &mut dyn io::Write) -> io::Result<()> {
        write!(out, "{}", self)
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

fn or_none(s: &str) -> &str {
    if s.is_empty() {
        "(none)"
    } else {
        s
    }
}

fn count_or_default(n: Option<u32>) -> String {
    n.map(|n| n.to_string()).unwrap_or_else(|| "(cluster default)".to_string())
}

fn describe_definition(f: &mut fmt::Formatter<'_>, def: &IndexDefinition, with: &WithClause) -> fmt::Result {
    if def.is_primary {
        writeln!(f, "      primary: true")?;
    } else {
        writeln!(f, "      key: {}", def.index_key.join(", "))?;
    }
    if !def.condition.is_empty() {
        writeln!(f, "      condition: {}", def.condition)?;
    }
    if let Some(p) = def.partition_string() {
        writeln!(f, "      partition: {}", p)?;
    }
    if let Some(nodes) = &with.nodes {
        writeln!(f, "      nodes: {}", nodes.join(", "))?;
    }
    if let Some(n) = with.num_replica {
        writeln!(f, "      num_replica: {}", n)?;
    }
    if let Some(n) = with.num_partition {
        writeln!(f, "      num_partition: {}", n)?;
    }
    if def.retain_deleted_xattr {
        writeln!(f, "      retain_deleted_xattr: true")?;
    }
    Ok(())
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (scope, collection) = self.keyspace();
        let target = format!("{}.{}.{}", scope, collection, self.name());
        match self {
            Mutation::Create(m) => {
                writeln!(f, "  + Create {} (phase {})", target, m.phase)?;
                describe_definition(f, &m.definition, &m.definition.with_clause(m.replica))
            }
            Mutation::Update(m) => {
                let def = &m.definition;
                writeln!(f, "  * Update {} (phase {}, drop and recreate)", target, m.phase)?;
                let live = &m.existing;
                if def.index_key != live.index_key {
                    writeln!(f, "      key: {} -> {}", join_or_none(&live.index_key), join_or_none(&def.index_key))?;
                }
                if def.condition != live.condition_str() {
                    writeln!(f, "      condition: {} -> {}", or_none(live.condition_str()), or_none(&def.condition))?;
                }
                let partition = def.partition_string().unwrap_or_default();
                if partition != live.partition_str() {
                    writeln!(f, "      partition: {} -> {}", or_none(live.partition_str()), or_none(&partition))?;
                }
                if def.retain_deleted_xattr != live.retain_deleted_xattr {
                    writeln!(f, "      retain_deleted_xattr: {} -> {}", live.retain_deleted_xattr, def.retain_deleted_xattr)?;
                }
                describe_definition(f, def, &def.with_clause(m.replica))
            }
            Mutation::Drop(m) => {
                writeln!(f, "  - Drop {}.{}.{} (phase {})", scope, collection, m.existing.name, m.phase)
            }
            Mutation::Move(m) => {
                writeln!(f, "  * Move {} (phase {})", target, m.phase)?;
                let wanted = m.definition.nodes.clone().unwrap_or_default();
                writeln!(f, "      nodes: {} -> {}", join_or_none(&m.existing.nodes), join_or_none(&wanted))?;
                if m.unsupported {
                    writeln!(f, "      unsupported by this cluster version; will be skipped")?;
                }
                Ok(())
            }
            Mutation::Resize(m) => {
                writeln!(f, "  * Resize {} (phase {})", target, m.phase)?;
                writeln!(
                    f,
                    "      num_replica: {} -> {}",
                    count_or_default(m.existing.num_replica),
                    count_or_default(m.definition.num_replica)
                )
            }
        }
    }
}
