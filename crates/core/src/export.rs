//! Turn live indexes back into definition documents.

use crate::index::{CouchbaseIndex, DEFAULT_COLLECTION, DEFAULT_SCOPE};
use crate::patch::{DefinitionPatch, IndexKey, PartitionPatch, PartitionStrategy};

/// Split ``HASH(`a`,lower(`b`))`` into strategy and top-level expressions.
pub fn parse_partition(rendered: &str) -> Option<(PartitionStrategy, Vec<String>)> {
    let open = rendered.find('(')?;
    let inner = rendered[open + 1..].strip_suffix(')')?;
    let strategy = match rendered[..open].trim() {
        s if s.eq_ignore_ascii_case("hash") => PartitionStrategy::Hash,
        _ => return None,
    };
    let mut exprs = Vec::new();
    let mut depth = 0i32;
    let mut quoted: Option<char> = None;
    let mut cur = String::new();
    for ch in inner.chars() {
        match (quoted, ch) {
            (Some(q), c) if c == q => quoted = None,
            (Some(_), _) => {}
            (None, '`' | '"' | '\'') => quoted = Some(ch),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth -= 1,
            (None, ',') if depth == 0 => {
                exprs.push(cur.trim().to_string());
                cur.clear();
                continue;
            }
            _ => {}
        }
        cur.push(ch);
    }
    if !cur.trim().is_empty() {
        exprs.push(cur.trim().to_string());
    }
    Some((strategy, exprs))
}

/// Definition document for a live index.
///
/// `replicas` are the live `name_replicaN` copies of a manually replicated
/// index, in replica order; when present the result is a manual-replica
/// definition pinned to every copy's node.
pub fn patch_from_live(live: &CouchbaseIndex, replicas: &[&CouchbaseIndex]) -> DefinitionPatch {
    let mut patch = DefinitionPatch::named(live.name.clone());
    if live.scope != DEFAULT_SCOPE || live.collection != DEFAULT_COLLECTION {
        patch.scope = Some(live.scope.clone());
        patch.collection = Some(live.collection.clone());
    }
    if live.is_primary {
        patch.is_primary = Some(true);
    } else {
        patch.index_key = Some(IndexKey::Many(live.index_key.clone()));
    }
    if let Some(cond) = live.condition.as_ref().filter(|c| !c.is_empty()) {
        patch.condition = Some(cond.clone());
    }
    if let Some((strategy, exprs)) = live.partition.as_deref().and_then(parse_partition) {
        patch.partition = Some(Some(PartitionPatch {
            exprs: Some(exprs),
            strategy: Some(strategy),
            num_partition: live.num_partition.map(Some),
        }));
    }
    if live.retain_deleted_xattr {
        patch.retain_deleted_xattr = Some(true);
    }

    if !replicas.is_empty() {
        let nodes: Vec<String> = std::iter::once(live)
            .chain(replicas.iter().copied())
            .filter_map(|i| i.nodes.first().cloned())
            .collect();
        patch.manual_replica = Some(true);
        if nodes.len() == replicas.len() + 1 {
            patch.nodes = Some(Some(nodes));
        } else {
            patch.num_replica = Some(Some(replicas.len() as u32));
        }
    } else if !live.nodes.is_empty() && (live.partition.is_some() || live.num_replica.map(|n| n as usize + 1) == Some(live.nodes.len())) {
        patch.nodes = Some(Some(live.nodes.clone()));
        if live.partition.is_some() {
            patch.num_replica = live.num_replica.map(Some);
        }
    } else if let Some(n) = live.num_replica {
        patch.num_replica = Some(Some(n));
    }
    patch
}
