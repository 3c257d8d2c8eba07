//! Desired state of one index, with override merging and invariants.

use serde::Serialize;

use crate::error::{ValidationError, ValidationResult};
use crate::hooks::HookRegistry;
use crate::index::{CouchbaseIndex, WithClause, DEFAULT_COLLECTION, DEFAULT_SCOPE};
use crate::patch::{DefinitionPatch, PartitionPatch, PartitionStrategy};

pub const DEFAULT_PORT: u16 = 8091;
pub const DEFAULT_SECURE_PORT: u16 = 18091;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub exprs: Vec<String>,
    pub strategy: PartitionStrategy,
    /// Creation-time only; never echoed back by the query planner.
    pub num_partition: Option<u32>,
}

impl Partition {
    /// Same shape the store reports, e.g. ``HASH(`a`,`b`)``.
    pub fn render(&self) -> String {
        format!("{}({})", self.strategy.as_str(), self.exprs.join(","))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Lifecycle {
    pub drop: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDefinition {
    pub name: String,
    pub scope: String,
    pub collection: String,
    pub is_primary: bool,
    pub index_key: Vec<String>,
    pub condition: String,
    pub partition: Option<Partition>,
    pub manual_replica: bool,
    /// `None` lets the store pick; never coerced to zero.
    pub num_replica: Option<u32>,
    pub nodes: Option<Vec<String>>,
    pub retain_deleted_xattr: bool,
    pub lifecycle: Lifecycle,
}

impl IndexDefinition {
    /// Build a fully defaulted, validated definition.
    pub fn new(patch: &DefinitionPatch, hooks: &HookRegistry) -> ValidationResult<Self> {
        let name = patch
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| ValidationError::new("name is required"))?;
        let mut def = Self {
            name,
            scope: DEFAULT_SCOPE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            is_primary: false,
            index_key: Vec::new(),
            condition: String::new(),
            partition: None,
            manual_replica: false,
            num_replica: None,
            nodes: None,
            retain_deleted_xattr: false,
            lifecycle: Lifecycle::default(),
        };
        def.apply_override(patch, hooks, true)?;
        Ok(def)
    }

    /// Merge `patch` into this definition and re-validate.
    ///
    /// With `apply_missing`, fields absent from the patch are reset to their
    /// defaults; otherwise only fields present in the patch are touched. On
    /// error the definition may be left half-merged and must be discarded.
    pub fn apply_override(&mut self, patch: &DefinitionPatch, hooks: &HookRegistry, apply_missing: bool) -> ValidationResult<()> {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        merge_scalar(&mut self.scope, &patch.scope, apply_missing, || DEFAULT_SCOPE.to_string());
        merge_scalar(&mut self.collection, &patch.collection, apply_missing, || DEFAULT_COLLECTION.to_string());
        merge_scalar(&mut self.is_primary, &patch.is_primary, apply_missing, || false);

        match &patch.index_key {
            Some(key) => self.index_key = key.clone().into_vec(),
            None if apply_missing => self.index_key = Vec::new(),
            None => {}
        }
        merge_scalar(&mut self.condition, &patch.condition, apply_missing, String::new);

        match &patch.partition {
            Some(None) => self.partition = None,
            Some(Some(p)) => self.merge_partition(p),
            None if apply_missing => self.partition = None,
            None => {}
        }
        merge_scalar(&mut self.manual_replica, &patch.manual_replica, apply_missing, || false);

        match &patch.nodes {
            Some(nodes) => {
                self.nodes = nodes.clone();
                if self.partition.is_none() {
                    if let Some(n) = &self.nodes {
                        self.num_replica = Some(n.len().saturating_sub(1) as u32);
                    }
                }
            }
            None if apply_missing => self.nodes = None,
            None => {}
        }
        match &patch.num_replica {
            Some(n) => self.num_replica = *n,
            None if apply_missing => {
                self.num_replica = match (&self.partition, &self.nodes) {
                    (None, Some(nodes)) => Some(nodes.len().saturating_sub(1) as u32),
                    _ => None,
                };
            }
            None => {}
        }

        merge_scalar(&mut self.retain_deleted_xattr, &patch.retain_deleted_xattr, apply_missing, || false);
        match &patch.lifecycle {
            Some(l) => {
                if let Some(drop) = l.drop {
                    self.lifecycle.drop = drop;
                }
            }
            None if apply_missing => self.lifecycle = Lifecycle::default(),
            None => {}
        }

        if let Some(hook) = &patch.post_process {
            hooks.run(hook, self)?;
        }

        self.validate()
    }

    fn merge_partition(&mut self, p: &PartitionPatch) {
        let mut merged = self.partition.take().unwrap_or(Partition {
            exprs: Vec::new(),
            strategy: PartitionStrategy::Hash,
            num_partition: None,
        });
        if let Some(exprs) = &p.exprs {
            merged.exprs = exprs.clone();
        }
        if let Some(strategy) = p.strategy {
            merged.strategy = strategy;
        }
        if let Some(n) = p.num_partition {
            merged.num_partition = n;
        }
        self.partition = Some(merged);
    }

    /// Whole-object invariants.
    pub fn validate(&self) -> ValidationResult<()> {
        let fail = |msg: &str| Err(ValidationError::for_index(self.name.clone(), msg));

        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name is required"));
        }
        if self.scope.is_empty() || self.collection.is_empty() {
            return fail("scope and collection must not be empty");
        }
        if self.scope != DEFAULT_SCOPE && self.collection == DEFAULT_COLLECTION {
            return fail("collection is required when scope is set");
        }
        if self.collection != DEFAULT_COLLECTION && self.scope == DEFAULT_SCOPE {
            return fail("scope is required when collection is set");
        }
        if self.is_primary {
            if !self.index_key.is_empty() {
                return fail("primary index may not have an index_key");
            }
            if !self.condition.is_empty() {
                return fail("primary index may not have a condition");
            }
        } else if !self.lifecycle.drop && self.index_key.is_empty() {
            return fail("index_key must include at least one key");
        }
        if let Some(p) = &self.partition {
            if self.manual_replica {
                return fail("manual_replica is not supported on partitioned indexes");
            }
            if p.exprs.is_empty() {
                return fail("partition.exprs must include at least one expression");
            }
            if p.num_partition == Some(0) {
                return fail("partition.num_partition must be at least 1");
            }
        }
        if let Some(nodes) = &self.nodes {
            if nodes.iter().any(|n| n.trim().is_empty()) {
                return fail("nodes may not contain empty entries");
            }
            if self.partition.is_none() && nodes.len() != self.num_replica.unwrap_or(0) as usize + 1 {
                return fail("nodes list must be one longer than num_replica");
            }
        }
        Ok(())
    }

    /// `name` for replica 0, `name_replica{N}` otherwise.
    pub fn index_name(&self, replica: u32) -> String {
        if replica == 0 {
            self.name.clone()
        } else {
            format!("{}_replica{}", self.name, replica)
        }
    }

    pub fn is_same_index(&self, live: &CouchbaseIndex, name: &str) -> bool {
        live.in_keyspace(&self.scope, &self.collection) && live.name == name
    }

    pub fn partition_string(&self) -> Option<String> {
        self.partition.as_ref().map(Partition::render)
    }

    /// Differences that can only be applied by dropping and recreating.
    pub fn requires_update(&self, live: &CouchbaseIndex) -> bool {
        if self.condition != live.condition_str() || self.index_key != live.index_key {
            return true;
        }
        if self.partition_string().as_deref().unwrap_or("") != live.partition_str() {
            return true;
        }
        if let Some(n) = self.partition.as_ref().and_then(|p| p.num_partition) {
            if live.num_partition != Some(n) {
                return true;
            }
        }
        self.retain_deleted_xattr != live.retain_deleted_xattr
    }

    /// Creation parameters for the given replica slot.
    pub fn with_clause(&self, replica: u32) -> WithClause {
        let mut with = WithClause { defer_build: Some(true), ..Default::default() };
        if self.manual_replica {
            with.nodes = self
                .nodes
                .as_ref()
                .and_then(|nodes| nodes.get(replica as usize))
                .map(|n| vec![n.clone()]);
        } else {
            with.nodes = self.nodes.clone();
            with.num_replica = self.num_replica;
        }
        if let Some(p) = &self.partition {
            with.num_partition = p.num_partition;
        }
        if self.retain_deleted_xattr {
            with.retain_deleted_xattr = Some(true);
        }
        with
    }

    /// Add default ports, sort, and for manual replicas keep each replica on
    /// the node it already lives on when that node is still wanted.
    pub fn normalize_node_list(&mut self, current: &[CouchbaseIndex], is_secure: bool) {
        let Some(nodes) = self.nodes.take() else { return };
        let port = if is_secure { DEFAULT_SECURE_PORT } else { DEFAULT_PORT };
        let mut nodes: Vec<String> = nodes.iter().map(|n| with_default_port(n, port)).collect();
        nodes.sort();

        if !self.manual_replica {
            self.nodes = Some(nodes);
            return;
        }

        let slots = self.num_replica.unwrap_or(0) as usize + 1;
        let mut unused = nodes;
        let mut assigned: Vec<Option<String>> = vec![None; slots];
        for (replica, slot) in assigned.iter_mut().enumerate() {
            let name = self.index_name(replica as u32);
            let live_node = current
                .iter()
                .find(|i| self.is_same_index(i, &name))
                .and_then(|i| i.nodes.first());
            if let Some(node) = live_node {
                if let Some(pos) = unused.iter().position(|n| n == node) {
                    *slot = Some(unused.remove(pos));
                }
            }
        }
        let mut rest = unused.into_iter();
        self.nodes = Some(assigned.into_iter().filter_map(|slot| slot.or_else(|| rest.next())).collect());
    }
}

fn merge_scalar<T: Clone>(field: &mut T, value: &Option<T>, apply_missing: bool, default: impl FnOnce() -> T) {
    match value {
        Some(v) => *field = v.clone(),
        None if apply_missing => *field = default(),
        None => {}
    }
}

fn has_port(node: &str) -> bool {
    match node.strip_prefix('[') {
        Some(rest) => rest.contains("]:"),
        None => node.contains(':'),
    }
}

/// Append `:port` unless the node already names one.
pub fn with_default_port(node: &str, port: u16) -> String {
    if has_port(node) {
        node.to_string()
    } else {
        format!("{}:{}", node, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexState;
    use serde_json::json;

    fn build(v: serde_json::Value) -> ValidationResult<IndexDefinition> {
        IndexDefinition::new(&DefinitionPatch::from_json(v).expect("patch"), &HookRegistry::new())
    }

    fn patch(v: serde_json::Value) -> DefinitionPatch {
        DefinitionPatch::from_json(v).expect("patch")
    }

    fn live(name: &str, nodes: &[&str]) -> CouchbaseIndex {
        CouchbaseIndex {
            name: name.to_string(),
            scope: "_default".into(),
            collection: "_default".into(),
            is_primary: false,
            index_key: vec!["`type`".into()],
            condition: None,
            partition: None,
            num_partition: None,
            nodes: nodes.iter().map(|s| s.to_string()).collect(),
            num_replica: Some(0),
            retain_deleted_xattr: false,
            state: IndexState::Online,
        }
    }

    #[test]
    fn constructs_with_defaults() {
        let d = build(json!({ "name": "idx1", "index_key": "`type`" })).unwrap();
        assert_eq!(d.scope, "_default");
        assert_eq!(d.collection, "_default");
        assert_eq!(d.index_key, vec!["`type`"]);
        assert_eq!(d.condition, "");
        assert_eq!(d.num_replica, None);
        assert!(!d.manual_replica && !d.lifecycle.drop);
    }

    #[test]
    fn name_is_required() {
        assert!(build(json!({ "index_key": "a" })).is_err());
        assert!(build(json!({ "name": "", "index_key": "a" })).is_err());
    }

    #[test]
    fn primary_rejects_keys_and_condition() {
        assert!(build(json!({ "name": "p", "is_primary": true })).is_ok());
        let e = build(json!({ "name": "p", "is_primary": true, "index_key": "a" })).unwrap_err();
        assert_eq!(e.index.as_deref(), Some("p"));
        assert!(build(json!({ "name": "p", "is_primary": true, "condition": "a = 1" })).is_err());
    }

    #[test]
    fn non_primary_needs_key_unless_dropped() {
        assert!(build(json!({ "name": "a" })).is_err());
        assert!(build(json!({ "name": "a", "lifecycle": { "drop": true } })).is_ok());
    }

    #[test]
    fn partition_and_manual_replica_conflict() {
        let e = build(json!({
            "name": "a", "index_key": "k", "manual_replica": true,
            "partition": { "exprs": ["k"] }
        }))
        .unwrap_err();
        assert!(e.message.contains("manual_replica"));
    }

    #[test]
    fn scope_and_collection_are_set_together() {
        assert!(build(json!({ "name": "a", "index_key": "k", "scope": "inventory" })).is_err());
        let e = build(json!({ "name": "a", "index_key": "k", "collection": "hotel" })).unwrap_err();
        assert!(e.message.contains("scope is required"), "{}", e);
        assert!(build(json!({ "name": "a", "index_key": "k", "scope": "inventory", "collection": "hotel" })).is_ok());
    }

    #[test]
    fn nodes_infer_num_replica() {
        let d = build(json!({ "name": "a", "index_key": "k", "nodes": ["n1", "n2"] })).unwrap();
        assert_eq!(d.num_replica, Some(1));
        assert!(build(json!({ "name": "a", "index_key": "k", "nodes": ["n1", "n2"], "num_replica": 2 })).is_err());
    }

    #[test]
    fn partitioned_nodes_are_decoupled_from_replicas() {
        let d = build(json!({
            "name": "a", "index_key": "k", "nodes": ["n1", "n2", "n3"], "num_replica": 0,
            "partition": { "exprs": ["k"], "num_partition": 8 }
        }))
        .unwrap();
        assert_eq!(d.num_replica, Some(0));
        assert_eq!(d.nodes.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn num_replica_stays_unspecified() {
        let mut d = build(json!({ "name": "a", "index_key": "k" })).unwrap();
        assert_eq!(d.num_replica, None);
        d.apply_override(&patch(json!({ "condition": "x = 1" })), &HookRegistry::new(), false).unwrap();
        assert_eq!(d.num_replica, None);
    }

    #[test]
    fn empty_override_is_noop() {
        let mut d = build(json!({
            "name": "a", "index_key": ["k", "j"], "condition": "k > 1", "nodes": ["n1:9000", "n2"],
            "retain_deleted_xattr": true
        }))
        .unwrap();
        let before = d.clone();
        d.apply_override(&DefinitionPatch::default(), &HookRegistry::new(), false).unwrap();
        assert_eq!(d, before);
    }

    #[test]
    fn partition_override_merges_and_clears() {
        let hooks = HookRegistry::new();
        let mut d = build(json!({
            "name": "a", "index_key": "k", "partition": { "exprs": ["k"], "num_partition": 8 }
        }))
        .unwrap();
        d.apply_override(&patch(json!({ "partition": { "exprs": ["meta().id"] } })), &hooks, false).unwrap();
        let p = d.partition.clone().unwrap();
        assert_eq!(p.exprs, vec!["meta().id"]);
        assert_eq!(p.num_partition, Some(8));

        d.apply_override(&patch(json!({ "partition": null })), &hooks, false).unwrap();
        assert_eq!(d.partition, None);
    }

    #[test]
    fn nodes_override_recomputes_replicas() {
        let mut d = build(json!({ "name": "a", "index_key": "k", "nodes": ["n1"] })).unwrap();
        assert_eq!(d.num_replica, Some(0));
        d.apply_override(&patch(json!({ "nodes": ["n1", "n2", "n3"] })), &HookRegistry::new(), false).unwrap();
        assert_eq!(d.num_replica, Some(2));
    }

    #[test]
    fn lifecycle_is_merged() {
        let mut d = build(json!({ "name": "a", "index_key": "k" })).unwrap();
        d.apply_override(&patch(json!({ "lifecycle": { "drop": true } })), &HookRegistry::new(), false).unwrap();
        assert!(d.lifecycle.drop);
        d.apply_override(&patch(json!({ "lifecycle": {} })), &HookRegistry::new(), false).unwrap();
        assert!(d.lifecycle.drop);
    }

    #[test]
    fn post_process_hook_runs_before_validation() {
        let mut hooks = HookRegistry::new();
        hooks.register("add_type_key", |d: &mut IndexDefinition| {
            d.index_key.push("`type`".to_string());
            Ok(())
        });
        let d = IndexDefinition::new(&patch(json!({ "name": "a", "post_process": "add_type_key" })), &hooks).unwrap();
        assert_eq!(d.index_key, vec!["`type`"]);

        let e = IndexDefinition::new(&patch(json!({ "name": "a", "index_key": "k", "post_process": "missing" })), &hooks).unwrap_err();
        assert!(e.message.contains("unknown post_process"));
    }

    #[test]
    fn node_list_gets_ports_and_sorted() {
        let mut d = build(json!({ "name": "a", "index_key": "k", "nodes": ["b", "a:9000", "[::1]"] })).unwrap();
        d.normalize_node_list(&[], false);
        assert_eq!(d.nodes.unwrap(), vec!["[::1]:8091", "a:9000", "b:8091"]);

        let mut s = build(json!({ "name": "a", "index_key": "k", "nodes": ["b"] })).unwrap();
        s.normalize_node_list(&[], true);
        assert_eq!(s.nodes.unwrap(), vec!["b:18091"]);
    }

    #[test]
    fn manual_replica_nodes_stay_on_live_slots() {
        let mut d = build(json!({
            "name": "a", "index_key": "`type`", "manual_replica": true, "nodes": ["x", "y", "z"]
        }))
        .unwrap();
        let current = vec![live("a", &["z:8091"]), live("a_replica1", &["x:8091"])];
        d.normalize_node_list(&current, false);
        assert_eq!(d.nodes.clone().unwrap(), vec!["z:8091", "x:8091", "y:8091"]);

        // stable on a second pass
        d.normalize_node_list(&current, false);
        assert_eq!(d.nodes.unwrap(), vec!["z:8091", "x:8091", "y:8091"]);
    }

    #[test]
    fn manual_replica_ignores_unwanted_live_nodes() {
        let mut d = build(json!({
            "name": "a", "index_key": "`type`", "manual_replica": true, "nodes": ["x", "y"]
        }))
        .unwrap();
        let current = vec![live("a", &["gone:8091"]), live("a_replica1", &["x:8091"])];
        d.normalize_node_list(&current, false);
        assert_eq!(d.nodes.unwrap(), vec!["y:8091", "x:8091"]);
    }

    #[test]
    fn requires_update_compares_shape() {
        let d = build(json!({ "name": "a", "index_key": "`type`" })).unwrap();
        let mut l = live("a", &["x:8091"]);
        assert!(!d.requires_update(&l));
        l.condition = Some("`type` = 'a'".into());
        assert!(d.requires_update(&l));
        l.condition = None;
        l.retain_deleted_xattr = true;
        assert!(d.requires_update(&l));

        let p = build(json!({
            "name": "a", "index_key": "`type`", "partition": { "exprs": ["`type`"], "num_partition": 4 }
        }))
        .unwrap();
        let mut lp = live("a", &["x:8091"]);
        lp.partition = Some("HASH(`type`)".into());
        lp.num_partition = Some(4);
        assert!(!p.requires_update(&lp));
        lp.num_partition = Some(8);
        assert!(p.requires_update(&lp));
    }

    #[test]
    fn with_clause_per_replica_mode() {
        let auto = build(json!({ "name": "a", "index_key": "k", "nodes": ["n1:8091", "n2:8091"] })).unwrap();
        let w = auto.with_clause(0);
        assert_eq!(w.num_replica, Some(1));
        assert_eq!(w.nodes.as_ref().map(Vec::len), Some(2));
        assert_eq!(w.defer_build, Some(true));

        let manual = build(json!({ "name": "a", "index_key": "k", "manual_replica": true, "nodes": ["n1:8091", "n2:8091"] })).unwrap();
        let w1 = manual.with_clause(1);
        assert_eq!(w1.nodes, Some(vec!["n2:8091".to_string()]));
        assert_eq!(w1.num_replica, None);
    }
}
