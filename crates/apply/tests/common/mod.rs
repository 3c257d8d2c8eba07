#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ixsync_client::{ExplainPartition, ExplainPlan, IndexStore, StoreError, StoreResult};
use ixsync_core::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Explain(String),
    Create(String),
    Drop(String),
    Alter(String, WithClause),
    Build(String, String),
    Wait(String, String),
}

/// In-memory store that records every call and fails on request.
pub struct FakeStore {
    pub version: ClusterVersion,
    pub indexes: Vec<CouchbaseIndex>,
    pub calls: Mutex<Vec<Call>>,
    /// Creates and drops touching these index names fail.
    pub failing: Mutex<HashSet<String>>,
    pub explain_error: Mutex<Option<String>>,
    pub online: bool,
}

impl FakeStore {
    pub fn new(indexes: Vec<CouchbaseIndex>) -> Self {
        Self {
            version: ClusterVersion::new(7, 1),
            indexes,
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            explain_error: Mutex::new(None),
            online: true,
        }
    }

    pub fn with_version(mut self, major: u32, minor: u32) -> Self {
        self.version = ClusterVersion::new(major, minor);
        self
    }

    pub fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than dry-run explains.
    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| !matches!(c, Call::Explain(_))).collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, name: &str) -> StoreResult<()> {
        if self.failing.lock().unwrap().contains(name) {
            return Err(StoreError::query(5000, format!("injected failure for {}", name)));
        }
        Ok(())
    }
}

fn created_name(statement: &str) -> String {
    let start = statement.find('`').map(|i| i + 1).unwrap_or(0);
    let len = statement[start..].find('`').unwrap_or(0);
    statement[start..start + len].to_string()
}

/// Echo keys, condition and partition back the way they were written.
fn echo_plan(statement: &str) -> ExplainPlan {
    let on = statement.find(" ON ").map(|i| i + 4).unwrap_or(0);
    let rest = &statement[on..];
    let open = rest.find('(').unwrap_or(0);
    let close = rest[open..].find(')').map(|i| i + open).unwrap_or(rest.len());
    let keys = rest[open + 1..close].split(", ").map(String::from).collect();
    let tail = &rest[close + 1..];
    let condition = tail.find(" WHERE ").map(|i| tail[i + 7..].to_string());
    let partition = tail.find("PARTITION BY HASH(").map(|i| {
        let inner = &tail[i + 18..];
        let end = inner.find(')').unwrap_or(inner.len());
        ExplainPartition { exprs: inner[..end].split(", ").map(String::from).collect(), strategy: "HASH".to_string() }
    });
    ExplainPlan { keys, condition, partition }
}

#[async_trait]
impl IndexStore for FakeStore {
    fn bucket(&self) -> &str { "beer" }

    async fn list_indexes(&self) -> StoreResult<Vec<CouchbaseIndex>> {
        Ok(self.indexes.clone())
    }

    async fn cluster_version(&self) -> StoreResult<ClusterVersion> {
        Ok(self.version)
    }

    async fn create_index(&self, statement: &str) -> StoreResult<()> {
        self.record(Call::Create(statement.to_string()));
        self.check(&created_name(statement))
    }

    async fn alter_index(&self, name: &str, _scope: &str, _collection: &str, with: &WithClause) -> StoreResult<()> {
        self.record(Call::Alter(name.to_string(), with.clone()));
        self.check(name)
    }

    async fn drop_index(&self, name: &str, _scope: &str, _collection: &str) -> StoreResult<()> {
        self.record(Call::Drop(name.to_string()));
        self.check(name)
    }

    async fn explain_create(&self, statement: &str) -> StoreResult<ExplainPlan> {
        self.record(Call::Explain(statement.to_string()));
        if let Some(msg) = self.explain_error.lock().unwrap().clone() {
            return Err(StoreError::query(3000, msg));
        }
        Ok(echo_plan(statement))
    }

    async fn build_deferred_indexes(&self, scope: &str, collection: &str) -> StoreResult<Vec<String>> {
        self.record(Call::Build(scope.to_string(), collection.to_string()));
        Ok(Vec::new())
    }

    async fn wait_until_online(
        &self,
        scope: &str,
        collection: &str,
        _timeout: Duration,
        on_tick: &(dyn Fn() + Send + Sync),
    ) -> StoreResult<bool> {
        self.record(Call::Wait(scope.to_string(), collection.to_string()));
        on_tick();
        Ok(self.online)
    }
}

pub fn live(name: &str, nodes: &[&str], num_replica: u32) -> CouchbaseIndex {
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
        num_replica: Some(num_replica),
        retain_deleted_xattr: false,
        state: IndexState::Online,
    }
}

pub fn definition(v: serde_json::Value) -> IndexDefinition {
    IndexDefinition::new(&DefinitionPatch::from_json(v).unwrap(), &HookRegistry::new()).unwrap()
}
