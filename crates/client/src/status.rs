//! Merge `system:indexes` rows with cluster manager `/indexStatus` entries
//! into the live read model.

use ixsync_core::{CouchbaseIndex, IndexState, DEFAULT_COLLECTION, DEFAULT_SCOPE};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

static REPLICA_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*) \(replica \d+\)$").unwrap());

/// One row of `SELECT idx.* FROM system:indexes AS idx`.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemIndexRow {
    pub name: String,
    #[serde(default)]
    pub is_primary: Option<bool>,
    #[serde(default)]
    pub index_key: Vec<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub state: String,
    pub keyspace_id: String,
    #[serde(default)]
    pub bucket_id: Option<String>,
    #[serde(default)]
    pub scope_id: Option<String>,
}

impl SystemIndexRow {
    /// `(bucket, scope, collection)`; pre-collections rows only carry `keyspace_id`.
    pub fn location(&self) -> (&str, &str, &str) {
        match &self.bucket_id {
            Some(bucket) => (bucket.as_str(), self.scope_id.as_deref().unwrap_or(DEFAULT_SCOPE), self.keyspace_id.as_str()),
            None => (self.keyspace_id.as_str(), DEFAULT_SCOPE, DEFAULT_COLLECTION),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatusEntry {
    #[serde(default)]
    pub index_name: Option<String>,
    pub index: String,
    pub bucket: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub num_replica: Option<u32>,
    #[serde(default)]
    pub num_partition: Option<u32>,
    #[serde(default)]
    pub partitioned: bool,
    #[serde(default)]
    pub replica_id: Option<u32>,
    #[serde(default)]
    pub definition: String,
}

impl IndexStatusEntry {
    /// Index name without the ` (replica N)` suffix.
    pub fn base_name(&self) -> &str {
        if let Some(n) = &self.index_name {
            return n.as_str();
        }
        REPLICA_SUFFIX_RE
            .captures(&self.index)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(self.index.as_str())
    }

    fn matches(&self, bucket: &str, scope: &str, collection: &str, name: &str) -> bool {
        self.bucket == bucket
            && self.scope.as_deref().unwrap_or(DEFAULT_SCOPE) == scope
            && self.collection.as_deref().unwrap_or(DEFAULT_COLLECTION) == collection
            && self.base_name() == name
    }

    fn retains_deleted_xattr(&self) -> bool {
        let compact: String = self.definition.chars().filter(|c| !c.is_whitespace()).collect();
        compact.contains("\"retain_deleted_xattr\":true")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexStatusResponse {
    #[serde(default)]
    pub indexes: Vec<IndexStatusEntry>,
}

/// Build the read model for `bucket`. Replica rows collapse onto their index;
/// partitioned indexes take the first row's host list.
pub fn merge_index_status(bucket: &str, rows: &[SystemIndexRow], status: &[IndexStatusEntry]) -> Vec<CouchbaseIndex> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let (row_bucket, scope, collection) = row.location();
        if row_bucket != bucket {
            continue;
        }
        let mut entries: Vec<&IndexStatusEntry> = status
            .iter()
            .filter(|e| e.matches(bucket, scope, collection, &row.name))
            .collect();
        entries.sort_by_key(|e| e.replica_id.unwrap_or(0));

        let first = entries.first();
        let partitioned = entries.iter().any(|e| e.partitioned);
        let nodes = if partitioned {
            first.map(|e| e.hosts.clone()).unwrap_or_default()
        } else {
            entries.iter().flat_map(|e| e.hosts.iter().cloned()).collect()
        };

        out.push(CouchbaseIndex {
            name: row.name.clone(),
            scope: scope.to_string(),
            collection: collection.to_string(),
            is_primary: row.is_primary.unwrap_or(false),
            index_key: row.index_key.clone(),
            condition: row.condition.clone().filter(|c| !c.is_empty()),
            partition: row.partition.clone().filter(|p| !p.is_empty()),
            num_partition: if partitioned { first.and_then(|e| e.num_partition) } else { None },
            nodes,
            num_replica: first.and_then(|e| e.num_replica),
            retain_deleted_xattr: first.map(|e| e.retains_deleted_xattr()).unwrap_or(false),
            state: IndexState::parse(&row.state),
        });
    }
    out
}
