//! Live index read model as reported by the index store.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_SCOPE: &str = "_default";
pub const DEFAULT_COLLECTION: &str = "_default";

/// Index lifecycle state as reported by `system:indexes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Deferred,
    Pending,
    Building,
    Online,
    Offline,
    Abridged,
    #[serde(rename = "scheduled for creation")]
    Scheduled,
    #[serde(other)]
    Unknown,
}

impl IndexState {
    pub fn parse(s: &str) -> Self {
        match s {
            "deferred" => Self::Deferred,
            "pending" => Self::Pending,
            "building" => Self::Building,
            "online" => Self::Online,
            "offline" => Self::Offline,
            "abridged" => Self::Abridged,
            "scheduled for creation" => Self::Scheduled,
            _ => Self::Unknown,
        }
    }
}

/// Snapshot of one live index. Immutable within a sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouchbaseIndex {
    pub name: String,
    pub scope: String,
    pub collection: String,
    pub is_primary: bool,
    pub index_key: Vec<String>,
    pub condition: Option<String>,
    /// Rendered partition clause, e.g. ``HASH(`type`)``.
    pub partition: Option<String>,
    pub num_partition: Option<u32>,
    pub nodes: Vec<String>,
    pub num_replica: Option<u32>,
    pub retain_deleted_xattr: bool,
    pub state: IndexState,
}

impl CouchbaseIndex {
    pub fn in_keyspace(&self, scope: &str, collection: &str) -> bool {
        self.scope == scope && self.collection == collection
    }

    pub fn condition_str(&self) -> &str {
        self.condition.as_deref().unwrap_or("")
    }

    pub fn partition_str(&self) -> &str {
        self.partition.as_deref().unwrap_or("")
    }
}

/// Cluster version, major/minor only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterVersion {
    pub major: u32,
    pub minor: u32,
}

impl ClusterVersion {
    pub fn new(major: u32, minor: u32) -> Self { Self { major, minor } }

    /// ALTER INDEX (move) arrived in 5.5.
    pub fn supports_alter_index(&self) -> bool {
        self.major > 5 || (self.major == 5 && self.minor >= 5)
    }

    /// ALTER INDEX with `action: replica_count` arrived in 6.5.
    pub fn supports_replica_count(&self) -> bool {
        self.major > 6 || (self.major == 6 && self.minor >= 5)
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Creation/alteration parameters sent alongside a DDL statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithClause {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defer_build: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_replica: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_partition: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retain_deleted_xattr: Option<bool>,
}

impl WithClause {
    pub fn is_empty(&self) -> bool {
        *self == WithClause::default()
    }

    /// JSON object literal as used after `WITH`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
