//! Node alias substitution applied to definitions before diffing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::definition::IndexDefinition;

/// Alias → canonical host. Later merges win for the same alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeMap {
    map: HashMap<String, String>,
}

impl NodeMap {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }

    pub fn insert(&mut self, alias: impl Into<String>, host: impl Into<String>) {
        self.map.insert(alias.into(), host.into());
    }

    pub fn resolve<'a>(&'a self, node: &'a str) -> &'a str {
        self.map.get(node).map(String::as_str).unwrap_or(node)
    }

    pub fn merge(&mut self, other: NodeMap) {
        self.map.extend(other.map);
    }

    /// Rewrite every aliased entry in `def.nodes`.
    pub fn apply(&self, def: &mut IndexDefinition) {
        if let Some(nodes) = def.nodes.as_mut() {
            for node in nodes.iter_mut() {
                if let Some(host) = self.map.get(node.as_str()) {
                    *node = host.clone();
                }
            }
        }
    }
}

impl FromIterator<(String, String)> for NodeMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self { map: iter.into_iter().collect() }
    }
}
