//! Per-document-kind field rules applied to raw documents before they are
//! converted into typed patches.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::{ValidationError, ValidationResult};

/// The `type` of a definition document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKind {
    Index,
    Override,
    NodeMap,
}

impl DocumentKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "index" => Some(Self::Index),
            "override" => Some(Self::Override),
            "nodeMap" => Some(Self::NodeMap),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Override => "override",
            Self::NodeMap => "nodeMap",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

pub type FieldCheck = fn(&Value) -> Result<(), String>;

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub key: &'static str,
    pub check: FieldCheck,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentRules {
    pub fields: Vec<FieldRule>,
    pub required: Vec<&'static str>,
    /// Keys that must appear together.
    pub paired: Vec<(&'static str, &'static str)>,
}

impl DocumentRules {
    fn rule(&self, key: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|r| r.key == key)
    }
}

/// Validator table keyed by document kind.
#[derive(Debug, Clone)]
pub struct Validators {
    table: BTreeMap<DocumentKind, DocumentRules>,
}

impl Default for Validators {
    fn default() -> Self { Self::new() }
}

impl Validators {
    pub fn new() -> Self {
        let definition_fields = vec![
            FieldRule { key: "name", check: non_empty_string },
            FieldRule { key: "scope", check: non_empty_string },
            FieldRule { key: "collection", check: non_empty_string },
            FieldRule { key: "is_primary", check: boolean },
            FieldRule { key: "index_key", check: index_key },
            FieldRule { key: "condition", check: string },
            FieldRule { key: "partition", check: partition },
            FieldRule { key: "manual_replica", check: boolean },
            FieldRule { key: "num_replica", check: nullable_count },
            FieldRule { key: "nodes", check: nullable_nodes },
            FieldRule { key: "retain_deleted_xattr", check: boolean },
            FieldRule { key: "lifecycle", check: lifecycle },
            FieldRule { key: "post_process", check: non_empty_string },
        ];
        let mut table = BTreeMap::new();
        table.insert(
            DocumentKind::Index,
            DocumentRules {
                fields: definition_fields.clone(),
                required: vec!["name"],
                paired: vec![("scope", "collection")],
            },
        );
        table.insert(
            DocumentKind::Override,
            DocumentRules {
                fields: definition_fields,
                required: vec!["name"],
                paired: vec![("scope", "collection")],
            },
        );
        table.insert(
            DocumentKind::NodeMap,
            DocumentRules {
                fields: vec![FieldRule { key: "map", check: string_map }],
                required: vec!["map"],
                paired: Vec::new(),
            },
        );
        Self { table }
    }

    pub fn rules(&self, kind: DocumentKind) -> Option<&DocumentRules> {
        self.table.get(&kind)
    }

    /// Check `doc` (with its `type` key already removed) against `kind`'s rules.
    pub fn validate(&self, kind: DocumentKind, doc: &Map<String, Value>) -> ValidationResult<()> {
        let name = doc.get("name").and_then(Value::as_str).unwrap_or("");
        let err = |msg: String| {
            if name.is_empty() {
                ValidationError::new(format!("{} document: {}", kind, msg))
            } else {
                ValidationError::for_index(name, msg)
            }
        };
        let rules = self.rules(kind).ok_or_else(|| err("no validator registered".to_string()))?;

        for (key, value) in doc {
            let rule = rules.rule(key).ok_or_else(|| err(format!("unknown key '{}'", key)))?;
            (rule.check)(value).map_err(|m| err(format!("{}: {}", key, m)))?;
        }
        for key in &rules.required {
            if !doc.contains_key(*key) {
                return Err(err(format!("{} is required", key)));
            }
        }
        for (a, b) in &rules.paired {
            if doc.contains_key(*a) != doc.contains_key(*b) {
                return Err(err(format!("{} and {} must be set together", a, b)));
            }
        }
        Ok(())
    }
}

fn string(v: &Value) -> Result<(), String> {
    v.as_str().map(|_| ()).ok_or_else(|| "expected a string".to_string())
}

fn non_empty_string(v: &Value) -> Result<(), String> {
    match v.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(()),
        Some(_) => Err("must not be empty".to_string()),
        None => Err("expected a string".to_string()),
    }
}

fn boolean(v: &Value) -> Result<(), String> {
    v.as_bool().map(|_| ()).ok_or_else(|| "expected true or false".to_string())
}

fn string_array(v: &Value) -> Result<(), String> {
    let arr = v.as_array().ok_or_else(|| "expected an array of strings".to_string())?;
    if arr.iter().all(|x| x.as_str().map(|s| !s.trim().is_empty()).unwrap_or(false)) {
        Ok(())
    } else {
        Err("expected an array of non-empty strings".to_string())
    }
}

fn index_key(v: &Value) -> Result<(), String> {
    match v {
        Value::String(_) => Ok(()),
        Value::Array(_) => string_array(v),
        _ => Err("expected a string or an array of strings".to_string()),
    }
}

fn nullable_count(v: &Value) -> Result<(), String> {
    match v {
        Value::Null => Ok(()),
        Value::Number(n) if n.as_u64().map(|x| x <= u32::MAX as u64).unwrap_or(false) => Ok(()),
        _ => Err("expected a non-negative integer or null".to_string()),
    }
}

fn nullable_nodes(v: &Value) -> Result<(), String> {
    if v.is_null() { Ok(()) } else { string_array(v) }
}

fn partition(v: &Value) -> Result<(), String> {
    let obj = match v {
        Value::Null => return Ok(()),
        Value::Object(o) => o,
        _ => return Err("expected an object or null".to_string()),
    };
    for (key, value) in obj {
        match key.as_str() {
            "exprs" => string_array(value).map_err(|m| format!("exprs: {}", m))?,
            "strategy" => match value.as_str() {
                Some(s) if s.eq_ignore_ascii_case("hash") => {}
                _ => return Err("strategy: only HASH is supported".to_string()),
            },
            "num_partition" => match value {
                Value::Null => {}
                Value::Number(n) if n.as_u64().map(|x| x >= 1 && x <= u32::MAX as u64).unwrap_or(false) => {}
                _ => return Err("num_partition: expected a positive integer or null".to_string()),
            },
            other => return Err(format!("unknown key '{}'", other)),
        }
    }
    Ok(())
}

fn lifecycle(v: &Value) -> Result<(), String> {
    let obj = v.as_object().ok_or_else(|| "expected an object".to_string())?;
    for (key, value) in obj {
        match key.as_str() {
            "drop" => boolean(value).map_err(|m| format!("drop: {}", m))?,
            other => return Err(format!("unknown key '{}'", other)),
        }
    }
    Ok(())
}

fn string_map(v: &Value) -> Result<(), String> {
    let obj = v.as_object().ok_or_else(|| "expected an object of alias: host pairs".to_string())?;
    match obj.iter().find(|(_, host)| host.as_str().map(|s| s.trim().is_empty()).unwrap_or(true)) {
        Some((alias, _)) => Err(format!("alias '{}' must map to a non-empty host string", alias)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn index_documents_pass_and_fail() {
        let v = Validators::new();
        assert!(v.validate(DocumentKind::Index, &doc(json!({ "name": "a", "index_key": ["k"], "num_replica": 1 }))).is_ok());

        let e = v.validate(DocumentKind::Index, &doc(json!({ "name": "a", "num_replica": -1 }))).unwrap_err();
        assert!(e.message.starts_with("num_replica"), "{}", e);
        assert_eq!(e.index.as_deref(), Some("a"));

        let e = v.validate(DocumentKind::Index, &doc(json!({ "index_key": "k" }))).unwrap_err();
        assert!(e.message.contains("name is required"), "{}", e);
    }

    #[test]
    fn unknown_keys_rejected() {
        let v = Validators::new();
        let e = v.validate(DocumentKind::Index, &doc(json!({ "name": "a", "indexKey": "k" }))).unwrap_err();
        assert!(e.message.contains("unknown key 'indexKey'"));
        assert!(v
            .validate(DocumentKind::Index, &doc(json!({ "name": "a", "partition": { "exprs": ["k"], "by": 1 } })))
            .is_err());
    }

    #[test]
    fn partition_strategy_and_count() {
        let v = Validators::new();
        assert!(v
            .validate(DocumentKind::Override, &doc(json!({ "name": "a", "partition": { "strategy": "HASH", "num_partition": 8 } })))
            .is_ok());
        assert!(v
            .validate(DocumentKind::Override, &doc(json!({ "name": "a", "partition": { "strategy": "RANGE" } })))
            .is_err());
        assert!(v
            .validate(DocumentKind::Override, &doc(json!({ "name": "a", "partition": { "num_partition": 0 } })))
            .is_err());
    }

    #[test]
    fn scope_and_collection_paired() {
        let v = Validators::new();
        assert!(v.validate(DocumentKind::Index, &doc(json!({ "name": "a", "scope": "s" }))).is_err());
        assert!(v.validate(DocumentKind::Index, &doc(json!({ "name": "a", "scope": "s", "collection": "c" }))).is_ok());
    }

    #[test]
    fn node_map_values_are_strings() {
        let v = Validators::new();
        assert!(v.validate(DocumentKind::NodeMap, &doc(json!({ "map": { "a": "host-a:8091" } }))).is_ok());
        assert!(v.validate(DocumentKind::NodeMap, &doc(json!({ "map": { "a": 1 } }))).is_err());
        assert!(v.validate(DocumentKind::NodeMap, &doc(json!({}))).is_err());
    }

    #[test]
    fn kind_names_round_trip() {
        for k in [DocumentKind::Index, DocumentKind::Override, DocumentKind::NodeMap] {
            assert_eq!(DocumentKind::parse(k.as_str()), Some(k));
        }
        assert_eq!(DocumentKind::parse("nodemap"), None);
    }
}
