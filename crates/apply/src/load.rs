//! Reading definition documents from files, directories and stdin.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use ixsync_core::{DefinitionPatch, DocumentKind, HookRegistry, IndexDefinition, NodeMap, Validators};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

const STDIN: &str = "-";

#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Index(DefinitionPatch),
    Override(DefinitionPatch),
    NodeMap(NodeMap),
}

/// A parsed document and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub origin: String,
    pub document: Document,
}

/// Raw text of every source, directories expanded to their sorted
/// `.yaml`/`.yml`/`.json` entries. `-` reads stdin.
pub fn read_sources(paths: &[PathBuf]) -> SyncResult<Vec<(String, String)>> {
    let mut out = Vec::new();
    for path in paths {
        if path.as_os_str() == STDIN {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text).map_err(|e| SyncError::load(STDIN, e.to_string()))?;
            out.push((STDIN.to_string(), text));
        } else if path.is_dir() {
            for file in definition_files(path)? {
                out.push((file.display().to_string(), read_file(&file)?));
            }
        } else {
            out.push((path.display().to_string(), read_file(path)?));
        }
    }
    Ok(out)
}

fn read_file(path: &Path) -> SyncResult<String> {
    fs::read_to_string(path).map_err(|e| SyncError::load(path.display().to_string(), e.to_string()))
}

fn definition_files(dir: &Path) -> SyncResult<Vec<PathBuf>> {
    let origin = || dir.display().to_string();
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| SyncError::load(origin(), e.to_string()))? {
        let path = entry.map_err(|e| SyncError::load(origin(), e.to_string()))?.path();
        let wanted = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "yaml" | "yml" | "json"))
            .unwrap_or(false);
        if wanted && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
    /// Stdin or an unrecognized extension: JSON if it parses, else YAML.
    Sniff,
}

fn format_of(origin: &str) -> Format {
    let lower = origin.to_ascii_lowercase();
    if lower.ends_with(".json") {
        Format::Json
    } else if lower.ends_with(".yaml") || lower.ends_with(".yml") {
        Format::Yaml
    } else {
        Format::Sniff
    }
}

fn json_values(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Split one source into raw document values: a JSON object or array, or a
/// multi-document YAML stream.
pub fn parse_values(origin: &str, text: &str) -> SyncResult<Vec<Value>> {
    match format_of(origin) {
        Format::Json => {
            let value: Value = serde_json::from_str(text).map_err(|e| SyncError::load(origin, e.to_string()))?;
            return Ok(json_values(value));
        }
        Format::Sniff if matches!(text.trim_start().chars().next(), Some('{') | Some('[')) => {
            if let Ok(value) = serde_json::from_str::<Value>(text) {
                return Ok(json_values(value));
            }
        }
        _ => {}
    }
    let mut values = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let yaml = serde_yaml::Value::deserialize(doc).map_err(|e| SyncError::load(origin, e.to_string()))?;
        if yaml.is_null() {
            continue;
        }
        values.push(serde_json::to_value(yaml).map_err(|e| SyncError::load(origin, e.to_string()))?);
    }
    Ok(values)
}

/// Validate one raw document against the rules for its `type` (default
/// `index`) and convert it.
pub fn parse_document(origin: &str, value: Value, validators: &Validators) -> SyncResult<Document> {
    let Value::Object(mut map) = value else {
        return Err(SyncError::load(origin, "expected a mapping"));
    };
    let kind = match map.remove("type") {
        None => DocumentKind::Index,
        Some(Value::String(s)) => {
            DocumentKind::parse(&s).ok_or_else(|| SyncError::load(origin, format!("unknown document type '{}'", s)))?
        }
        Some(other) => return Err(SyncError::load(origin, format!("type must be a string, got {}", other))),
    };
    validators.validate(kind, &map)?;

    let patch = |map| DefinitionPatch::from_json(Value::Object(map)).map_err(|e| SyncError::load(origin, e.to_string()));
    Ok(match kind {
        DocumentKind::Index => Document::Index(patch(map)?),
        DocumentKind::Override => Document::Override(patch(map)?),
        DocumentKind::NodeMap => {
            let raw = map.remove("map").unwrap_or(Value::Null);
            Document::NodeMap(serde_json::from_value(raw).map_err(|e| SyncError::load(origin, e.to_string()))?)
        }
    })
}

pub fn parse_source(origin: &str, text: &str, validators: &Validators) -> SyncResult<Vec<SourceDocument>> {
    parse_values(origin, text)?
        .into_iter()
        .map(|v| Ok(SourceDocument { origin: origin.to_string(), document: parse_document(origin, v, validators)? }))
        .collect()
}

/// Fully merged definitions ready for reconciliation.
#[derive(Debug, Clone, Default)]
pub struct DefinitionSet {
    pub definitions: Vec<IndexDefinition>,
    pub node_map: NodeMap,
}

impl DefinitionSet {
    /// Build definitions in encounter order, then apply overrides in
    /// encounter order, then the merged node map.
    pub fn build(documents: Vec<SourceDocument>, hooks: &HookRegistry) -> SyncResult<Self> {
        let mut definitions: Vec<IndexDefinition> = Vec::new();
        let mut seen = HashSet::new();
        let mut overrides = Vec::new();
        let mut node_map = NodeMap::new();

        for doc in documents {
            match doc.document {
                Document::Index(patch) => {
                    let def = IndexDefinition::new(&patch, hooks)?;
                    if !seen.insert((def.scope.clone(), def.collection.clone(), def.name.clone())) {
                        return Err(SyncError::DuplicateDefinition {
                            scope: def.scope,
                            collection: def.collection,
                            name: def.name,
                        });
                    }
                    debug!(origin = %doc.origin, index = %def.name, "loaded definition");
                    definitions.push(def);
                }
                Document::Override(patch) => overrides.push((doc.origin, patch)),
                Document::NodeMap(map) => node_map.merge(map),
            }
        }

        for (origin, patch) in overrides {
            let mut matched = false;
            for def in definitions.iter_mut().filter(|d| override_targets(&patch, d)) {
                def.apply_override(&patch, hooks, false)?;
                matched = true;
            }
            if !matched {
                warn!(origin = %origin, index = ?patch.name, "override does not match any definition");
            }
        }

        if !node_map.is_empty() {
            for def in &mut definitions {
                node_map.apply(def);
            }
        }
        Ok(Self { definitions, node_map })
    }
}

/// Overrides without scope/collection match the name in any keyspace.
fn override_targets(patch: &DefinitionPatch, def: &IndexDefinition) -> bool {
    patch.name.as_deref() == Some(def.name.as_str())
        && patch.scope.as_deref().map(|s| s == def.scope).unwrap_or(true)
        && patch.collection.as_deref().map(|c| c == def.collection).unwrap_or(true)
}

/// Read, validate and merge everything under `paths`.
pub fn load_definitions(paths: &[PathBuf], validators: &Validators, hooks: &HookRegistry) -> SyncResult<DefinitionSet> {
    let mut documents = Vec::new();
    for (origin, text) in read_sources(paths)? {
        documents.extend(parse_source(&origin, &text, validators)?);
    }
    DefinitionSet::build(documents, hooks)
}
