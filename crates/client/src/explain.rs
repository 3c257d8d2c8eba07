//! Canonical echo of a dry-run `EXPLAIN CREATE INDEX`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainPartition {
    pub exprs: Vec<String>,
    pub strategy: String,
}

/// Keys, filter and partitioning exactly as the query planner renders them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainPlan {
    /// Key expressions, with ` DESC` appended for descending keys.
    pub keys: Vec<String>,
    pub condition: Option<String>,
    pub partition: Option<ExplainPartition>,
}

#[derive(Deserialize)]
struct RawKey {
    expr: String,
    #[serde(default)]
    desc: bool,
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    keys: Vec<RawKey>,
    #[serde(default, rename = "where")]
    condition: Option<String>,
    #[serde(default)]
    partition: Option<ExplainPartition>,
}

/// Accepts either `[{ "plan": {...} }]` or the bare plan object.
pub fn parse_explain(results: &[Value]) -> StoreResult<ExplainPlan> {
    let first = results.first().ok_or_else(|| StoreError::decode("EXPLAIN returned no plan"))?;
    let plan = first.get("plan").unwrap_or(first);
    let raw: RawPlan = serde_json::from_value(plan.clone()).map_err(|e| StoreError::decode(format!("EXPLAIN plan: {}", e)))?;
    Ok(ExplainPlan {
        keys: raw
            .keys
            .into_iter()
            .map(|k| if k.desc { format!("{} DESC", k.expr) } else { k.expr })
            .collect(),
        condition: raw.condition.filter(|c| !c.is_empty()),
        partition: raw.partition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_keys_where_and_partition() {
        let results = vec![json!({ "plan": {
            "#operator": "CreateIndex",
            "keys": [ { "expr": "`type`" }, { "expr": "`abv`", "desc": true } ],
            "where": "(`type` = \"beer\")",
            "partition": { "exprs": ["(meta().`id`)"], "strategy": "HASH" }
        }})];
        let p = parse_explain(&results).unwrap();
        assert_eq!(p.keys, vec!["`type`", "`abv` DESC"]);
        assert_eq!(p.condition.as_deref(), Some("(`type` = \"beer\")"));
        assert_eq!(p.partition.unwrap().strategy, "HASH");
    }

    #[test]
    fn empty_results_are_an_error() {
        assert!(parse_explain(&[]).is_err());
    }
}
