//! CREATE INDEX rendering for definitions.

use ixsync_client::n1ql::{escape_identifier, keyspace};
use ixsync_core::{IndexDefinition, WithClause};

/// `CREATE [PRIMARY] INDEX` for `def` under `name`, optionally with a WITH clause.
pub fn create_statement(def: &IndexDefinition, name: &str, bucket: &str, with: Option<&WithClause>) -> String {
    let ks = keyspace(bucket, &def.scope, &def.collection);
    let mut stmt = if def.is_primary {
        format!("CREATE PRIMARY INDEX {} ON {}", escape_identifier(name), ks)
    } else {
        format!("CREATE INDEX {} ON {}({})", escape_identifier(name), ks, def.index_key.join(", "))
    };
    if let Some(p) = &def.partition {
        stmt.push_str(&format!(" PARTITION BY {}({})", p.strategy.as_str(), p.exprs.join(", ")));
    }
    if !def.condition.is_empty() {
        stmt.push_str(&format!(" WHERE {}", def.condition));
    }
    if let Some(w) = with.filter(|w| !w.is_empty()) {
        stmt.push_str(&format!(" WITH {}", w.to_json()));
    }
    stmt
}
