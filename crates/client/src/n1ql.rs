//! Identifier and keyspace rendering shared by every statement builder.

use ixsync_core::{DEFAULT_COLLECTION, DEFAULT_SCOPE};

/// Wrap in backticks, doubling any embedded backtick.
pub fn escape_identifier(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

pub fn is_default_keyspace(scope: &str, collection: &str) -> bool {
    scope == DEFAULT_SCOPE && collection == DEFAULT_COLLECTION
}

/// `` `bucket` `` for the default collection, `` `bucket`.`scope`.`collection` `` otherwise.
pub fn keyspace(bucket: &str, scope: &str, collection: &str) -> String {
    if is_default_keyspace(scope, collection) {
        escape_identifier(bucket)
    } else {
        format!("{}.{}.{}", escape_identifier(bucket), escape_identifier(scope), escape_identifier(collection))
    }
}

/// DROP INDEX in the form every server version accepts for the keyspace.
pub fn drop_index_statement(bucket: &str, name: &str, scope: &str, collection: &str) -> String {
    if is_default_keyspace(scope, collection) {
        format!("DROP INDEX {}.{}", escape_identifier(bucket), escape_identifier(name))
    } else {
        format!("DROP INDEX {} ON {}", escape_identifier(name), keyspace(bucket, scope, collection))
    }
}

pub fn alter_index_statement(bucket: &str, name: &str, scope: &str, collection: &str, with_json: &str) -> String {
    if is_default_keyspace(scope, collection) {
        format!("ALTER INDEX {}.{} WITH {}", escape_identifier(bucket), escape_identifier(name), with_json)
    } else {
        format!("ALTER INDEX {} ON {} WITH {}", escape_identifier(name), keyspace(bucket, scope, collection), with_json)
    }
}

pub fn build_index_statement(bucket: &str, scope: &str, collection: &str, names: &[String]) -> String {
    let list: Vec<String> = names.iter().map(|n| escape_identifier(n)).collect();
    format!("BUILD INDEX ON {}({})", keyspace(bucket, scope, collection), list.join(", "))
}

/// `system:indexes` predicate selecting one keyspace via `$bucket`, `$scope`, `$collection`.
pub fn keyspace_filter(scope: &str, collection: &str) -> &'static str {
    if is_default_keyspace(scope, collection) {
        "(idx.bucket_id IS MISSING AND idx.keyspace_id = $bucket)"
    } else {
        "(idx.bucket_id = $bucket AND idx.scope_id = $scope AND idx.keyspace_id = $collection)"
    }
}
