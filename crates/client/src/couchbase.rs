//! Index store backed by the query service and the cluster manager REST API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use ixsync_core::{ClusterVersion, CouchbaseIndex, IndexState, WithClause};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::error::{StoreError, StoreResult};
use crate::explain::{parse_explain, ExplainPlan};
use crate::n1ql::{self, is_default_keyspace, keyspace_filter};
use crate::status::{merge_index_status, IndexStatusResponse, SystemIndexRow};
use crate::version::parse_version;
use crate::{IndexStore, POLL_INTERVAL, TICK_INTERVAL};

const LIST_INDEXES: &str = "SELECT idx.* FROM system:indexes AS idx \
    WHERE (idx.bucket_id = $bucket OR (idx.bucket_id IS MISSING AND idx.keyspace_id = $bucket)) \
    AND idx.`using` = \"gsi\" ORDER BY idx.name";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Cluster manager endpoint (port 8091, or 18091 when secure).
    pub cluster: Url,
    /// Query service endpoint (port 8093, or 18093 when secure).
    pub query: Url,
    pub username: String,
    pub password: String,
    pub bucket: String,
    pub request_timeout: Duration,
}

impl StoreConfig {
    /// Accepts `http(s)://host[:port]`, `couchbase(s)://host` or a bare host.
    pub fn new(cluster: &str, username: impl Into<String>, password: impl Into<String>, bucket: impl Into<String>) -> StoreResult<Self> {
        let raw = if cluster.contains("://") { cluster.to_string() } else { format!("http://{}", cluster) };
        let parsed = Url::parse(&raw)?;
        let secure = matches!(parsed.scheme(), "https" | "couchbases");
        let host = parsed.host_str().ok_or(url::ParseError::EmptyHost)?;
        let scheme = if secure { "https" } else { "http" };
        let mgmt_port = match parsed.scheme() {
            "http" | "https" => parsed.port().unwrap_or(if secure { 18091 } else { 8091 }),
            _ => if secure { 18091 } else { 8091 },
        };
        let query_port = if secure { 18093 } else { 8093 };
        Ok(Self {
            cluster: Url::parse(&format!("{}://{}:{}", scheme, host, mgmt_port))?,
            query: Url::parse(&format!("{}://{}:{}", scheme, host, query_port))?,
            username: username.into(),
            password: password.into(),
            bucket: bucket.into(),
            request_timeout: Duration::from_secs(75),
        })
    }

    pub fn with_query_url(mut self, query: &str) -> StoreResult<Self> {
        self.query = Url::parse(query)?;
        Ok(self)
    }

    pub fn is_secure(&self) -> bool {
        self.cluster.scheme() == "https"
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    errors: Vec<QueryErrorBody>,
}

#[derive(Deserialize)]
struct QueryErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolsResponse {
    #[serde(default)]
    implementation_version: String,
}

pub struct CouchbaseStore {
    http: reqwest::Client,
    cfg: StoreConfig,
}

impl CouchbaseStore {
    pub fn new(cfg: StoreConfig) -> StoreResult<Self> {
        let http = reqwest::Client::builder().timeout(cfg.request_timeout).build()?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &StoreConfig { &self.cfg }

    pub fn is_secure(&self) -> bool { self.cfg.is_secure() }

    async fn query(&self, statement: &str, params: &[(&str, &str)]) -> StoreResult<Vec<Value>> {
        let endpoint = self.cfg.query.join("/query/service")?;
        let mut body = serde_json::Map::new();
        body.insert("statement".to_string(), Value::String(statement.to_string()));
        for (k, v) in params {
            body.insert(format!("${}", k), Value::String((*v).to_string()));
        }
        debug!(statement = %statement, "query");
        let resp = self
            .http
            .post(endpoint.clone())
            .basic_auth(&self.cfg.username, Some(&self.cfg.password))
            .json(&Value::Object(body))
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        let parsed: QueryResponse = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) if status.is_success() => return Err(StoreError::decode(format!("query response: {}", e))),
            Err(_) => return Err(StoreError::Status { endpoint: endpoint.to_string(), status: status.as_u16(), body: text }),
        };
        if let Some(err) = parsed.errors.first() {
            return Err(StoreError::query(err.code, err.msg.clone()));
        }
        if !status.is_success() {
            return Err(StoreError::Status { endpoint: endpoint.to_string(), status: status.as_u16(), body: text });
        }
        Ok(parsed.results)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> StoreResult<T> {
        let endpoint = self.cfg.cluster.join(path)?;
        let resp = self
            .http
            .get(endpoint.clone())
            .basic_auth(&self.cfg.username, Some(&self.cfg.password))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status { endpoint: endpoint.to_string(), status: status.as_u16(), body });
        }
        Ok(resp.json::<T>().await?)
    }

    fn keyspace_params<'a>(&'a self, scope: &'a str, collection: &'a str) -> Vec<(&'a str, &'a str)> {
        let mut params = vec![("bucket", self.cfg.bucket.as_str())];
        if !is_default_keyspace(scope, collection) {
            params.push(("scope", scope));
            params.push(("collection", collection));
        }
        params
    }

    async fn keyspace_states(&self, scope: &str, collection: &str) -> StoreResult<Vec<IndexState>> {
        let statement = format!(
            "SELECT RAW idx.state FROM system:indexes AS idx WHERE {} AND idx.`using` = \"gsi\"",
            keyspace_filter(scope, collection)
        );
        let rows = self.query(&statement, &self.keyspace_params(scope, collection)).await?;
        Ok(rows.iter().map(|v| IndexState::parse(v.as_str().unwrap_or(""))).collect())
    }
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>, what: &str) -> StoreResult<Vec<T>> {
    serde_json::from_value(Value::Array(rows)).map_err(|e| StoreError::decode(format!("{}: {}", what, e)))
}

#[async_trait]
impl IndexStore for CouchbaseStore {
    fn bucket(&self) -> &str { &self.cfg.bucket }

    async fn list_indexes(&self) -> StoreResult<Vec<CouchbaseIndex>> {
        let rows: Vec<SystemIndexRow> = decode_rows(self.query(LIST_INDEXES, &[("bucket", self.cfg.bucket.as_str())]).await?, "system:indexes")?;
        let status: IndexStatusResponse = self.get_json("/indexStatus").await?;
        let merged = merge_index_status(&self.cfg.bucket, &rows, &status.indexes);
        debug!(bucket = %self.cfg.bucket, count = merged.len(), "listed indexes");
        Ok(merged)
    }

    async fn cluster_version(&self) -> StoreResult<ClusterVersion> {
        let pools: PoolsResponse = self.get_json("/pools").await?;
        parse_version(&pools.implementation_version)
            .ok_or_else(|| StoreError::decode(format!("unrecognized cluster version '{}'", pools.implementation_version)))
    }

    async fn create_index(&self, statement: &str) -> StoreResult<()> {
        self.query(statement, &[]).await.map(|_| ())
    }

    async fn alter_index(&self, name: &str, scope: &str, collection: &str, with: &WithClause) -> StoreResult<()> {
        let statement = n1ql::alter_index_statement(&self.cfg.bucket, name, scope, collection, &with.to_json());
        self.query(&statement, &[]).await.map(|_| ())
    }

    async fn drop_index(&self, name: &str, scope: &str, collection: &str) -> StoreResult<()> {
        let statement = n1ql::drop_index_statement(&self.cfg.bucket, name, scope, collection);
        self.query(&statement, &[]).await.map(|_| ())
    }

    async fn explain_create(&self, statement: &str) -> StoreResult<ExplainPlan> {
        let results = self.query(&format!("EXPLAIN {}", statement), &[]).await?;
        parse_explain(&results)
    }

    async fn build_deferred_indexes(&self, scope: &str, collection: &str) -> StoreResult<Vec<String>> {
        let statement = format!(
            "SELECT RAW idx.name FROM system:indexes AS idx WHERE {} AND idx.state IN [\"deferred\", \"pending\"] AND idx.`using` = \"gsi\"",
            keyspace_filter(scope, collection)
        );
        let names: Vec<String> = decode_rows(self.query(&statement, &self.keyspace_params(scope, collection)).await?, "deferred index names")?;
        if names.is_empty() {
            return Ok(names);
        }
        info!(scope = %scope, collection = %collection, count = names.len(), "building deferred indexes");
        let build = n1ql::build_index_statement(&self.cfg.bucket, scope, collection, &names);
        self.query(&build, &[]).await?;
        Ok(names)
    }

    async fn wait_until_online(
        &self,
        scope: &str,
        collection: &str,
        timeout: Duration,
        on_tick: &(dyn Fn() + Send + Sync),
    ) -> StoreResult<bool> {
        let started = Instant::now();
        let mut last_tick = started;
        loop {
            let states = self.keyspace_states(scope, collection).await?;
            if states.iter().all(|s| *s == IndexState::Online) {
                return Ok(true);
            }
            if started.elapsed() >= timeout {
                return Ok(false);
            }
            if last_tick.elapsed() >= TICK_INTERVAL {
                on_tick();
                last_tick = Instant::now();
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_cluster_urls() {
        let c = StoreConfig::new("couchbase://db1", "u", "p", "beer").unwrap();
        assert_eq!(c.cluster.as_str(), "http://db1:8091/");
        assert_eq!(c.query.as_str(), "http://db1:8093/");
        assert!(!c.is_secure());

        let s = StoreConfig::new("couchbases://db1", "u", "p", "beer").unwrap();
        assert_eq!(s.cluster.as_str(), "https://db1:18091/");
        assert!(s.is_secure());

        let h = StoreConfig::new("localhost:9000", "u", "p", "beer").unwrap();
        assert_eq!(h.cluster.as_str(), "http://localhost:9000/");
    }

    #[test]
    fn query_url_override() {
        let c = StoreConfig::new("http://db1", "u", "p", "b").unwrap().with_query_url("http://q1:8093").unwrap();
        assert_eq!(c.query.host_str(), Some("q1"));
    }
}
