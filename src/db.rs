//! Authenticated database client handle
//!
//! [`DbConnection`] is the only type above this module that touches the
//! SurrealDB SDK. Everything else goes through its `query`/`create`/`update`/
//! `delete` primitives, so the wire protocol stays an implementation detail.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::{Arc, Weak};
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::config::ServiceConfig;
use crate::credentials::Credentials;
use crate::error::{Result, ServiceError};

/// Named query parameters
pub type Vars = serde_json::Map<String, serde_json::Value>;

/// Cheap-to-clone handle; clones share one underlying client.
#[derive(Clone)]
pub struct DbConnection {
    inner: Arc<Surreal<Any>>,
}

impl fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnection")
            .field("handle", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

/// Weak reference to an opened [`DbConnection`].
#[derive(Clone, Default)]
pub struct HandleRef(Weak<Surreal<Any>>);

impl HandleRef {
    /// True while `connection` is the still-open handle this was taken from
    pub fn refers_to(&self, connection: &DbConnection) -> bool {
        self.0
            .upgrade()
            .is_some_and(|inner| Arc::ptr_eq(&inner, &connection.inner))
    }
}

impl DbConnection {
    pub fn new(client: Surreal<Any>) -> Self {
        Self {
            inner: Arc::new(client),
        }
    }

    pub fn client(&self) -> &Surreal<Any> {
        &self.inner
    }

    /// True when both values were cloned from the same opened connection
    pub fn same_handle(&self, other: &DbConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Non-owning reference that recognises this handle later without keeping it open.
    pub fn downgrade(&self) -> HandleRef {
        HandleRef(Arc::downgrade(&self.inner))
    }

    /// Run a script for its side effects, failing on the first statement error.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        self.inner.query(sql).await?.check()?;
        Ok(())
    }

    /// Rows produced by the last statement of `sql`.
    pub async fn query<T>(&self, sql: &str, vars: Vars) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let mut request = self.inner.query(sql);
        if !vars.is_empty() {
            request = request.bind(vars);
        }
        let mut response = request.await?.check()?;
        // earlier statements are usually LETs
        let last = response.num_statements().saturating_sub(1);
        Ok(response.take::<Vec<T>>(last)?)
    }

    /// Rows produced by every statement of `sql`, in order. Every statement
    /// must yield rows of `T`.
    pub async fn query_each<T>(&self, sql: &str, vars: Vars) -> Result<Vec<Vec<T>>>
    where
        T: DeserializeOwned,
    {
        let mut request = self.inner.query(sql);
        if !vars.is_empty() {
            request = request.bind(vars);
        }
        let mut response = request.await?.check()?;

        let mut results = Vec::with_capacity(response.num_statements());
        for index in 0..response.num_statements() {
            results.push(response.take::<Vec<T>>(index)?);
        }
        Ok(results)
    }

    /// Create a record in `table`, returning its id as `table:key`.
    pub async fn create(&self, table: &str, content: serde_json::Value) -> Result<String> {
        let mut vars = Vars::new();
        vars.insert("tb".into(), table.into());
        vars.insert("content".into(), content);

        let ids: Vec<String> = self
            .query(
                "LET $created = CREATE type::table($tb) CONTENT $content;
                 RETURN <string> $created[0].id;",
                vars,
            )
            .await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| ServiceError::Database(format!("create in {table} returned no id")))
    }

    /// Merge `patch` into an existing record. Returns false if it does not exist.
    pub async fn update(&self, id: &str, patch: serde_json::Value) -> Result<bool> {
        let mut vars = record_vars(id)?;
        vars.insert("patch".into(), patch);
        let affected = self
            .count(
                "LET $rows = UPDATE type::thing($tb, $key) MERGE $patch;
                 RETURN array::len($rows);",
                vars,
            )
            .await?;
        Ok(affected > 0)
    }

    /// Delete a record. Returns false if it did not exist.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let affected = self
            .count(
                "LET $rows = DELETE type::thing($tb, $key) RETURN BEFORE;
                 RETURN array::len($rows);",
                record_vars(id)?,
            )
            .await?;
        Ok(affected > 0)
    }

    pub(crate) async fn count(&self, sql: &str, vars: Vars) -> Result<usize> {
        let counts: Vec<usize> = self.query(sql, vars).await?;
        Ok(counts.first().copied().unwrap_or(0))
    }
}

/// `$tb`/`$key` parameters for a `table:key` record id.
fn record_vars(id: &str) -> Result<Vars> {
    let (table, key) = id
        .split_once(':')
        .ok_or_else(|| ServiceError::Database(format!("invalid record id: {id}")))?;
    let key = key.trim_start_matches('⟨').trim_end_matches('⟩');

    let mut vars = Vars::new();
    vars.insert("tb".into(), table.into());
    vars.insert("key".into(), key.into());
    Ok(vars)
}

/// Opens authenticated connections to the database service.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, config: &ServiceConfig, credentials: &Credentials) -> Result<DbConnection>;
}

/// WebSocket client against the running service
pub struct RemoteConnector;

#[async_trait]
impl Connector for RemoteConnector {
    async fn open(&self, config: &ServiceConfig, credentials: &Credentials) -> Result<DbConnection> {
        let uri = config.connection_uri();
        debug!(uri = %uri, "Opening database connection");

        let client = any::connect(uri.as_str())
            .await
            .map_err(|e| ServiceError::Connection(format!("{uri}: {e}")))?;

        client
            .signin(Root {
                username: &credentials.username,
                password: &credentials.password,
            })
            .await
            .map_err(|e| ServiceError::Auth(e.to_string()))?;

        client
            .use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await?;

        info!(
            ns = %config.namespace,
            db = %config.database,
            user = %credentials.username,
            "Connected to database"
        );
        Ok(DbConnection::new(client))
    }
}

/// In-process engine with no authentication, for tests and tooling
pub struct MemoryConnector;

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, config: &ServiceConfig, _credentials: &Credentials) -> Result<DbConnection> {
        let client = any::connect("mem://")
            .await
            .map_err(|e| ServiceError::Connection(e.to_string()))?;
        client
            .use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await?;
        Ok(DbConnection::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    async fn memory() -> DbConnection {
        let config = ServiceConfig::with_dirs("/cfg", "/data");
        MemoryConnector
            .open(&config, &Credentials::new("altair", "unused"))
            .await
            .unwrap()
    }

    #[derive(Debug, Deserialize)]
    struct Row {
        id: String,
        title: String,
    }

    #[tokio::test]
    async fn create_update_delete_roundtrip() {
        let db = memory().await;

        let id = db.create("quest", json!({ "title": "Slay dragon" })).await.unwrap();
        assert!(id.starts_with("quest:"));

        assert!(db.update(&id, json!({ "title": "Befriend dragon" })).await.unwrap());

        let mut vars = Vars::new();
        vars.insert("tb".into(), "quest".into());
        let rows: Vec<Row> = db
            .query("SELECT <string> id AS id, title FROM type::table($tb)", vars)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].title, "Befriend dragon");

        assert!(db.delete(&id).await.unwrap());
        assert!(!db.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn update_of_missing_record_reports_false() {
        let db = memory().await;
        assert!(!db.update("note:nope", json!({ "title": "x" })).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_record_id_is_rejected() {
        let db = memory().await;
        let err = db.delete("no-table-here").await.unwrap_err();
        assert!(matches!(err, ServiceError::Database(_)));
    }

    #[tokio::test]
    async fn query_errors_surface_as_database_errors() {
        let db = memory().await;
        let err = db.execute("THIS IS NOT SURREALQL").await.unwrap_err();
        assert!(matches!(err, ServiceError::Database(_)));
    }

    #[tokio::test]
    async fn clones_share_a_handle() {
        let a = memory().await;
        let b = a.clone();
        let c = memory().await;
        assert!(a.same_handle(&b));
        assert!(!a.same_handle(&c));
    }

    #[tokio::test]
    async fn handle_ref_does_not_outlive_the_connection() {
        let a = memory().await;
        let c = memory().await;
        let weak = a.downgrade();
        assert!(weak.refers_to(&a));
        assert!(!weak.refers_to(&c));
        assert!(!HandleRef::default().refers_to(&a));

        drop(a);
        assert!(!weak.refers_to(&c));
    }

    #[tokio::test]
    async fn remote_connector_reports_unreachable_service() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ServiceConfig::with_dirs("/cfg", "/data").with_port(port);
        let err = RemoteConnector
            .open(&config, &Credentials::new("altair", "secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Connection(_)));
    }
}
