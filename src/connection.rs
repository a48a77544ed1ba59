//! Per-process access point for application code
//!
//! Applications hold one `Arc<ConnectionManager>` built at their composition
//! root. The connection itself is cached only by the [`ServiceManager`], so a
//! `stop()` or `restart()` there invalidates it for every user. The first call
//! on each new handle runs the schema bootstrap; concurrent callers share that
//! single connect. [`ConnectionManager::close`] resets it.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::db::{DbConnection, HandleRef};
use crate::error::Result;
use crate::links::{self, Link, LinkedResource, Metadata};
use crate::manager::ServiceManager;
use crate::schema;
use crate::search::{self, SearchHit, DEFAULT_SEARCH_LIMIT};

pub struct ConnectionManager {
    service: Arc<ServiceManager>,
    /// Handle the schema was last bootstrapped on
    bootstrapped: Mutex<HandleRef>,
}

impl ConnectionManager {
    pub fn new(service: Arc<ServiceManager>) -> Self {
        Self {
            service,
            bootstrapped: Mutex::new(HandleRef::default()),
        }
    }

    /// Build and connect in one step.
    pub async fn open(service: Arc<ServiceManager>) -> Result<Arc<Self>> {
        let manager = Arc::new(Self::new(service));
        manager.connection().await?;
        Ok(manager)
    }

    pub fn service(&self) -> &Arc<ServiceManager> {
        &self.service
    }

    /// The bootstrapped connection, established on first use.
    pub async fn connection(&self) -> Result<DbConnection> {
        let mut bootstrapped = self.bootstrapped.lock().await;
        let connection = self.service.get_connection().await?;
        if !bootstrapped.refers_to(&connection) {
            bootstrap_schema(&connection).await?;
            *bootstrapped = connection.downgrade();
        }
        Ok(connection)
    }

    pub async fn create_link(
        &self,
        source: &str,
        target: &str,
        link_type: &str,
        metadata: Option<Metadata>,
        created_by: Option<&str>,
    ) -> Result<Link> {
        let db = self.connection().await?;
        links::create_link(&db, source, target, link_type, metadata, created_by).await
    }

    pub async fn remove_link(&self, source: &str, target: &str, link_type: &str) -> Result<usize> {
        let db = self.connection().await?;
        links::remove_link(&db, source, target, link_type).await
    }

    pub async fn linked_resources(&self, resource_id: &str) -> Result<Vec<LinkedResource>> {
        let db = self.connection().await?;
        links::linked_resources(&db, resource_id).await
    }

    pub async fn search_all(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.search_all_with_limit(query, DEFAULT_SEARCH_LIMIT).await
    }

    pub async fn search_all_with_limit(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let db = self.connection().await?;
        search::search_all(&db, query, limit).await
    }

    /// Drop the connection so the next call reconnects from scratch.
    pub async fn close(&self) {
        *self.bootstrapped.lock().await = HandleRef::default();
        self.service.close_connection().await;
        debug!("Connection manager closed");
    }
}

/// Define the shared tables, indexes and analyzer. Safe to repeat.
pub async fn bootstrap_schema(db: &DbConnection) -> Result<()> {
    db.execute(&schema::bootstrap_script()).await?;
    info!("Database schema ready");
    Ok(())
}
