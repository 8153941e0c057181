//! Key-value checkpoint backend (Redis protocol)

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{Context, ContextKind};
use crate::error::{ConnectorError, ConnectorResult};

/// Checkpoint context storing each name as one key under a namespace
pub struct KvContext {
    client: redis::Client,
    namespace: String,
    conn: OnceCell<MultiplexedConnection>,
}

impl KvContext {
    /// Create a context for a `redis://` endpoint. The connection is
    /// opened lazily on first use and then shared.
    pub fn new(endpoint: &str, namespace: impl Into<String>) -> ConnectorResult<Self> {
        let client = redis::Client::open(endpoint)
            .map_err(|e| ConnectorError::config(format!("invalid kv endpoint: {}", e)))?;
        Ok(Self {
            client,
            namespace: namespace.into(),
            conn: OnceCell::new(),
        })
    }

    /// Key namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Full key for a checkpoint name
    pub fn key(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.namespace, name)
        }
    }

    async fn connection(&self) -> ConnectorResult<MultiplexedConnection> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = self.client.get_multiplexed_async_connection().await?;
                info!(location = %self.location(), "Connected to kv checkpoint backend");
                Ok::<_, ConnectorError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl Context for KvContext {
    async fn store(&self, name: &str, value: &str) -> ConnectorResult<()> {
        let key = self.key(name);
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(&key, value).await?;
        debug!(key = %key, value, "Stored checkpoint");
        Ok(())
    }

    async fn load(&self, name: &str) -> ConnectorResult<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(self.key(name)).await?;
        Ok(value)
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Kv
    }

    fn location(&self) -> String {
        let info = self.client.get_connection_info();
        format!("{}/{}", info.addr, self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_namespacing() {
        let ctx = KvContext::new("redis://localhost:6379/", "agents/eu").unwrap();
        assert_eq!(ctx.key("orders.offset"), "agents/eu/orders.offset");
        assert_eq!(ctx.kind(), ContextKind::Kv);

        let ctx = KvContext::new("redis://localhost:6379/", "").unwrap();
        assert_eq!(ctx.key("orders.offset"), "orders.offset");
    }

    #[tokio::test]
    #[ignore = "Requires a Redis server - set TRIBUTARY_TEST_REDIS_URL and run with --ignored"]
    async fn test_store_load_roundtrip_against_redis() {
        let endpoint = std::env::var("TRIBUTARY_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string());
        let namespace = format!("tributary-test/{}", uuid::Uuid::new_v4());
        let ctx = KvContext::new(&endpoint, namespace.clone()).unwrap();

        assert_eq!(ctx.load("orders.offset").await.unwrap(), None);
        ctx.store("orders.offset", "41").await.unwrap();
        ctx.store("orders.offset", "42").await.unwrap();
        assert_eq!(
            ctx.load("orders.offset").await.unwrap().as_deref(),
            Some("42")
        );

        // stored under `<namespace>/<name>`, readable by any client
        let mut raw = redis::Client::open(endpoint.as_str())
            .unwrap()
            .get_multiplexed_async_connection()
            .await
            .unwrap();
        let key = format!("{}/orders.offset", namespace);
        let stored: Option<String> = raw.get(&key).await.unwrap();
        assert_eq!(stored.as_deref(), Some("42"));

        raw.del::<_, ()>(&key).await.unwrap();
    }

    #[test]
    fn test_location_hides_password() {
        let ctx = KvContext::new("redis://:hunter2@localhost:6379/", "p").unwrap();
        assert!(!ctx.location().contains("hunter2"));
        assert!(ctx.location().contains("localhost"));
    }
}
