//! Engine Runtime
//!
//! Process-scoped state shared by every open table: one connection pool per
//! distinct connection target and one schema registry per target. Lookup is
//! lock-then-clone; no registry lock is ever held across a network call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use mongodb::options::ClientOptions;
use mongodb::Client;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{convert_driver_error, EngineError};
use crate::pool::{ConnectionPool, Connector, DriverConnector};
use crate::schema::SchemaRegistry;
use crate::uri::MongoUri;

/// Shared engine state. One instance lives for the life of the plugin.
pub struct EngineRuntime {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    pools: Mutex<HashMap<String, Arc<ConnectionPool>>>,
    schemas: Mutex<HashMap<String, Arc<SchemaRegistry>>>,
}

impl EngineRuntime {
    pub fn new(config: EngineConfig) -> Result<Arc<Self>, EngineError> {
        config.validate()?;
        let connector = Arc::new(DriverConnector::new(&config));
        Ok(Self::with_connector(config, connector))
    }

    /// Build a runtime with a custom connector. Test seam.
    pub fn with_connector(config: EngineConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            pools: Mutex::new(HashMap::new()),
            schemas: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The pool for a connection target, created on first use. Pure registry
    /// lookup; no network traffic happens here.
    pub fn pool_for(&self, uri: &MongoUri) -> Arc<ConnectionPool> {
        let key = uri.connection_string();
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = pools.get(&key) {
            return Arc::clone(pool);
        }

        debug!(target = %uri.safe_string(), "creating connection pool");
        let pool = Arc::new(ConnectionPool::new(
            uri.clone(),
            &self.config,
            Arc::clone(&self.connector),
        ));
        pools.insert(key, Arc::clone(&pool));
        pool
    }

    /// The schema registry for a connection target, created on first use.
    ///
    /// Registry creation builds a dedicated sampling client. The client is
    /// constructed outside the registry lock; a concurrent creator winning
    /// the race is kept and the loser's client is dropped.
    pub async fn schema_registry_for(
        &self,
        uri: &MongoUri,
    ) -> Result<Arc<SchemaRegistry>, EngineError> {
        let key = uri.connection_string();

        {
            let schemas = self.schemas.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(registry) = schemas.get(&key) {
                return Ok(Arc::clone(registry));
            }
        }

        let client = self.sampling_client(uri).await?;
        let registry = Arc::new(
            SchemaRegistry::new(
                client,
                self.config.schema_cache_ttl,
                self.config.schema_sample_size,
            )
            .with_cache_enabled(self.config.enable_schema_cache),
        );

        let mut schemas = self.schemas.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = schemas
            .entry(key)
            .or_insert_with(|| Arc::clone(&registry));
        Ok(Arc::clone(entry))
    }

    async fn sampling_client(&self, uri: &MongoUri) -> Result<Client, EngineError> {
        let mut options = ClientOptions::parse(uri.connection_string())
            .await
            .map_err(convert_driver_error)?;
        options.server_selection_timeout = Some(self.config.connect_timeout);
        if let Some(ref app_name) = self.config.app_name {
            options.app_name = Some(app_name.clone());
        }
        Client::with_options(options).map_err(convert_driver_error)
    }

    /// Tear down every pool and schema cache. Idempotent; called when the
    /// plugin unloads.
    pub async fn shutdown(&self) {
        let pools: Vec<Arc<ConnectionPool>> = {
            let mut map = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
            map.drain().map(|(_, pool)| pool).collect()
        };
        for pool in &pools {
            pool.shutdown().await;
        }

        let registries: Vec<Arc<SchemaRegistry>> = {
            let mut map = self.schemas.lock().unwrap_or_else(PoisonError::into_inner);
            map.drain().map(|(_, registry)| registry).collect()
        };
        for registry in &registries {
            registry.clear_all();
        }

        if !pools.is_empty() || !registries.is_empty() {
            info!(
                pools = pools.len(),
                registries = registries.len(),
                "engine runtime shut down"
            );
        }
    }

    pub fn pool_count(&self) -> usize {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_are_shared_per_target() {
        let runtime = EngineRuntime::new(EngineConfig::default()).unwrap();
        let orders = MongoUri::parse("mongodb://localhost/shop/orders").unwrap();
        let users = MongoUri::parse("mongodb://localhost/shop/users").unwrap();
        let other = MongoUri::parse("mongodb://otherhost/shop/orders").unwrap();

        let a = runtime.pool_for(&orders);
        let b = runtime.pool_for(&orders);
        assert!(Arc::ptr_eq(&a, &b));

        // Different collections of one database share a pool; the collection
        // is not part of the driver-facing target.
        let c = runtime.pool_for(&users);
        assert!(Arc::ptr_eq(&a, &c));

        let d = runtime.pool_for(&other);
        assert!(!Arc::ptr_eq(&a, &d));
        assert_eq!(runtime.pool_count(), 2);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            max_connections: 0,
            ..EngineConfig::default()
        };
        assert!(EngineRuntime::new(config).is_err());
    }

    #[tokio::test]
    async fn shutdown_clears_registries() {
        let runtime = EngineRuntime::new(EngineConfig::default()).unwrap();
        let uri = MongoUri::parse("mongodb://localhost/shop/orders").unwrap();
        let _ = runtime.pool_for(&uri);
        assert_eq!(runtime.pool_count(), 1);

        runtime.shutdown().await;
        assert_eq!(runtime.pool_count(), 0);

        runtime.shutdown().await;
        assert_eq!(runtime.pool_count(), 0);
    }
}
