//! Connection Pool
//!
//! Per-target pooling of MongoDB client handles. One pool exists per distinct
//! driver-facing connection string (the collection is routed separately, so
//! tables over different collections of one database share a pool).
//!
//! The pool never blocks a caller waiting for a slot: when every handle is
//! busy and the pool is at its maximum, `acquire` returns `Ok(None)` and the
//! caller surfaces a connection-class failure. All pool state sits behind a
//! single async mutex; acquire, release, idle reaping and teardown are
//! serialized through it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{convert_driver_error, EngineError};
use crate::uri::MongoUri;

/// Creates live client handles for the pool. A seam so tests can stub the
/// network side.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, uri: &MongoUri) -> Result<Client, EngineError>;
}

/// Default connector: parses the driver-facing URI, applies timeouts, pings
/// the target database and probes the target collection.
pub struct DriverConnector {
    app_name: Option<String>,
    server_selection_timeout: Duration,
}

impl DriverConnector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            app_name: config.app_name.clone(),
            server_selection_timeout: config.connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for DriverConnector {
    async fn connect(&self, uri: &MongoUri) -> Result<Client, EngineError> {
        let mut options = ClientOptions::parse(uri.connection_string())
            .await
            .map_err(convert_driver_error)?;
        options.connect_timeout = Some(Duration::from_millis(uri.connect_timeout_ms.max(1) as u64));
        options.server_selection_timeout = Some(self.server_selection_timeout);
        if let Some(ref app_name) = self.app_name {
            options.app_name = Some(app_name.clone());
        }

        let client = Client::with_options(options).map_err(convert_driver_error)?;

        // Ping the target database; an unreachable or unauthorized target is
        // a hard connection failure.
        client
            .database(&uri.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(convert_driver_error)?;

        // Collection metadata probe. Non-fatal: the collection may not exist
        // yet and can be created later.
        if let Err(err) = client
            .database(&uri.database)
            .run_command(doc! { "collStats": uri.collection.as_str() })
            .await
        {
            debug!(
                target = %uri.safe_string(),
                error = %err,
                "collection metadata probe failed"
            );
        }

        Ok(client)
    }
}

/// A pooled client record. Owned exclusively by its pool; `in_use` marks the
/// record as handed out to exactly one caller.
struct PooledConnection {
    id: u64,
    client: Client,
    in_use: bool,
    last_used: Instant,
}

/// Handle returned by `acquire`. The caller must `release` it (or close the
/// owning table handle) when done; using a handle after release violates the
/// pool contract.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    client: Client,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Pool counters, exposed for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub entries: usize,
    pub busy: usize,
    pub total_created: u64,
}

struct PoolInner {
    entries: Vec<PooledConnection>,
    next_id: u64,
    total_created: u64,
}

/// Connection pool for one distinct connection target.
pub struct ConnectionPool {
    uri: MongoUri,
    max_connections: usize,
    idle_timeout: Duration,
    connector: Arc<dyn Connector>,
    inner: Mutex<PoolInner>,
}

impl ConnectionPool {
    pub fn new(uri: MongoUri, config: &EngineConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            uri,
            max_connections: config.max_connections,
            idle_timeout: config.idle_timeout,
            connector,
            inner: Mutex::new(PoolInner {
                entries: Vec::new(),
                next_id: 1,
                total_created: 0,
            }),
        }
    }

    /// Acquire a client handle.
    ///
    /// Expired idle entries are reaped first. An idle entry is reused when
    /// available; otherwise a new client is created if the pool is under its
    /// maximum. Returns `Ok(None)` when the pool is exhausted - this pool
    /// fails fast instead of queueing callers.
    pub async fn acquire(&self) -> Result<Option<ConnectionHandle>, EngineError> {
        let mut inner = self.inner.lock().await;

        self.reap_idle(&mut inner);

        if let Some(entry) = inner.entries.iter_mut().find(|e| !e.in_use) {
            entry.in_use = true;
            entry.last_used = Instant::now();
            debug!(id = entry.id, target = %self.uri.safe_string(), "reusing pooled connection");
            return Ok(Some(ConnectionHandle {
                id: entry.id,
                client: entry.client.clone(),
            }));
        }

        if inner.entries.len() >= self.max_connections {
            warn!(
                target = %self.uri.safe_string(),
                max = self.max_connections,
                "connection pool exhausted"
            );
            return Ok(None);
        }

        let client = self.connector.connect(&self.uri).await?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.total_created += 1;
        inner.entries.push(PooledConnection {
            id,
            client: client.clone(),
            in_use: true,
            last_used: Instant::now(),
        });
        info!(id, target = %self.uri.safe_string(), "opened new pooled connection");

        Ok(Some(ConnectionHandle { id, client }))
    }

    /// Return a handle to the pool. Unknown or already-idle handles are
    /// ignored - double release can happen during host-driven teardown races.
    pub async fn release(&self, handle: &ConnectionHandle) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner
            .entries
            .iter_mut()
            .find(|e| e.id == handle.id && e.in_use)
        {
            entry.in_use = false;
            entry.last_used = Instant::now();
            debug!(id = handle.id, "released pooled connection");
        }
    }

    /// Sanity invariant: entry count within bounds and no more busy handles
    /// than entries. Not a liveness probe.
    pub async fn is_healthy(&self) -> bool {
        let inner = self.inner.lock().await;
        let busy = inner.entries.iter().filter(|e| e.in_use).count();
        inner.entries.len() <= self.max_connections && busy <= inner.entries.len()
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        PoolStats {
            entries: inner.entries.len(),
            busy: inner.entries.iter().filter(|e| e.in_use).count(),
            total_created: inner.total_created,
        }
    }

    /// Close every pooled client. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        let dropped = inner.entries.len();
        inner.entries.clear();
        if dropped > 0 {
            info!(dropped, target = %self.uri.safe_string(), "connection pool shut down");
        }
    }

    /// The driver-facing connection string identifying this pool.
    pub fn target(&self) -> String {
        self.uri.connection_string()
    }

    fn reap_idle(&self, inner: &mut PoolInner) {
        let idle_timeout = self.idle_timeout;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|e| e.in_use || e.last_used.elapsed() <= idle_timeout);
        let reaped = before - inner.entries.len();
        if reaped > 0 {
            debug!(reaped, target = %self.uri.safe_string(), "reaped idle connections");
        }
    }
}

/// Probe a connection string end to end: parse, connect, ping. Used by table
/// creation to validate the option before any data access.
pub async fn test_connection(raw: &str) -> Result<(), EngineError> {
    let uri = MongoUri::parse(raw)?;
    let options = ClientOptions::parse(uri.connection_string())
        .await
        .map_err(convert_driver_error)?;
    let client = Client::with_options(options).map_err(convert_driver_error)?;
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .map_err(convert_driver_error)?;
    Ok(())
}
