//! Table Handler
//!
//! Per-table access path: the handler owns the table's parsed target, a
//! pooled connection while open, pushed-down filter state and the active
//! scan cursor. Mirrors the host server's handler lifecycle: open, optional
//! condition pushdown, scan_start / scan_next / scan_end, close.

use std::sync::Arc;

use futures::stream::StreamExt;
use mongodb::bson::Document;
use mongodb::{Collection, Cursor};
use tracing::{debug, info, warn};

use crate::condition::{translate, Condition};
use crate::convert::convert_document_to_row;
use crate::error::EngineError;
use crate::pool::ConnectionHandle;
use crate::row::TargetField;
use crate::runtime::EngineRuntime;
use crate::schema::table_key;
use crate::uri::MongoUri;

/// Immutable per-table metadata, shared by every handler on the same table.
#[derive(Debug, Clone)]
pub struct TableShare {
    pub uri: MongoUri,
    pub table_name: String,
}

impl TableShare {
    /// Parse the table's CONNECTION option. No network traffic; a bad
    /// connection string fails table open before anything is dialed.
    pub fn from_connection_string(table_name: &str, raw: &str) -> Result<Self, EngineError> {
        let uri = MongoUri::parse(raw)?;
        Ok(Self {
            uri,
            table_name: table_name.to_string(),
        })
    }
}

/// Outcome of offering a condition for pushdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushdown {
    /// The filter was translated; the server may skip re-evaluation.
    Handled,
    /// Not translatable; the scan runs unfiltered and the server evaluates
    /// the predicate itself.
    Declined,
}

struct ScanContext {
    cursor: Cursor<Document>,
    position: u64,
}

/// An open table. One handler instance serves one server-side table handle.
pub struct MongoTable {
    runtime: Arc<EngineRuntime>,
    share: TableShare,
    handle: Option<ConnectionHandle>,
    scan: Option<ScanContext>,
    filter: Option<Document>,
}

impl MongoTable {
    /// Open the table: validate the share and prepare handler state. The
    /// pooled connection is acquired lazily on first data access.
    pub fn open(runtime: Arc<EngineRuntime>, share: TableShare) -> Self {
        debug!(table = %share.table_name, target = %share.uri.safe_string(), "table opened");
        Self {
            runtime,
            share,
            handle: None,
            scan: None,
            filter: None,
        }
    }

    pub fn share(&self) -> &TableShare {
        &self.share
    }

    /// The handler's pooled connection, acquired on first use. Pool
    /// exhaustion is surfaced as an error here rather than blocking.
    async fn connection(&mut self) -> Result<ConnectionHandle, EngineError> {
        if let Some(ref handle) = self.handle {
            return Ok(handle.clone());
        }
        let pool = self.runtime.pool_for(&self.share.uri);
        let handle = pool.acquire().await?.ok_or_else(|| {
            EngineError::PoolExhausted(format!(
                "no connection available for {}",
                self.share.uri.safe_string()
            ))
        })?;
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    fn collection(&self, handle: &ConnectionHandle) -> Collection<Document> {
        handle
            .client()
            .database(&self.share.uri.database)
            .collection::<Document>(&self.share.uri.collection)
    }

    /// Offer a condition for pushdown. All-or-nothing: a partially
    /// translatable tree is declined entirely and any previously stored
    /// filter is kept.
    pub fn push_condition(&mut self, condition: &Condition) -> Pushdown {
        match translate(condition) {
            Ok(filter) => {
                debug!(table = %self.share.table_name, ?filter, "condition pushed down");
                self.filter = Some(filter);
                Pushdown::Handled
            }
            Err(_) => {
                debug!(table = %self.share.table_name, "condition declined, falling back to full scan");
                Pushdown::Declined
            }
        }
    }

    /// Clear pushed-down filter state at the end of the statement.
    pub fn pop_condition(&mut self) {
        self.filter = None;
    }

    /// Begin a full or filtered scan of the collection.
    pub async fn scan_start(&mut self, fields: &mut [TargetField]) -> Result<(), EngineError> {
        if self.scan.is_some() {
            self.scan_end();
        }
        if fields.is_empty() {
            return Err(EngineError::Internal(
                "scan started with no target columns".to_string(),
            ));
        }

        let filter = self.filter.clone().unwrap_or_default();
        let handle = self.connection().await?;
        let collection = self.collection(&handle);
        let cursor = collection
            .find(filter)
            .await
            .map_err(crate::error::convert_driver_error)?;

        self.scan = Some(ScanContext {
            cursor,
            position: 0,
        });
        Ok(())
    }

    /// Fetch the next row into the target buffer. Returns `Ok(false)` at end
    /// of scan.
    pub async fn scan_next(&mut self, fields: &mut [TargetField]) -> Result<bool, EngineError> {
        let scan = self.scan.as_mut().ok_or_else(|| {
            EngineError::Internal("scan_next called without an active scan".to_string())
        })?;

        match scan.cursor.next().await {
            Some(Ok(doc)) => {
                scan.position += 1;
                convert_document_to_row(&doc, fields)?;
                Ok(true)
            }
            Some(Err(err)) => {
                warn!(table = %self.share.table_name, error = %err, "cursor read failed");
                Err(crate::error::convert_driver_error(err))
            }
            None => Ok(false),
        }
    }

    /// End the scan and drop the cursor. Safe to call without an active scan.
    pub fn scan_end(&mut self) {
        if let Some(scan) = self.scan.take() {
            debug!(
                table = %self.share.table_name,
                rows = scan.position,
                "scan ended"
            );
        }
    }

    /// Row count for the optimizer, honoring the pushed-down filter.
    pub async fn row_count(&mut self) -> Result<u64, EngineError> {
        let filter = self.filter.clone().unwrap_or_default();
        let handle = self.connection().await?;
        let collection = self.collection(&handle);
        collection
            .count_documents(filter)
            .await
            .map_err(crate::error::convert_driver_error)
    }

    /// Resolve the table's columns from the schema registry, inferring on
    /// first access. An empty collection yields an empty column set.
    pub async fn resolve_fields(&mut self) -> Result<Vec<TargetField>, EngineError> {
        let registry = self
            .runtime
            .schema_registry_for(&self.share.uri)
            .await?;
        let database = self.share.uri.database.clone();
        let collection = self.share.uri.collection.clone();

        let inferred = registry.infer(&database, &collection).await?;
        if !inferred {
            return Ok(Vec::new());
        }

        let key = table_key(&database, &collection);
        let mappings = registry.get_mappings(&key).ok_or_else(|| {
            EngineError::SchemaInference(format!("no cached schema for {}", key))
        })?;
        Ok(mappings.iter().map(TargetField::from_mapping).collect())
    }

    /// Close the table: end any scan and return the connection to its pool.
    /// Idempotent.
    pub async fn close(&mut self) {
        self.scan_end();
        self.filter = None;
        if let Some(handle) = self.handle.take() {
            let pool = self.runtime.pool_for(&self.share.uri);
            pool.release(&handle).await;
            info!(table = %self.share.table_name, "table closed");
        }
    }

    /// Host lock-state transition hook. The engine delegates concurrency to
    /// MongoDB; nothing is tracked here.
    pub fn external_lock(&mut self, _locked: bool) -> Result<(), EngineError> {
        Ok(())
    }

    /// Transaction commit hook. Statements execute immediately; there is no
    /// buffered work to flush.
    pub fn commit(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Transaction rollback hook. Accepted and ignored; applied statements
    /// are not undone.
    pub fn rollback(&mut self) -> Result<(), EngineError> {
        warn!(table = %self.share.table_name, "rollback requested but statements are not transactional");
        Ok(())
    }
}
