//! # mongobridge
//!
//! Storage engine core that exposes MongoDB collections as SQL tables.
//! Tables name their backing collection through an extended `mongodb://`
//! connection string; reads stream documents through a per-target connection
//! pool and convert them to SQL rows, with table schemas inferred by sampling
//! and predicates pushed down as MongoDB filters when they translate cleanly.
//!
//! The crate is organized along the read path:
//!
//! - [`uri`]: connection string parsing and rendering
//! - [`pool`]: fail-fast connection pooling per target
//! - [`schema`]: sampling-based schema inference with a TTL cache
//! - [`row`] / [`convert`]: document to row-buffer conversion
//! - [`condition`]: predicate pushdown translation
//! - [`handler`]: the per-table handler lifecycle
//! - [`runtime`]: process-scoped pools and registries

pub mod condition;
pub mod config;
pub mod convert;
pub mod error;
pub mod handler;
pub mod logging;
pub mod pool;
pub mod row;
pub mod runtime;
pub mod schema;
pub mod uri;

pub use condition::{translate, CompareOp, Condition, NotRepresentable};
pub use config::EngineConfig;
pub use convert::convert_document_to_row;
pub use error::EngineError;
pub use handler::{MongoTable, Pushdown, TableShare};
pub use logging::{init_logging, LogConfig};
pub use pool::{ConnectionHandle, ConnectionPool, PoolStats};
pub use row::{CellValue, TargetField};
pub use runtime::EngineRuntime;
pub use schema::{FieldMapping, SchemaRegistry, SqlType};
pub use uri::{validate_connection_string, MongoUri};
