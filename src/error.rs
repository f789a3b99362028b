//! Engine Error Taxonomy
//!
//! Error classes surfaced by the storage engine core. Driver errors are
//! inspected and mapped onto this taxonomy before leaving the crate.

use thiserror::Error;

/// Storage engine error
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Schema inference failed: {0}")]
    SchemaInference(String),

    #[error("Row conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Map a MongoDB driver error onto the engine taxonomy.
///
/// Authentication and server-selection failures are connection-class errors;
/// invalid arguments indicate a malformed query; everything unrecognized
/// becomes a generic query failure.
pub fn convert_driver_error(err: mongodb::error::Error) -> EngineError {
    use mongodb::error::ErrorKind;

    match err.kind.as_ref() {
        ErrorKind::Authentication { .. } => EngineError::AuthenticationFailed(err.to_string()),
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
            EngineError::ConnectionFailed(err.to_string())
        }
        ErrorKind::ConnectionPoolCleared { .. } => EngineError::ConnectionFailed(err.to_string()),
        ErrorKind::InvalidArgument { .. } => EngineError::QueryFailed(err.to_string()),
        _ => EngineError::QueryFailed(err.to_string()),
    }
}
