//! Error types for the mapping engine
//!
//! This module defines all error types that can occur while resolving type maps,
//! building statements, materializing rows and talking to a backend.

/// Result type alias for mapping and database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Boxed error returned by user supplied callbacks and hooks
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Broad classification of a [`DatabaseError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad or missing metadata, raised while resolving a type map or building a statement
    Configuration,
    /// A fetched or assigned value does not fit its column binding
    Data,
    /// Connection or statement failure reported by the backend
    Backend,
}

/// Error types for mapping and database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Invalid type map or statement metadata
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Materializing or staging an object failed
    #[error("Object initialization failed: {context}")]
    ObjectInitialization {
        context: String,
        callback: Option<String>,
        #[source]
        source: CallbackError,
    },

    /// Primitive kind not supported by the active backend
    #[error("Primitive kind {kind} is not supported by {backend}")]
    UnsupportedPrimitive { kind: String, backend: String },

    /// Connection error (generic)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// Connection attempts exhausted
    #[error("Connection failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<DatabaseError>,
    },

    /// Query execution error
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Query timeout
    #[error("Query timeout after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// Type conversion error
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Column not found
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Unsupported operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Configuration document could not be parsed
    #[error("Invalid configuration document: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Configuration(msg.into())
    }

    /// Wrap a data or callback failure into an initialization error
    pub fn initialization<S: Into<String>>(
        context: S,
        source: impl Into<CallbackError>,
    ) -> Self {
        DatabaseError::ObjectInitialization {
            context: context.into(),
            callback: None,
            source: source.into(),
        }
    }

    /// Wrap a failure raised by the named user callback
    pub fn callback_failed(callback: impl Into<String>, source: CallbackError) -> Self {
        let callback = callback.into();
        DatabaseError::ObjectInitialization {
            context: format!("Exception occurred in user callback {}.", callback),
            callback: Some(callback),
            source,
        }
    }

    /// Create an unsupported primitive error
    pub fn unsupported_primitive(kind: impl ToString, backend: impl ToString) -> Self {
        DatabaseError::UnsupportedPrimitive {
            kind: kind.to_string(),
            backend: backend.to_string(),
        }
    }

    /// Create a new connection error (generic)
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::ConnectionError(msg.into())
    }

    /// Create a connection timeout error
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        DatabaseError::ConnectionTimeout { timeout_ms }
    }

    /// Create a new query error
    pub fn query<S: Into<String>>(msg: S) -> Self {
        DatabaseError::QueryError(msg.into())
    }

    /// Create a query timeout error
    pub fn query_timeout(timeout_ms: u64) -> Self {
        DatabaseError::QueryTimeout { timeout_ms }
    }

    /// Create a new type mismatch error
    pub fn type_mismatch(expected: &str, actual: &str) -> Self {
        DatabaseError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionError(msg.into())
    }

    /// Create a new unsupported operation error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        DatabaseError::UnsupportedOperation(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// Name of the user callback that raised this error, if any
    pub fn callback_name(&self) -> Option<&str> {
        match self {
            DatabaseError::ObjectInitialization { callback, .. } => callback.as_deref(),
            _ => None,
        }
    }

    /// Classify the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            DatabaseError::Configuration(_)
            | DatabaseError::UnsupportedOperation(_)
            | DatabaseError::InvalidConfig(_) => ErrorCategory::Configuration,
            DatabaseError::ObjectInitialization { .. }
            | DatabaseError::UnsupportedPrimitive { .. }
            | DatabaseError::TypeMismatch { .. }
            | DatabaseError::ColumnNotFound(_) => ErrorCategory::Data,
            _ => ErrorCategory::Backend,
        }
    }

    /// Check whether the error came from the backend
    pub fn is_backend(&self) -> bool {
        self.category() == ErrorCategory::Backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = DatabaseError::configuration("missing table");
        assert!(matches!(err, DatabaseError::Configuration(_)));

        let err = DatabaseError::query("Invalid SQL");
        assert!(matches!(err, DatabaseError::QueryError(_)));

        let err = DatabaseError::type_mismatch("i32", "String");
        assert!(matches!(err, DatabaseError::TypeMismatch { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = DatabaseError::connection("Connection refused");
        assert_eq!(err.to_string(), "Connection error: Connection refused");

        let err = DatabaseError::type_mismatch("i64", "f64");
        assert_eq!(err.to_string(), "Type mismatch: expected i64, got f64");
    }

    #[test]
    fn test_callback_failure_keeps_cause() {
        let cause: CallbackError = "disk on fire".into();
        let err = DatabaseError::callback_failed("User::load_name", cause);

        assert_eq!(err.callback_name(), Some("User::load_name"));
        assert_eq!(err.category(), ErrorCategory::Data);
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("disk on fire"));
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            DatabaseError::configuration("x").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            DatabaseError::ColumnNotFound("x".into()).category(),
            ErrorCategory::Data
        );
        assert!(DatabaseError::query("x").is_backend());
        assert!(DatabaseError::connection_timeout(5).is_backend());
    }
}
