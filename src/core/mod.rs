//! Core database types and traits
//!
//! Errors, values, dialects, configuration, the driver traits and the
//! statement builder shared by the mapping engine and the backends.

pub mod config;
pub mod database;
pub mod database_types;
pub mod error;
pub mod query_builder;
pub mod transaction;
pub mod value;

// Re-export commonly used types
pub use config::{DataBaseConfig, RetryPolicy};
pub use database::{ConnectionBuilder, Connector, Database, DatabaseObject, ExecuteOutcome};
pub use database_types::DatabaseType;
pub use error::{CallbackError, DatabaseError, ErrorCategory, Result};
pub use query_builder::{
    BoundParameter, DeleteBuilder, InsertBuilder, Operator, SelectBuilder, Statement, UpdateBuilder,
    WhereCondition,
};
pub use transaction::TransactionGuard;
pub use value::{DatabaseResult, DatabaseRow, DatabaseValue};
