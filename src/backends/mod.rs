//! Database backend implementations
//!
//! Drivers for the [`Database`](crate::core::Database) trait. MySQL and MSSQL
//! drivers live outside this crate and plug in through
//! [`Connector`](crate::core::Connector).

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnector, SqliteDatabase};
