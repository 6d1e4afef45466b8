//! # Rust ORM System
//!
//! An object-relational mapping engine: plain Rust types declare how they map onto
//! tables, and the engine loads, saves and deletes whole object graphs (one-to-one,
//! one-to-many and many-to-many relations) through parameterized, dialect-aware SQL.
//!
//! ## Features
//!
//! - **Explicit schemas**: every entity describes its columns, keys and relations with
//!   [`EntitySchema`]; the description is validated once and cached process-wide
//! - **Graph persistence**: saves run in one transaction, deletes before upserts, and
//!   generated identities flow into foreign keys and back onto the objects
//! - **Cycle-safe loading**: rows already loaded are shared instead of expanded again
//! - **Dialects**: MySQL (`ON DUPLICATE KEY`), MSSQL (`MERGE`) and SQLite (`ON CONFLICT`)
//! - **Async and blocking**: every facade operation comes in both forms
//!
//! ## Supported Databases
//!
//! | Database | Statements | Driver |
//! |----------|------------|--------|
//! | SQLite | yes | bundled (`sqlite` feature) |
//! | MySQL | yes | external, through [`Connector`] |
//! | MSSQL | yes | external, through [`Connector`] |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_orm_system::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct User {
//!     id: i32,
//!     name: String,
//! }
//!
//! impl Entity for User {
//!     fn schema() -> EntitySchema<Self> {
//!         EntitySchema::table("users")
//!             .identity("id", PrimitiveKind::Int32, |u: &User| &u.id, |u: &mut User| &mut u.id)
//!             .column("name", PrimitiveKind::Varchar, |u: &User| &u.name, |u: &mut User| &mut u.name)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let db = DataBase::open(DataBaseConfig::new(DatabaseType::Sqlite, "app.db")).await?;
//!
//!     let mut user = User { name: "ana".into(), ..User::default() };
//!     db.save(&mut user).await?;
//!
//!     if let DbStatus::Success(loaded) = db.load_by_key::<User>(user.id).await? {
//!         println!("loaded {}", loaded.name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Project Structure
//!
//! ```text
//! src/
//! ├── core/          # errors, values, dialects, config, driver traits, statements
//! ├── mapping/       # primitive kinds, foreign keys, schemas, type maps, rows
//! ├── engine/        # graph load, save and delete
//! ├── backends/      # SQLite driver
//! ├── facade.rs      # DataBase entry points
//! └── lib.rs
//! ```

/// Core database types and traits
pub mod core;

/// Object/table mapping
pub mod mapping;

/// Graph load, save and delete
pub mod engine;

/// Public entry points
pub mod facade;

/// Database backend implementations
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use rust_orm_system::prelude::*;
///
/// let status: DbStatus = DbStatus::NotFound;
/// assert_eq!(status.code(), 10);
/// ```
pub mod prelude {
    pub use crate::core::{
        ConnectionBuilder, Connector, DataBaseConfig, Database, DatabaseError, DatabaseResult,
        DatabaseRow, DatabaseType, DatabaseValue, Result, RetryPolicy, Statement, WhereCondition,
    };
    pub use crate::engine::{DbStatus, StatusCode};
    pub use crate::facade::DataBase;
    pub use crate::mapping::{Decimal, Entity, EntitySchema, ForeignKey, PrimitiveKind, RelatedRows};

    #[cfg(feature = "sqlite")]
    pub use crate::backends::{SqliteConnector, SqliteDatabase};
}

// Re-export at root level for convenience
pub use crate::core::{
    Connector, DataBaseConfig, Database, DatabaseError, DatabaseObject, DatabaseType, DatabaseValue,
    Result,
};
pub use engine::{DbStatus, StatusCode};
pub use facade::DataBase;
pub use mapping::{Entity, EntitySchema, ForeignKey, PrimitiveKind};

#[cfg(feature = "sqlite")]
pub use backends::{SqliteConnector, SqliteDatabase};
