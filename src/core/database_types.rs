//! Database type definitions
//!
//! This module defines the backends (and therefore SQL dialects) known to the engine.

use crate::mapping::primitive::PrimitiveKind;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
#[derive(Default)]
pub enum DatabaseType {
    /// No database type specified
    #[default]
    None = 0,
    /// MySQL/MariaDB database
    Mysql = 1,
    /// Microsoft SQL Server
    Mssql = 2,
    /// SQLite database
    Sqlite = 3,
}

const MSSQL_PRIMITIVES: &[PrimitiveKind] = &[
    PrimitiveKind::Int64,
    PrimitiveKind::Binary,
    PrimitiveKind::Boolean,
    PrimitiveKind::Char,
    PrimitiveKind::DateTime,
    PrimitiveKind::Decimal,
    PrimitiveKind::Double,
    PrimitiveKind::Varbinary,
    PrimitiveKind::Int32,
    PrimitiveKind::Text,
    PrimitiveKind::Varchar,
    PrimitiveKind::Float,
    PrimitiveKind::Int16,
    PrimitiveKind::UInt8,
    PrimitiveKind::Date,
    PrimitiveKind::Time,
];

impl DatabaseType {
    /// Convert database type to string representation
    pub fn to_str(&self) -> &'static str {
        match self {
            DatabaseType::None => "none",
            DatabaseType::Mysql => "mysql",
            DatabaseType::Mssql => "mssql",
            DatabaseType::Sqlite => "sqlite",
        }
    }

    /// Check if this database type speaks a SQL dialect
    pub fn is_sql(&self) -> bool {
        !matches!(self, DatabaseType::None)
    }

    /// Check if this database type supports transactions
    pub fn supports_transactions(&self) -> bool {
        self.is_sql()
    }

    /// Check whether the backend can store the given primitive kind
    pub fn supports(&self, kind: PrimitiveKind) -> bool {
        match self {
            DatabaseType::None => false,
            DatabaseType::Mysql | DatabaseType::Sqlite => kind.is_concrete(),
            DatabaseType::Mssql => MSSQL_PRIMITIVES.contains(&kind),
        }
    }

    /// All primitive kinds the backend can store
    pub fn supported_primitives(&self) -> Vec<PrimitiveKind> {
        PrimitiveKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.supports(*kind))
            .collect()
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(DatabaseType::None),
            "mysql" | "mariadb" => Ok(DatabaseType::Mysql),
            "mssql" | "sqlserver" => Ok(DatabaseType::Mssql),
            "sqlite" | "sqlite3" => Ok(DatabaseType::Sqlite),
            _ => Err(format!("Invalid database type: '{}'", s)),
        }
    }
}
