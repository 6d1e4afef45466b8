//! SQLite backend
//!
//! A single rusqlite connection guarded by a tokio mutex. Every call runs on the
//! blocking pool and is raced against the operation timeout.

use crate::core::{
    database::{Connector, Database, DatabaseObject, ExecuteOutcome},
    database_types::DatabaseType,
    error::DatabaseError,
    error::Result,
    value::{DatabaseResult, DatabaseRow, DatabaseValue, DATETIME_FORMAT},
};
use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default timeout for database operations (30 seconds)
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite database implementation
pub struct SqliteDatabase {
    connection: Arc<Mutex<Option<Connection>>>,
    in_transaction: Arc<Mutex<bool>>,
    timeout: Duration,
}

impl SqliteDatabase {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_OPERATION_TIMEOUT)
    }

    /// Instance whose operations give up after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            connection: Arc::new(Mutex::new(None)),
            in_transaction: Arc::new(Mutex::new(false)),
            timeout,
        }
    }

    /// Convert a rusqlite Row to a DatabaseRow
    fn row_to_database_row(row: &Row) -> rusqlite::Result<DatabaseRow> {
        let mut db_row = DatabaseRow::new();
        let column_count = row.as_ref().column_count();

        for i in 0..column_count {
            let column_name = row.as_ref().column_name(i)?.to_string();
            let value = match row.get_ref(i)? {
                rusqlite::types::ValueRef::Null => DatabaseValue::Null,
                rusqlite::types::ValueRef::Integer(v) => DatabaseValue::Long(v),
                rusqlite::types::ValueRef::Real(v) => DatabaseValue::Double(v),
                rusqlite::types::ValueRef::Text(v) => {
                    DatabaseValue::String(String::from_utf8_lossy(v).to_string())
                }
                rusqlite::types::ValueRef::Blob(v) => DatabaseValue::Bytes(v.to_vec()),
            };
            db_row.insert(column_name, value);
        }

        Ok(db_row)
    }

    /// Convert DatabaseValue to rusqlite parameter
    fn value_to_param(value: &DatabaseValue) -> Box<dyn rusqlite::ToSql> {
        match value {
            DatabaseValue::Null => Box::new(None::<i64>),
            DatabaseValue::Bool(v) => Box::new(*v),
            DatabaseValue::TinyInt(v) => Box::new(*v),
            DatabaseValue::UTinyInt(v) => Box::new(*v),
            DatabaseValue::SmallInt(v) => Box::new(*v),
            DatabaseValue::USmallInt(v) => Box::new(*v),
            DatabaseValue::Int(v) => Box::new(*v),
            DatabaseValue::UInt(v) => Box::new(*v),
            DatabaseValue::Long(v) => Box::new(*v),
            DatabaseValue::ULong(v) => Box::new(*v),
            DatabaseValue::Float(v) => Box::new(f64::from(*v)),
            DatabaseValue::Double(v) => Box::new(*v),
            DatabaseValue::Decimal(v) | DatabaseValue::String(v) => Box::new(v.clone()),
            DatabaseValue::Bytes(v) => Box::new(v.clone()),
            DatabaseValue::DateTime(v) => Box::new(v.format(DATETIME_FORMAT).to_string()),
        }
    }

    fn collect_rows(
        conn: &Connection,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let params: Vec<Box<dyn rusqlite::ToSql>> = params.iter().map(Self::value_to_param).collect();
        let mut stmt = conn.prepare(query)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), Self::row_to_database_row)?;

        let mut results = Vec::new();
        for row_result in rows {
            results.push(row_result?);
        }
        Ok(results)
    }

    /// Run `work` against the open connection on the blocking pool
    async fn run_blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &Mutex<bool>) -> Result<T> + Send + 'static,
    {
        let connection_arc = Arc::clone(&self.connection);
        let in_transaction_arc = Arc::clone(&self.in_transaction);
        let timeout = self.timeout;

        let mut task = tokio::task::spawn_blocking(move || -> Result<T> {
            let connection = connection_arc.blocking_lock();
            let conn = connection
                .as_ref()
                .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
            work(conn, &in_transaction_arc)
        });

        // Abort the task on timeout so the connection lock is not held forever
        tokio::select! {
            result = &mut task => {
                result.map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))?
            }
            _ = tokio::time::sleep(timeout) => {
                task.abort();
                Err(DatabaseError::query_timeout(timeout.as_millis() as u64))
            }
        }
    }
}

impl Default for SqliteDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        *self.connection.lock().await = None;
        *self.in_transaction.lock().await = false;

        let connection_string = connection_string.to_string();
        let connection_arc = Arc::clone(&self.connection);
        let timeout = self.timeout;

        let mut task = tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Connection::open(&connection_string)?;
            conn.execute("PRAGMA foreign_keys = ON", [])?;
            conn.busy_timeout(timeout)?;

            *connection_arc.blocking_lock() = Some(conn);
            Ok(())
        });

        tokio::select! {
            result = &mut task => {
                result.map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))??
            }
            _ = tokio::time::sleep(timeout) => {
                task.abort();
                return Err(DatabaseError::connection_timeout(timeout.as_millis() as u64));
            }
        }

        tracing::debug!(backend = "sqlite", "connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection
            .try_lock()
            .map(|conn| conn.is_some())
            .unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        *self.in_transaction.lock().await = false;
        *self.connection.lock().await = None;
        Ok(())
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        tracing::trace!(sql = %query, "execute");
        let query = query.to_string();
        self.run_blocking(move |conn, _| Ok(conn.execute(&query, [])? as u64))
            .await
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        tracing::trace!(sql = %query, "query");
        let query = query.to_string();
        self.run_blocking(move |conn, _| Self::collect_rows(conn, &query, &[]))
            .await
    }

    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        tracing::trace!(sql = %query, params = params.len(), "query");
        let query = query.to_string();
        let params = params.to_vec();
        self.run_blocking(move |conn, _| Self::collect_rows(conn, &query, &params))
            .await
    }

    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        Database::execute_with_identity(self, query, params)
            .await
            .map(|outcome| outcome.rows_affected)
    }

    async fn execute_with_identity(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<ExecuteOutcome> {
        tracing::trace!(sql = %query, params = params.len(), "execute");
        let inserts = query
            .trim_start()
            .get(..6)
            .is_some_and(|verb| verb.eq_ignore_ascii_case("INSERT"));
        let query = query.to_string();
        let params = params.to_vec();
        self.run_blocking(move |conn, _| {
            let sql_params: Vec<Box<dyn rusqlite::ToSql>> =
                params.iter().map(Self::value_to_param).collect();
            let mut stmt = conn.prepare(&query)?;
            let affected = stmt.execute(params_from_iter(sql_params.iter()))? as u64;

            // last_insert_rowid is per connection, not per table
            Ok(ExecuteOutcome {
                rows_affected: affected,
                last_insert_id: (inserts && affected > 0).then(|| conn.last_insert_rowid()),
            })
        })
        .await
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.run_blocking(|conn, in_transaction| {
            let mut in_transaction = in_transaction.blocking_lock();
            if *in_transaction {
                return Err(DatabaseError::transaction("Already in a transaction"));
            }

            // Execute SQL first, only set flag on success
            conn.execute("BEGIN TRANSACTION", [])?;
            *in_transaction = true;
            Ok(())
        })
        .await
    }

    async fn commit(&self) -> Result<()> {
        self.run_blocking(|conn, in_transaction| {
            let mut in_transaction = in_transaction.blocking_lock();
            if !*in_transaction {
                return Err(DatabaseError::transaction("Not in a transaction"));
            }

            conn.execute("COMMIT", [])?;
            *in_transaction = false;
            Ok(())
        })
        .await
    }

    async fn rollback(&self) -> Result<()> {
        self.run_blocking(|conn, in_transaction| {
            let mut in_transaction = in_transaction.blocking_lock();
            if !*in_transaction {
                return Err(DatabaseError::transaction("Not in a transaction"));
            }

            conn.execute("ROLLBACK", [])?;
            *in_transaction = false;
            Ok(())
        })
        .await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
            .try_lock()
            .map(|guard| *guard)
            .unwrap_or(false)
    }
}

impl Drop for SqliteDatabase {
    fn drop(&mut self) {
        // Best effort; Drop cannot await
        if let Ok(in_trans) = self.in_transaction.try_lock() {
            if *in_trans {
                if let Ok(connection) = self.connection.try_lock() {
                    if let Some(conn) = connection.as_ref() {
                        let _ = conn.execute("ROLLBACK", []);
                    }
                }
            }
        }
    }
}

/// Opens a fresh [`SqliteDatabase`] on the same file for every operation
///
/// `:memory:` gives every connection its own empty database, so engine
/// operations need a file path.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: String,
    timeout: Duration,
}

impl SqliteConnector {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn connect(&self) -> Result<Arc<dyn DatabaseObject>> {
        let db = SqliteDatabase::with_timeout(self.timeout);
        Database::connect(&db, &self.path).await?;
        Ok(Arc::new(db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_connect() -> Result<()> {
        let db = SqliteDatabase::new();
        Database::connect(&db, ":memory:").await?;
        assert!(Database::is_connected(&db));
        Database::disconnect(&db).await?;
        assert!(!Database::is_connected(&db));
        Ok(())
    }

    #[tokio::test]
    async fn test_not_connected_is_connection_error() {
        let db = SqliteDatabase::new();
        let result = Database::execute(&db, "SELECT 1").await;
        assert!(matches!(result, Err(DatabaseError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn test_named_parameters_bind_in_order() -> Result<()> {
        let db = SqliteDatabase::new();
        Database::connect(&db, ":memory:").await?;
        Database::execute(&db, "CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT, score REAL)")
            .await?;

        let outcome = Database::execute_with_identity(
            &db,
            "INSERT INTO test(name,score) VALUES (@insertval_0_0,@insertval_0_1)",
            &[DatabaseValue::String("Alice".into()), DatabaseValue::Float(1.5)],
        )
        .await?;
        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(outcome.last_insert_id, Some(1));

        let rows = Database::query_with_params(
            &db,
            "SELECT * FROM test WHERE name=@whereparam0",
            &[DatabaseValue::String("Alice".into())],
        )
        .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("score"), Some(&DatabaseValue::Double(1.5)));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_reports_no_identity() -> Result<()> {
        let db = SqliteDatabase::new();
        Database::connect(&db, ":memory:").await?;
        Database::execute(&db, "CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)").await?;
        Database::execute(&db, "INSERT INTO test (name) VALUES ('a')").await?;

        let outcome = Database::execute_with_identity(
            &db,
            "UPDATE test SET name=@assignparam0",
            &[DatabaseValue::String("b".into())],
        )
        .await?;
        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(outcome.last_insert_id, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_first_rows_of_two_tables_both_report_identity() -> Result<()> {
        let db = SqliteDatabase::new();
        Database::connect(&db, ":memory:").await?;
        Database::execute(&db, "CREATE TABLE profiles (id INTEGER PRIMARY KEY, bio TEXT)").await?;
        Database::execute(&db, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)").await?;

        let profile = Database::execute_with_identity(
            &db,
            "INSERT INTO profiles(bio) VALUES (@insertval_0_0)",
            &[DatabaseValue::String("hi".into())],
        )
        .await?;
        let user = Database::execute_with_identity(
            &db,
            "INSERT INTO users(name) VALUES (@insertval_0_0)",
            &[DatabaseValue::String("ann".into())],
        )
        .await?;
        assert_eq!(profile.last_insert_id, Some(1));
        assert_eq!(user.last_insert_id, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_transaction() -> Result<()> {
        let db = SqliteDatabase::new();
        Database::connect(&db, ":memory:").await?;
        Database::execute(&db, "CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)").await?;

        Database::begin_transaction(&db).await?;
        assert!(Database::in_transaction(&db));
        assert!(Database::begin_transaction(&db).await.is_err());
        Database::execute(&db, "INSERT INTO test (name) VALUES ('Alice')").await?;
        Database::commit(&db).await?;
        assert!(!Database::in_transaction(&db));

        Database::begin_transaction(&db).await?;
        Database::execute(&db, "INSERT INTO test (name) VALUES ('Bob')").await?;
        Database::rollback(&db).await?;

        let results = Database::query(&db, "SELECT * FROM test").await?;
        assert_eq!(results.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_connector_shares_file() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|e| DatabaseError::other(e.to_string()))?;
        let path = dir.path().join("shared.db");
        let connector = SqliteConnector::new(path.to_string_lossy());

        let first = connector.connect().await?;
        first
            .execute("CREATE TABLE test (id INTEGER PRIMARY KEY)")
            .await?;
        first.execute("INSERT INTO test (id) VALUES (7)").await?;

        let second = connector.connect().await?;
        let rows = second.query("SELECT id FROM test").await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(connector.database_type(), DatabaseType::Sqlite);
        Ok(())
    }
}
