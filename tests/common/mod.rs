//! Shared test fixtures: a driver that records statements instead of running them

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_orm_system::core::ExecuteOutcome;
use rust_orm_system::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// One statement as the driver received it
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

/// Driver that logs every statement and answers queries from a queue
///
/// Inserts and merges report a fresh identity; every execute touches one row.
pub struct RecordingDatabase {
    backend: DatabaseType,
    connected: AtomicBool,
    in_transaction: AtomicBool,
    next_id: AtomicI64,
    log: Mutex<Vec<Recorded>>,
    results: Mutex<VecDeque<DatabaseResult>>,
}

impl RecordingDatabase {
    pub fn new(backend: DatabaseType) -> Self {
        Self {
            backend,
            connected: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
            next_id: AtomicI64::new(1),
            log: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue the result of the next query
    pub fn push_result(&self, rows: DatabaseResult) {
        self.results.lock().push_back(rows);
    }

    pub fn statements(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.log.lock().iter().map(|r| r.sql.clone()).collect()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    fn record(&self, sql: &str, params: &[DatabaseValue]) {
        self.log.lock().push(Recorded {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    fn database_type(&self) -> DatabaseType {
        self.backend
    }

    async fn connect(&self, _connection_string: &str) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        Database::execute_with_params(self, query, &[]).await
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        Database::query_with_params(self, query, &[]).await
    }

    async fn query_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        self.record(query, params);
        Ok(self.results.lock().pop_front().unwrap_or_default())
    }

    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        Ok(Database::execute_with_identity(self, query, params).await?.rows_affected)
    }

    async fn execute_with_identity(&self, query: &str, params: &[DatabaseValue]) -> Result<ExecuteOutcome> {
        self.record(query, params);
        let inserts = query.starts_with("INSERT") || query.starts_with("MERGE");
        Ok(ExecuteOutcome {
            rows_affected: 1,
            last_insert_id: inserts.then(|| self.next_id.fetch_add(1, Ordering::SeqCst)),
        })
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.record("BEGIN", &[]);
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.record("COMMIT", &[]);
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.record("ROLLBACK", &[]);
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }
}

/// Hands out the same recording driver on every connect
pub struct RecordingConnector {
    pub db: Arc<RecordingDatabase>,
}

impl RecordingConnector {
    pub fn new(backend: DatabaseType) -> Self {
        Self {
            db: Arc::new(RecordingDatabase::new(backend)),
        }
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    fn database_type(&self) -> DatabaseType {
        self.db.backend
    }

    async fn connect(&self) -> Result<Arc<dyn rust_orm_system::DatabaseObject>> {
        let db: Arc<dyn rust_orm_system::DatabaseObject> = self.db.clone();
        Ok(db)
    }
}

/// Open a facade over a fresh recording driver
pub async fn recording(backend: DatabaseType) -> Result<(DataBase, Arc<RecordingDatabase>)> {
    recording_with(DataBaseConfig::new(backend, "recording")).await
}

/// Facade over a recording driver with an explicit configuration
pub async fn recording_with(config: DataBaseConfig) -> Result<(DataBase, Arc<RecordingDatabase>)> {
    let connector = Arc::new(RecordingConnector::new(config.database_type));
    let db = Arc::clone(&connector.db);
    let database = DataBase::with_connector(connector, config).await?;
    Ok((database, db))
}

/// Build a fetched row from column/value pairs
pub fn record(pairs: &[(&str, DatabaseValue)]) -> DatabaseRow {
    pairs
        .iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}
