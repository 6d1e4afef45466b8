//! Public entry points
//!
//! [`DataBase`] wires the registry, the statement builder and the graph engine
//! to a [`Connector`]. Every operation opens its own connection, so one
//! `DataBase` can be shared between tasks.
//!
//! Configuration errors (bad metadata, unknown columns) are returned as `Err`;
//! every other failure is reported as [`DbStatus::ExceptionThrown`].

use crate::core::config::DataBaseConfig;
use crate::core::database::{Connector, DatabaseObject};
use crate::core::database_types::DatabaseType;
use crate::core::error::{DatabaseError, ErrorCategory, Result};
use crate::core::query_builder::{Statement, WhereCondition};
use crate::core::value::{DatabaseResult, DatabaseValue};
use crate::engine::{self, CommandHook, DbStatus, Session};
use crate::mapping::registry::{self, TypeRegistry};
use crate::mapping::schema::Entity;
use crate::mapping::type_map::TypeMap;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;

/// Mapping engine bound to one backend
pub struct DataBase {
    connector: Arc<dyn Connector>,
    config: DataBaseConfig,
    backend: DatabaseType,
    hook: RwLock<Option<CommandHook>>,
}

impl DataBase {
    /// Open a SQLite database file described by `config`
    ///
    /// Other backends need an external driver; use [`DataBase::with_connector`].
    #[cfg(feature = "sqlite")]
    pub async fn open(config: DataBaseConfig) -> Result<Self> {
        if !matches!(config.database_type, DatabaseType::Sqlite | DatabaseType::None) {
            return Err(DatabaseError::unsupported(format!(
                "no bundled driver for {}; pass a connector",
                config.database_type
            )));
        }
        let connector = crate::backends::SqliteConnector::new(config.connection_string.clone())
            .timeout(config.operation_timeout());
        Self::with_connector(Arc::new(connector), config).await
    }

    #[cfg(feature = "sqlite")]
    pub fn open_blocking(config: DataBaseConfig) -> Result<Self> {
        block_on(Self::open(config))?
    }

    /// Bind to an external driver
    ///
    /// Probes one connection and checks every type map resolved so far against
    /// the backend's primitive kinds.
    pub async fn with_connector(connector: Arc<dyn Connector>, config: DataBaseConfig) -> Result<Self> {
        let backend = connector.database_type();
        if config.database_type != DatabaseType::None && config.database_type != backend {
            return Err(DatabaseError::configuration(format!(
                "configured for {} but the connector speaks {}",
                config.database_type, backend
            )));
        }

        let db = Self {
            connector,
            config,
            backend,
            hook: RwLock::new(None),
        };
        if !db.config.allow_invalid_primitives {
            for map in TypeRegistry::global().cached() {
                map.check_backend(backend)?;
            }
        }
        let first = db.connect().await?;
        first.disconnect().await?;
        tracing::debug!(backend = %backend, "database opened");
        Ok(db)
    }

    pub fn backend(&self) -> DatabaseType {
        self.backend
    }

    pub fn config(&self) -> &DataBaseConfig {
        &self.config
    }

    /// Observe every statement sent by this database
    pub fn on_command_executed<F>(&self, hook: F)
    where
        F: Fn(&Statement) + Send + Sync + 'static,
    {
        *self.hook.write() = Some(Arc::new(hook));
    }

    pub fn clear_command_hook(&self) {
        *self.hook.write() = None;
    }

    /// Resolve `T` now and check it against the backend
    pub fn initialize<T: Entity>(&self) -> Result<()> {
        self.map_of::<T>().map(|_| ())
    }

    fn map_of<T: Entity>(&self) -> Result<Arc<TypeMap>> {
        let map = registry::resolve::<T>()?;
        if !self.config.allow_invalid_primitives {
            map.check_backend(self.backend)?;
        }
        Ok(map)
    }

    /// Open a connection, retrying with backoff
    async fn connect(&self) -> Result<Arc<dyn DatabaseObject>> {
        let retry = self.config.retry;
        let attempts = retry.attempts();
        let mut attempt = 1;
        loop {
            match self.connector.connect().await {
                Ok(conn) => return Ok(conn),
                Err(e) if attempts == 1 => return Err(e),
                Err(e) if attempt >= attempts => {
                    return Err(DatabaseError::RetriesExhausted {
                        attempts,
                        source: Box::new(e),
                    })
                }
                Err(e) => {
                    let delay = retry.backoff(attempt);
                    tracing::warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "connection failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn session(&self) -> Result<Session> {
        let conn = self.connect().await?;
        Ok(Session::new(conn)
            .with_invalid_primitives(self.config.allow_invalid_primitives)
            .with_hook(self.hook.read().clone()))
    }

    /// Load the object whose single key column equals `key`
    pub async fn load_by_key<T: Entity>(&self, key: impl Into<DatabaseValue>) -> Result<DbStatus<T>> {
        let key = key.into();
        let result = async {
            let map = self.map_of::<T>()?;
            let condition = engine::load::key_condition(&map, key)?;
            let session = self.session().await?;
            engine::load::load_unique::<T>(&session, map, Some(condition)).await
        }
        .await;
        settle(result)
    }

    /// Load the object matching every `(column, value)` pair
    pub async fn load_by_conditions<T, C, V>(&self, conditions: &[(C, V)]) -> Result<DbStatus<T>>
    where
        T: Entity,
        C: AsRef<str>,
        V: Clone + Into<DatabaseValue>,
    {
        let condition = WhereCondition::all_equal(
            conditions
                .iter()
                .map(|(column, value)| (column.as_ref().to_string(), value.clone())),
        );
        let result = async {
            let map = self.map_of::<T>()?;
            let session = self.session().await?;
            engine::load::load_unique::<T>(&session, map, condition).await
        }
        .await;
        settle(result)
    }

    /// Save an object and everything reachable from it
    pub async fn save<T: Entity>(&self, object: &mut T) -> Result<DbStatus> {
        let result = async {
            let map = self.map_of::<T>()?;
            let session = self.session().await?;
            engine::save_object(&session, map, object).await
        }
        .await;
        settle(result)
    }

    /// Delete the row an object is stored in
    pub async fn delete<T: Entity>(&self, object: &T) -> Result<DbStatus> {
        let result = async {
            let map = self.map_of::<T>()?;
            let session = self.session().await?;
            engine::delete_object(&session, map, object).await
        }
        .await;
        settle(result)
    }

    /// Run raw SQL and return the single value of its first row
    ///
    /// `Null` when the query returns no rows.
    pub async fn execute_scalar(&self, sql: &str) -> Result<DatabaseValue> {
        let rows = self.execute_reader(sql).await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(DatabaseValue::Null);
        };
        if row.len() != 1 {
            return Err(DatabaseError::query(format!(
                "scalar query returned {} columns",
                row.len()
            )));
        }
        Ok(row.into_values().next().unwrap_or(DatabaseValue::Null))
    }

    /// Run raw SQL and collect its rows, bypassing the mapping engine
    pub async fn execute_reader(&self, sql: &str) -> Result<DatabaseResult> {
        let session = self.session().await?;
        session.query(&Statement::raw(sql)).await
    }

    pub fn load_by_key_blocking<T: Entity>(&self, key: impl Into<DatabaseValue>) -> Result<DbStatus<T>> {
        block_on(self.load_by_key::<T>(key))?
    }

    pub fn load_by_conditions_blocking<T, C, V>(&self, conditions: &[(C, V)]) -> Result<DbStatus<T>>
    where
        T: Entity,
        C: AsRef<str>,
        V: Clone + Into<DatabaseValue>,
    {
        block_on(self.load_by_conditions::<T, C, V>(conditions))?
    }

    pub fn save_blocking<T: Entity>(&self, object: &mut T) -> Result<DbStatus> {
        block_on(self.save(object))?
    }

    pub fn delete_blocking<T: Entity>(&self, object: &T) -> Result<DbStatus> {
        block_on(self.delete(object))?
    }

    pub fn execute_scalar_blocking(&self, sql: &str) -> Result<DatabaseValue> {
        block_on(self.execute_scalar(sql))?
    }

    pub fn execute_reader_blocking(&self, sql: &str) -> Result<DatabaseResult> {
        block_on(self.execute_reader(sql))?
    }
}

impl std::fmt::Debug for DataBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBase")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .finish()
    }
}

/// Keep configuration errors as errors, turn the rest into a status
fn settle<T>(result: Result<DbStatus<T>>) -> Result<DbStatus<T>> {
    match result {
        Ok(status) => Ok(status),
        Err(e) if e.category() == ErrorCategory::Configuration => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "database operation failed");
            Ok(DbStatus::ExceptionThrown(e))
        }
    }
}

/// Drive a future on a private current-thread runtime
fn block_on<F: Future>(future: F) -> Result<F::Output> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(DatabaseError::unsupported(
            "blocking call inside an async runtime; use the async variant",
        ));
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| DatabaseError::other(format!("failed to start runtime: {}", e)))?;
    Ok(runtime.block_on(future))
}
