//! Graph engine
//!
//! Loads, saves and deletes object graphs over one connection. A [`Session`]
//! carries the connection, the dialect its statements are rendered in and the
//! command hook that observes every statement sent.

pub mod load;
pub mod save;
pub mod status;

pub use load::Loader;
pub use save::{delete_object, save_object};
pub use status::{DbStatus, StatusCode};

use crate::core::database::{DatabaseObject, ExecuteOutcome};
use crate::core::database_types::DatabaseType;
use crate::core::error::Result;
use crate::core::query_builder::Statement;
use crate::core::transaction::TransactionGuard;
use crate::core::value::DatabaseResult;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future used by recursive graph traversal
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Observer invoked with every statement before it is sent
pub type CommandHook = Arc<dyn Fn(&Statement) + Send + Sync>;

/// One connection plus the dialect and hook used on it
#[derive(Clone)]
pub struct Session {
    conn: Arc<dyn DatabaseObject>,
    backend: DatabaseType,
    allow_invalid_primitives: bool,
    hook: Option<CommandHook>,
}

impl Session {
    /// Session speaking the connection's own dialect
    pub fn new(conn: Arc<dyn DatabaseObject>) -> Self {
        let backend = conn.database_type();
        Self {
            conn,
            backend,
            allow_invalid_primitives: false,
            hook: None,
        }
    }

    /// Bind kinds the dialect rejects with their neutral parameter kind
    #[must_use]
    pub fn with_invalid_primitives(mut self, allow: bool) -> Self {
        self.allow_invalid_primitives = allow;
        self
    }

    pub fn allows_invalid_primitives(&self) -> bool {
        self.allow_invalid_primitives
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Option<CommandHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn backend(&self) -> DatabaseType {
        self.backend
    }

    pub fn connection(&self) -> &Arc<dyn DatabaseObject> {
        &self.conn
    }

    pub(crate) fn notify(&self, statement: &Statement) {
        tracing::trace!(sql = %statement.text, params = statement.parameters.len(), "statement");
        if let Some(hook) = &self.hook {
            hook(statement);
        }
    }

    pub async fn query(&self, statement: &Statement) -> Result<DatabaseResult> {
        self.notify(statement);
        self.conn
            .query_with_params(&statement.text, &statement.values())
            .await
    }

    pub async fn execute(&self, statement: &Statement) -> Result<u64> {
        self.notify(statement);
        self.conn
            .execute_with_params(&statement.text, &statement.values())
            .await
    }

    pub(crate) async fn begin(&self) -> Result<TransactionGuard> {
        TransactionGuard::begin(Arc::clone(&self.conn)).await
    }

    pub(crate) async fn run_in(
        &self,
        tx: &TransactionGuard,
        statement: &Statement,
    ) -> Result<ExecuteOutcome> {
        self.notify(statement);
        tx.run_with_identity(statement).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend)
            .field("allow_invalid_primitives", &self.allow_invalid_primitives)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}
