//! Transaction guard for automatic rollback on drop
//!
//! The save engine runs every statement of one save through a single guard.

use super::database::{DatabaseObject, ExecuteOutcome};
use super::error::{DatabaseError, Result};
use super::query_builder::Statement;
use super::value::DatabaseResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Transaction guard that rolls back on drop unless committed
///
/// # Example
///
/// ```ignore
/// let tx = TransactionGuard::begin(conn).await?;
/// tx.run(&delete).await?;
/// let outcome = tx.run_with_identity(&insert).await?;
/// tx.commit().await?;
/// ```
pub struct TransactionGuard {
    db: Arc<dyn DatabaseObject>,
    committed: AtomicBool,
    rolled_back: AtomicBool,
}

impl TransactionGuard {
    /// Begin a new transaction on the connection
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or already in a transaction
    pub async fn begin(db: Arc<dyn DatabaseObject>) -> Result<Self> {
        db.begin_transaction().await?;
        tracing::trace!(backend = %db.database_type(), "transaction started");

        Ok(Self {
            db,
            committed: AtomicBool::new(false),
            rolled_back: AtomicBool::new(false),
        })
    }

    fn ensure_active(&self) -> Result<()> {
        if self.committed.load(Ordering::Acquire) {
            return Err(DatabaseError::transaction(
                "Cannot execute on committed transaction",
            ));
        }
        if self.rolled_back.load(Ordering::Acquire) {
            return Err(DatabaseError::transaction(
                "Cannot execute on rolled back transaction",
            ));
        }
        Ok(())
    }

    /// Execute a statement, returning the affected row count
    pub async fn run(&self, statement: &Statement) -> Result<u64> {
        self.ensure_active()?;
        self.db
            .execute_with_params(&statement.text, &statement.values())
            .await
    }

    /// Execute a statement and collect the identity it generated
    pub async fn run_with_identity(&self, statement: &Statement) -> Result<ExecuteOutcome> {
        self.ensure_active()?;
        self.db
            .execute_with_identity(&statement.text, &statement.values())
            .await
    }

    /// Query within the transaction
    pub async fn query(&self, statement: &Statement) -> Result<DatabaseResult> {
        self.ensure_active()?;
        self.db
            .query_with_params(&statement.text, &statement.values())
            .await
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; the guard then rolls back on drop
    pub async fn commit(self) -> Result<()> {
        if self.rolled_back.load(Ordering::Acquire) {
            return Err(DatabaseError::transaction(
                "Cannot commit a rolled back transaction",
            ));
        }

        self.db.commit().await?;
        self.committed.store(true, Ordering::Release);
        Ok(())
    }

    /// Explicitly roll the transaction back
    pub async fn rollback(self) -> Result<()> {
        if self.committed.load(Ordering::Acquire) {
            return Err(DatabaseError::transaction(
                "Cannot rollback a committed transaction",
            ));
        }

        self.rolled_back.store(true, Ordering::Release);
        self.db.rollback().await
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back.load(Ordering::Acquire)
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if self.committed.load(Ordering::Acquire) || self.rolled_back.load(Ordering::Acquire) {
            return;
        }
        self.rolled_back.store(true, Ordering::Release);
        let db = Arc::clone(&self.db);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("transaction dropped without commit, rolling back");
                handle.spawn(async move {
                    if let Err(e) = db.rollback().await {
                        tracing::error!(error = %e, "auto-rollback failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    "transaction dropped outside a runtime; the backend rolls it back when the connection closes"
                );
            }
        }
    }
}
