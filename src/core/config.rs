//! Facade configuration
//!
//! Loaded from JSON or built in code; every field has a default so partial
//! documents are accepted.

use super::database::ConnectionBuilder;
use super::database_types::DatabaseType;
use super::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff for connection acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total connection attempts, the first one included
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff_ms: u64,
    /// Upper bound for a single delay
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no delay
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Configuration of a [`DataBase`](crate::facade::DataBase)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataBaseConfig {
    /// Dialect used to render statements
    pub database_type: DatabaseType,
    /// Driver specific connection string
    pub connection_string: String,
    pub retry: RetryPolicy,
    /// Skip the check of type maps against the backend's primitive kinds
    pub allow_invalid_primitives: bool,
    /// Timeout for a single database operation
    pub operation_timeout_ms: u64,
}

impl Default for DataBaseConfig {
    fn default() -> Self {
        Self {
            database_type: DatabaseType::Sqlite,
            connection_string: String::new(),
            retry: RetryPolicy::default(),
            allow_invalid_primitives: false,
            operation_timeout_ms: 30_000,
        }
    }
}

impl DataBaseConfig {
    pub fn new(database_type: DatabaseType, connection_string: impl Into<String>) -> Self {
        Self {
            database_type,
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    /// Configuration for the connection string a builder renders
    pub fn from_connection(builder: &ConnectionBuilder) -> Self {
        Self::new(builder.database_type(), builder.build_connection_string())
    }

    /// Parse a JSON document
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::InvalidConfig`](super::error::DatabaseError::InvalidConfig)
    /// for malformed documents.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_allow_invalid_primitives(mut self, allow: bool) -> Self {
        self.allow_invalid_primitives = allow;
        self
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}
