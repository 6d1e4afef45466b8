//! Operation outcomes
//!
//! Cardinality outcomes are statuses, not errors: a missing row is an expected
//! result of a load.

use crate::core::error::DatabaseError;
use std::fmt;

/// Numeric status code of a facade operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0,
    NotFound = 10,
    MultipleFound = 11,
    ExceptionThrown = 20,
}

impl StatusCode {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn message(&self) -> &'static str {
        match self {
            StatusCode::Success => "Success",
            StatusCode::NotFound => "No Object was found.",
            StatusCode::MultipleFound => "Multiple objects were found.",
            StatusCode::ExceptionThrown => "An exception was thrown",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Outcome of a load, save or delete
#[derive(Debug)]
pub enum DbStatus<T = ()> {
    Success(T),
    NotFound,
    MultipleFound,
    /// The operation failed; a save was rolled back
    ExceptionThrown(DatabaseError),
}

impl<T> DbStatus<T> {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DbStatus::Success(_) => StatusCode::Success,
            DbStatus::NotFound => StatusCode::NotFound,
            DbStatus::MultipleFound => StatusCode::MultipleFound,
            DbStatus::ExceptionThrown(_) => StatusCode::ExceptionThrown,
        }
    }

    pub fn code(&self) -> u8 {
        self.status_code().code()
    }

    pub fn message(&self) -> &'static str {
        self.status_code().message()
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DbStatus::Success(_))
    }

    pub fn is_error(&self) -> bool {
        !self.is_success()
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            DbStatus::Success(data) => Some(data),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            DbStatus::Success(data) => Some(data),
            _ => None,
        }
    }

    /// Cause of an `ExceptionThrown` status
    pub fn error(&self) -> Option<&DatabaseError> {
        match self {
            DbStatus::ExceptionThrown(e) => Some(e),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> DbStatus<U> {
        match self {
            DbStatus::Success(data) => DbStatus::Success(f(data)),
            DbStatus::NotFound => DbStatus::NotFound,
            DbStatus::MultipleFound => DbStatus::MultipleFound,
            DbStatus::ExceptionThrown(e) => DbStatus::ExceptionThrown(e),
        }
    }
}

impl<T> fmt::Display for DbStatus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Database Operation Status: {}", self.status_code())?;
        if let DbStatus::ExceptionThrown(e) = self {
            write!(f, ": {}", e)?;
        }
        Ok(())
    }
}
