//! Database value types
//!
//! This module defines the scalar values exchanged between native objects,
//! intermediate rows and backend drivers.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Database value that can hold different types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatabaseValue {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 8-bit signed integer
    TinyInt(i8),
    /// 8-bit unsigned integer
    UTinyInt(u8),
    /// 16-bit signed integer
    SmallInt(i16),
    /// 16-bit unsigned integer
    USmallInt(u16),
    /// 32-bit integer
    Int(i32),
    /// 32-bit unsigned integer
    UInt(u32),
    /// 64-bit integer
    Long(i64),
    /// 64-bit unsigned integer
    ULong(u64),
    /// 32-bit floating point
    Float(f32),
    /// 64-bit floating point
    Double(f64),
    /// Exact decimal kept in its textual form
    Decimal(String),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Date and time without zone
    DateTime(NaiveDateTime),
}

impl DatabaseValue {
    /// Get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(v) => Some(*v),
            DatabaseValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            other => other.as_long().map(|v| v != 0),
        }
    }

    /// Get the value as an i32
    pub fn as_int(&self) -> Option<i32> {
        match self {
            DatabaseValue::Int(v) => Some(*v),
            DatabaseValue::Float(v) => Some(*v as i32),
            DatabaseValue::Double(v) => Some(*v as i32),
            other => other.as_long().and_then(|v| i32::try_from(v).ok()),
        }
    }

    /// Get the value as an i64
    pub fn as_long(&self) -> Option<i64> {
        match self {
            DatabaseValue::TinyInt(v) => Some(i64::from(*v)),
            DatabaseValue::UTinyInt(v) => Some(i64::from(*v)),
            DatabaseValue::SmallInt(v) => Some(i64::from(*v)),
            DatabaseValue::USmallInt(v) => Some(i64::from(*v)),
            DatabaseValue::Int(v) => Some(i64::from(*v)),
            DatabaseValue::UInt(v) => Some(i64::from(*v)),
            DatabaseValue::Long(v) => Some(*v),
            DatabaseValue::ULong(v) => i64::try_from(*v).ok(),
            DatabaseValue::Float(v) => Some(*v as i64),
            DatabaseValue::Double(v) => Some(*v as i64),
            DatabaseValue::Decimal(s) | DatabaseValue::String(s) => s.trim().parse().ok(),
            DatabaseValue::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Get the value as a u64
    pub fn as_ulong(&self) -> Option<u64> {
        match self {
            DatabaseValue::ULong(v) => Some(*v),
            DatabaseValue::Decimal(s) | DatabaseValue::String(s) => s.trim().parse().ok(),
            other => other.as_long().and_then(|v| u64::try_from(v).ok()),
        }
    }

    /// Get the value as an f32
    pub fn as_float(&self) -> Option<f32> {
        match self {
            DatabaseValue::Float(v) => Some(*v),
            DatabaseValue::Double(v) => Some(*v as f32),
            other => other.as_double().map(|v| v as f32),
        }
    }

    /// Get the value as an f64
    pub fn as_double(&self) -> Option<f64> {
        match self {
            DatabaseValue::Double(v) => Some(*v),
            DatabaseValue::Float(v) => Some(f64::from(*v)),
            DatabaseValue::Decimal(s) | DatabaseValue::String(s) => s.trim().parse().ok(),
            DatabaseValue::ULong(v) => Some(*v as f64),
            other => other.as_long().map(|v| v as f64),
        }
    }

    /// Get the value as a string (zero-copy for String values)
    ///
    /// Returns a string reference without cloning for String and Decimal values.
    /// For other types, use `as_string()` which performs conversion.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) | DatabaseValue::Decimal(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get the value as a string (with conversion)
    pub fn as_string(&self) -> String {
        match self {
            DatabaseValue::Null => "null".to_string(),
            DatabaseValue::Bool(v) => v.to_string(),
            DatabaseValue::TinyInt(v) => v.to_string(),
            DatabaseValue::UTinyInt(v) => v.to_string(),
            DatabaseValue::SmallInt(v) => v.to_string(),
            DatabaseValue::USmallInt(v) => v.to_string(),
            DatabaseValue::Int(v) => v.to_string(),
            DatabaseValue::UInt(v) => v.to_string(),
            DatabaseValue::Long(v) => v.to_string(),
            DatabaseValue::ULong(v) => v.to_string(),
            DatabaseValue::Float(v) => v.to_string(),
            DatabaseValue::Double(v) => v.to_string(),
            DatabaseValue::Decimal(s) | DatabaseValue::String(s) => s.clone(),
            DatabaseValue::Bytes(b) => format!("<{} bytes>", b.len()),
            DatabaseValue::DateTime(v) => v.format(DATETIME_FORMAT).to_string(),
        }
    }

    /// Get the value as bytes (zero-copy)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DatabaseValue::Bytes(b) => Some(b),
            DatabaseValue::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Get the value as a date-time, parsing textual forms
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            DatabaseValue::DateTime(v) => Some(*v),
            DatabaseValue::String(s) => parse_datetime(s),
            _ => None,
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Check if the value is null or a numeric zero (an unset surrogate key)
    pub fn is_unset_key(&self) -> bool {
        match self {
            DatabaseValue::Null => true,
            DatabaseValue::Decimal(_) | DatabaseValue::String(_) | DatabaseValue::Bytes(_) => false,
            DatabaseValue::DateTime(_) | DatabaseValue::Bool(_) => false,
            DatabaseValue::Float(v) => *v == 0.0,
            DatabaseValue::Double(v) => *v == 0.0,
            DatabaseValue::ULong(v) => *v == 0,
            other => other.as_long() == Some(0),
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            DatabaseValue::Null => "null",
            DatabaseValue::Bool(_) => "bool",
            DatabaseValue::TinyInt(_) => "tinyint",
            DatabaseValue::UTinyInt(_) => "utinyint",
            DatabaseValue::SmallInt(_) => "smallint",
            DatabaseValue::USmallInt(_) => "usmallint",
            DatabaseValue::Int(_) => "int",
            DatabaseValue::UInt(_) => "uint",
            DatabaseValue::Long(_) => "long",
            DatabaseValue::ULong(_) => "ulong",
            DatabaseValue::Float(_) => "float",
            DatabaseValue::Double(_) => "double",
            DatabaseValue::Decimal(_) => "decimal",
            DatabaseValue::String(_) => "string",
            DatabaseValue::Bytes(_) => "bytes",
            DatabaseValue::DateTime(_) => "datetime",
        }
    }
}

/// Textual date-time layout used when a driver stores date-times as text
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(v) = NaiveDateTime::parse_from_str(s, DATETIME_FORMAT) {
        return Some(v);
    }
    if let Ok(v) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(v);
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

macro_rules! impl_from_scalar {
    ($($native:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$native> for DatabaseValue {
                fn from(v: $native) -> Self {
                    DatabaseValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool,
    i8 => TinyInt,
    u8 => UTinyInt,
    i16 => SmallInt,
    u16 => USmallInt,
    i32 => Int,
    u32 => UInt,
    i64 => Long,
    u64 => ULong,
    f32 => Float,
    f64 => Double,
    String => String,
    Vec<u8> => Bytes,
    NaiveDateTime => DateTime,
}

impl From<&str> for DatabaseValue {
    fn from(v: &str) -> Self {
        DatabaseValue::String(v.to_string())
    }
}

impl<T: Into<DatabaseValue>> From<Option<T>> for DatabaseValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// A row of database results (column name -> value mapping)
pub type DatabaseRow = HashMap<String, DatabaseValue>;

/// Multiple rows returned from a query
pub type DatabaseResult = Vec<DatabaseRow>;
