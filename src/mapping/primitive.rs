//! Primitive type system
//!
//! Every column is declared with a [`PrimitiveKind`]. A kind fixes the native value
//! shape stored in intermediate rows, the parameter kind used when binding it, and
//! whether a backend is able to store it at all.

use crate::core::database_types::DatabaseType;
use crate::core::error::{DatabaseError, Result};
use crate::core::value::DatabaseValue;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;
use std::str::FromStr;

/// Database representable scalar kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    /// No kind; never valid in a type map
    None,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int24,
    UInt24,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Decimal,
    Float,
    Double,
    Bit,
    Boolean,
    Char,
    Varchar,
    Text,
    Binary,
    Varbinary,
    Date,
    DateTime,
    Timestamp,
    Time,
    Year,
    /// Derive the kind from the native field type
    Infer,
}

/// Native value shape a primitive kind is exchanged as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeShape {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Decimal,
    F32,
    F64,
    Text,
    Bytes,
    DateTime,
}

/// Backend neutral parameter kind attached to bound statement parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    Binary,
    Boolean,
    StringFixedLength,
    String,
    Date,
    DateTime,
    Time,
    Decimal,
    Double,
    Single,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
}

/// How far a value may be bent to fit a shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Only range-checked, information preserving conversions
    Exact,
    /// Any conversion the value accessors can perform
    Lossy,
}

impl PrimitiveKind {
    /// Every kind, in declaration order
    pub const ALL: [PrimitiveKind; 27] = [
        PrimitiveKind::None,
        PrimitiveKind::Int8,
        PrimitiveKind::UInt8,
        PrimitiveKind::Int16,
        PrimitiveKind::UInt16,
        PrimitiveKind::Int24,
        PrimitiveKind::UInt24,
        PrimitiveKind::Int32,
        PrimitiveKind::UInt32,
        PrimitiveKind::Int64,
        PrimitiveKind::UInt64,
        PrimitiveKind::Decimal,
        PrimitiveKind::Float,
        PrimitiveKind::Double,
        PrimitiveKind::Bit,
        PrimitiveKind::Boolean,
        PrimitiveKind::Char,
        PrimitiveKind::Varchar,
        PrimitiveKind::Text,
        PrimitiveKind::Binary,
        PrimitiveKind::Varbinary,
        PrimitiveKind::Date,
        PrimitiveKind::DateTime,
        PrimitiveKind::Timestamp,
        PrimitiveKind::Time,
        PrimitiveKind::Year,
        PrimitiveKind::Infer,
    ];

    /// Lowercase name of the kind
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveKind::None => "none",
            PrimitiveKind::Int8 => "int8",
            PrimitiveKind::UInt8 => "uint8",
            PrimitiveKind::Int16 => "int16",
            PrimitiveKind::UInt16 => "uint16",
            PrimitiveKind::Int24 => "int24",
            PrimitiveKind::UInt24 => "uint24",
            PrimitiveKind::Int32 => "int32",
            PrimitiveKind::UInt32 => "uint32",
            PrimitiveKind::Int64 => "int64",
            PrimitiveKind::UInt64 => "uint64",
            PrimitiveKind::Decimal => "decimal",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
            PrimitiveKind::Bit => "bit",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Varchar => "varchar",
            PrimitiveKind::Text => "text",
            PrimitiveKind::Binary => "binary",
            PrimitiveKind::Varbinary => "varbinary",
            PrimitiveKind::Date => "date",
            PrimitiveKind::DateTime => "datetime",
            PrimitiveKind::Timestamp => "timestamp",
            PrimitiveKind::Time => "time",
            PrimitiveKind::Year => "year",
            PrimitiveKind::Infer => "infer",
        }
    }

    /// Whether the kind names real storage (not `None` or `Infer`)
    pub fn is_concrete(&self) -> bool {
        !matches!(self, PrimitiveKind::None | PrimitiveKind::Infer)
    }

    /// The native value shape this kind is exchanged as
    pub fn native_shape(&self) -> Option<NativeShape> {
        let shape = match self {
            PrimitiveKind::Binary | PrimitiveKind::Varbinary => NativeShape::Bytes,
            PrimitiveKind::Boolean => NativeShape::Bool,
            PrimitiveKind::Decimal => NativeShape::Decimal,
            PrimitiveKind::Double => NativeShape::F64,
            PrimitiveKind::Float => NativeShape::F32,
            PrimitiveKind::Int8 => NativeShape::I8,
            PrimitiveKind::Int16 => NativeShape::I16,
            PrimitiveKind::Int24 | PrimitiveKind::Int32 | PrimitiveKind::Year => NativeShape::I32,
            PrimitiveKind::Int64 => NativeShape::I64,
            PrimitiveKind::UInt8 => NativeShape::U8,
            PrimitiveKind::UInt16 => NativeShape::U16,
            PrimitiveKind::UInt24 | PrimitiveKind::UInt32 => NativeShape::U32,
            PrimitiveKind::UInt64 | PrimitiveKind::Bit => NativeShape::U64,
            PrimitiveKind::Char | PrimitiveKind::Varchar | PrimitiveKind::Text => NativeShape::Text,
            PrimitiveKind::Date
            | PrimitiveKind::DateTime
            | PrimitiveKind::Timestamp
            | PrimitiveKind::Time => NativeShape::DateTime,
            PrimitiveKind::None | PrimitiveKind::Infer => return None,
        };
        Some(shape)
    }

    /// Kind a native shape infers to when a column is declared with `Infer`
    ///
    /// Date, char, fixed binary, bit and year never come out of inference and
    /// must be declared explicitly.
    pub fn infer(shape: NativeShape) -> PrimitiveKind {
        match shape {
            NativeShape::Bytes => PrimitiveKind::Varbinary,
            NativeShape::Bool => PrimitiveKind::Boolean,
            NativeShape::Decimal => PrimitiveKind::Decimal,
            NativeShape::F64 => PrimitiveKind::Double,
            NativeShape::F32 => PrimitiveKind::Float,
            NativeShape::I8 => PrimitiveKind::Int8,
            NativeShape::I16 => PrimitiveKind::Int16,
            NativeShape::I32 => PrimitiveKind::Int32,
            NativeShape::I64 => PrimitiveKind::Int64,
            NativeShape::U8 => PrimitiveKind::UInt8,
            NativeShape::U16 => PrimitiveKind::UInt16,
            NativeShape::U32 => PrimitiveKind::UInt32,
            NativeShape::U64 => PrimitiveKind::UInt64,
            NativeShape::Text => PrimitiveKind::Varchar,
            NativeShape::DateTime => PrimitiveKind::Time,
        }
    }

    /// Infer the kind of an arbitrary native type, `None` when it has no counterpart
    pub fn infer_type<T: ?Sized + 'static>() -> Option<PrimitiveKind> {
        native_shape_of(TypeId::of::<T>()).map(PrimitiveKind::infer)
    }

    /// Whether bound parameters of this kind carry a size
    pub fn requires_length(&self) -> bool {
        matches!(
            self,
            PrimitiveKind::Char
                | PrimitiveKind::Varchar
                | PrimitiveKind::Text
                | PrimitiveKind::Binary
                | PrimitiveKind::Varbinary
        )
    }

    /// Whether bound parameters of this kind carry precision and scale
    pub fn requires_precision_and_scale(&self) -> bool {
        matches!(self, PrimitiveKind::Decimal)
    }

    /// Backend neutral parameter kind
    pub fn parameter_kind(&self) -> Option<ParameterKind> {
        let kind = match self {
            PrimitiveKind::Binary | PrimitiveKind::Varbinary => ParameterKind::Binary,
            PrimitiveKind::Bit | PrimitiveKind::UInt64 => ParameterKind::UInt64,
            PrimitiveKind::Boolean => ParameterKind::Boolean,
            PrimitiveKind::Char => ParameterKind::StringFixedLength,
            PrimitiveKind::Date => ParameterKind::Date,
            PrimitiveKind::DateTime | PrimitiveKind::Timestamp => ParameterKind::DateTime,
            PrimitiveKind::Decimal => ParameterKind::Decimal,
            PrimitiveKind::Double => ParameterKind::Double,
            PrimitiveKind::Float => ParameterKind::Single,
            PrimitiveKind::Int16 => ParameterKind::Int16,
            PrimitiveKind::Int24 | PrimitiveKind::Int32 | PrimitiveKind::Year => {
                ParameterKind::Int32
            }
            PrimitiveKind::Int64 => ParameterKind::Int64,
            PrimitiveKind::Int8 => ParameterKind::SByte,
            PrimitiveKind::Time => ParameterKind::Time,
            PrimitiveKind::UInt16 => ParameterKind::UInt16,
            PrimitiveKind::UInt24 | PrimitiveKind::UInt32 => ParameterKind::UInt32,
            PrimitiveKind::UInt8 => ParameterKind::Byte,
            PrimitiveKind::Varchar | PrimitiveKind::Text => ParameterKind::String,
            PrimitiveKind::None | PrimitiveKind::Infer => return None,
        };
        Some(kind)
    }

    /// Parameter kind used when binding this kind on the given backend
    pub fn backend_parameter_kind(&self, backend: DatabaseType) -> Result<ParameterKind> {
        if !backend.supports(*self) {
            return Err(DatabaseError::unsupported_primitive(self, backend));
        }
        self.parameter_kind()
            .ok_or_else(|| DatabaseError::unsupported_primitive(self, backend))
    }

    /// Bring a value into this kind's native shape
    pub fn normalize(&self, value: DatabaseValue, conversion: Conversion) -> Result<DatabaseValue> {
        let shape = self
            .native_shape()
            .ok_or_else(|| DatabaseError::configuration(format!("kind {} has no shape", self)))?;
        shape.coerce(value, conversion)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PrimitiveKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        PrimitiveKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == lower)
            .ok_or_else(|| format!("Invalid primitive kind: '{}'", s))
    }
}

impl NativeShape {
    /// Name of the native Rust type behind the shape
    pub fn name(&self) -> &'static str {
        match self {
            NativeShape::Bool => "bool",
            NativeShape::I8 => "i8",
            NativeShape::U8 => "u8",
            NativeShape::I16 => "i16",
            NativeShape::U16 => "u16",
            NativeShape::I32 => "i32",
            NativeShape::U32 => "u32",
            NativeShape::I64 => "i64",
            NativeShape::U64 => "u64",
            NativeShape::Decimal => "Decimal",
            NativeShape::F32 => "f32",
            NativeShape::F64 => "f64",
            NativeShape::Text => "String",
            NativeShape::Bytes => "Vec<u8>",
            NativeShape::DateTime => "NaiveDateTime",
        }
    }

    /// Shape of a value as it currently is, `None` for null
    pub fn of(value: &DatabaseValue) -> Option<NativeShape> {
        let shape = match value {
            DatabaseValue::Null => return None,
            DatabaseValue::Bool(_) => NativeShape::Bool,
            DatabaseValue::TinyInt(_) => NativeShape::I8,
            DatabaseValue::UTinyInt(_) => NativeShape::U8,
            DatabaseValue::SmallInt(_) => NativeShape::I16,
            DatabaseValue::USmallInt(_) => NativeShape::U16,
            DatabaseValue::Int(_) => NativeShape::I32,
            DatabaseValue::UInt(_) => NativeShape::U32,
            DatabaseValue::Long(_) => NativeShape::I64,
            DatabaseValue::ULong(_) => NativeShape::U64,
            DatabaseValue::Float(_) => NativeShape::F32,
            DatabaseValue::Double(_) => NativeShape::F64,
            DatabaseValue::Decimal(_) => NativeShape::Decimal,
            DatabaseValue::String(_) => NativeShape::Text,
            DatabaseValue::Bytes(_) => NativeShape::Bytes,
            DatabaseValue::DateTime(_) => NativeShape::DateTime,
        };
        Some(shape)
    }

    fn is_integer(&self) -> bool {
        matches!(
            self,
            NativeShape::I8
                | NativeShape::U8
                | NativeShape::I16
                | NativeShape::U16
                | NativeShape::I32
                | NativeShape::U32
                | NativeShape::I64
                | NativeShape::U64
        )
    }

    /// Convert a value into this shape; null passes through unchanged
    pub fn coerce(&self, value: DatabaseValue, conversion: Conversion) -> Result<DatabaseValue> {
        let Some(current) = NativeShape::of(&value) else {
            return Ok(DatabaseValue::Null);
        };
        if current == *self {
            return Ok(value);
        }

        let mismatch = || DatabaseError::type_mismatch(self.name(), value.type_name());
        let lossy = conversion == Conversion::Lossy;

        if self.is_integer() {
            let wide = integer_of(&value)
                .or_else(|| if lossy { lossy_integer_of(&value) } else { None })
                .ok_or_else(mismatch)?;
            return integer_into(*self, wide).ok_or_else(mismatch);
        }

        let converted = match self {
            NativeShape::Bool => match integer_of(&value) {
                Some(0) => Some(DatabaseValue::Bool(false)),
                Some(1) => Some(DatabaseValue::Bool(true)),
                _ if lossy => value.as_bool().map(DatabaseValue::Bool),
                _ => None,
            },
            NativeShape::F64 => match &value {
                DatabaseValue::Float(v) => Some(DatabaseValue::Double(f64::from(*v))),
                _ if current.is_integer() || lossy => value.as_double().map(DatabaseValue::Double),
                _ => None,
            },
            NativeShape::F32 => match &value {
                DatabaseValue::Double(v) if lossy || f64::from(*v as f32) == *v => {
                    Some(DatabaseValue::Float(*v as f32))
                }
                _ if lossy => value.as_float().map(DatabaseValue::Float),
                _ => None,
            },
            NativeShape::Decimal => match &value {
                DatabaseValue::String(s) if Decimal::is_valid(s) => {
                    Some(DatabaseValue::Decimal(s.trim().to_string()))
                }
                _ if current.is_integer() || lossy => match &value {
                    DatabaseValue::Bool(_) | DatabaseValue::Bytes(_) => None,
                    DatabaseValue::DateTime(_) => None,
                    other => Some(DatabaseValue::Decimal(other.as_string())),
                },
                _ => None,
            },
            NativeShape::Text => match &value {
                DatabaseValue::Decimal(s) => Some(DatabaseValue::String(s.clone())),
                DatabaseValue::Bytes(b) if lossy => {
                    Some(DatabaseValue::String(String::from_utf8_lossy(b).into_owned()))
                }
                _ if lossy => Some(DatabaseValue::String(value.as_string())),
                _ => None,
            },
            NativeShape::Bytes => match &value {
                DatabaseValue::String(s) if lossy => Some(DatabaseValue::Bytes(s.as_bytes().to_vec())),
                _ => None,
            },
            NativeShape::DateTime => match &value {
                DatabaseValue::String(_) => value.as_datetime().map(DatabaseValue::DateTime),
                _ => None,
            },
            _ => None,
        };
        converted.ok_or_else(mismatch)
    }
}

fn integer_of(value: &DatabaseValue) -> Option<i128> {
    match value {
        DatabaseValue::TinyInt(v) => Some(i128::from(*v)),
        DatabaseValue::UTinyInt(v) => Some(i128::from(*v)),
        DatabaseValue::SmallInt(v) => Some(i128::from(*v)),
        DatabaseValue::USmallInt(v) => Some(i128::from(*v)),
        DatabaseValue::Int(v) => Some(i128::from(*v)),
        DatabaseValue::UInt(v) => Some(i128::from(*v)),
        DatabaseValue::Long(v) => Some(i128::from(*v)),
        DatabaseValue::ULong(v) => Some(i128::from(*v)),
        DatabaseValue::Bool(v) => Some(i128::from(*v)),
        DatabaseValue::Double(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i128),
        DatabaseValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i128),
        _ => None,
    }
}

fn lossy_integer_of(value: &DatabaseValue) -> Option<i128> {
    match value {
        DatabaseValue::Double(v) => Some(*v as i128),
        DatabaseValue::Float(v) => Some(*v as i128),
        DatabaseValue::String(s) | DatabaseValue::Decimal(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i128>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|v| v as i128))
        }
        _ => None,
    }
}

fn integer_into(shape: NativeShape, wide: i128) -> Option<DatabaseValue> {
    let value = match shape {
        NativeShape::I8 => DatabaseValue::TinyInt(i8::try_from(wide).ok()?),
        NativeShape::U8 => DatabaseValue::UTinyInt(u8::try_from(wide).ok()?),
        NativeShape::I16 => DatabaseValue::SmallInt(i16::try_from(wide).ok()?),
        NativeShape::U16 => DatabaseValue::USmallInt(u16::try_from(wide).ok()?),
        NativeShape::I32 => DatabaseValue::Int(i32::try_from(wide).ok()?),
        NativeShape::U32 => DatabaseValue::UInt(u32::try_from(wide).ok()?),
        NativeShape::I64 => DatabaseValue::Long(i64::try_from(wide).ok()?),
        NativeShape::U64 => DatabaseValue::ULong(u64::try_from(wide).ok()?),
        _ => return None,
    };
    Some(value)
}

/// Exact decimal number kept in textual form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Decimal(String);

impl Decimal {
    /// Parse a decimal literal such as `-12.50`
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if Decimal::is_valid(&text) {
            Ok(Decimal(text.trim().to_string()))
        } else {
            Err(DatabaseError::type_mismatch("decimal literal", &text))
        }
    }

    /// The literal as written
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(text: &str) -> bool {
        let body = text.trim();
        let body = body.strip_prefix(['-', '+']).unwrap_or(body);
        let mut parts = body.splitn(2, '.');
        let whole = parts.next().unwrap_or("");
        let fraction = parts.next();
        let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        match fraction {
            Some(frac) => {
                digits(whole) && digits(frac) && !(whole.is_empty() && frac.is_empty())
            }
            None => !whole.is_empty() && digits(whole),
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Native field types that can be stored in a column
pub trait Primitive: Sized + Send + Sync + 'static {
    /// Shape of the non-null value
    const SHAPE: NativeShape;
    /// Whether the type can hold null
    const NULLABLE: bool = false;

    /// Convert into a database value
    fn to_value(&self) -> DatabaseValue;

    /// Convert from a value already brought into `SHAPE` (or null)
    fn from_value(value: DatabaseValue) -> Result<Self>;
}

macro_rules! impl_primitive {
    ($($native:ty => $shape:ident, $variant:ident);* $(;)?) => {
        $(
            impl Primitive for $native {
                const SHAPE: NativeShape = NativeShape::$shape;

                fn to_value(&self) -> DatabaseValue {
                    DatabaseValue::$variant(self.clone())
                }

                fn from_value(value: DatabaseValue) -> Result<Self> {
                    match value {
                        DatabaseValue::$variant(v) => Ok(v),
                        other => Err(DatabaseError::type_mismatch(
                            NativeShape::$shape.name(),
                            other.type_name(),
                        )),
                    }
                }
            }
        )*
    };
}

impl_primitive! {
    bool => Bool, Bool;
    i8 => I8, TinyInt;
    u8 => U8, UTinyInt;
    i16 => I16, SmallInt;
    u16 => U16, USmallInt;
    i32 => I32, Int;
    u32 => U32, UInt;
    i64 => I64, Long;
    u64 => U64, ULong;
    f32 => F32, Float;
    f64 => F64, Double;
    String => Text, String;
    Vec<u8> => Bytes, Bytes;
    NaiveDateTime => DateTime, DateTime;
}

impl Primitive for Decimal {
    const SHAPE: NativeShape = NativeShape::Decimal;

    fn to_value(&self) -> DatabaseValue {
        DatabaseValue::Decimal(self.0.clone())
    }

    fn from_value(value: DatabaseValue) -> Result<Self> {
        match value {
            DatabaseValue::Decimal(v) => Decimal::new(v),
            other => Err(DatabaseError::type_mismatch("Decimal", other.type_name())),
        }
    }
}

impl<T: Primitive> Primitive for Option<T> {
    const SHAPE: NativeShape = T::SHAPE;
    const NULLABLE: bool = true;

    fn to_value(&self) -> DatabaseValue {
        match self {
            Some(v) => v.to_value(),
            None => DatabaseValue::Null,
        }
    }

    fn from_value(value: DatabaseValue) -> Result<Self> {
        match value {
            DatabaseValue::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

fn native_shape_of(id: TypeId) -> Option<NativeShape> {
    macro_rules! lookup {
        ($($native:ty),*) => {
            $(
                if id == TypeId::of::<$native>() || id == TypeId::of::<Option<$native>>() {
                    return Some(<$native as Primitive>::SHAPE);
                }
            )*
        };
    }
    lookup!(
        bool,
        i8,
        u8,
        i16,
        u16,
        i32,
        u32,
        i64,
        u64,
        f32,
        f64,
        String,
        Vec<u8>,
        NaiveDateTime,
        Decimal
    );
    None
}
