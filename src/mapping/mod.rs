//! Object/table mapping
//!
//! Native types declare their storage with [`EntitySchema`]; the [`registry`]
//! resolves declarations into [`TypeMap`]s that convert objects to and from
//! intermediate [`RowObject`]s.

pub mod foreign_key;
pub mod primitive;
pub mod registry;
pub mod row;
pub mod schema;
pub mod type_map;

pub use foreign_key::{ForeignKey, RelationKind};
pub use primitive::{Conversion, Decimal, NativeShape, ParameterKind, Primitive, PrimitiveKind};
pub use registry::TypeRegistry;
pub use row::{RowGraph, RowId, RowKey, RowObject};
pub use schema::{Entity, EntitySchema, RelationSlot};
pub use type_map::{ColumnBinding, Materializer, RelatedRows, RelationLink, StorageMode, TypeMap};
