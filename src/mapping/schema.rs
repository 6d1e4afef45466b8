//! Entity schema declarations
//!
//! Every persistable type implements [`Entity`] and describes its table, columns,
//! keys, relations and hooks with the [`EntitySchema`] builder. The registry turns
//! the declaration into a validated [`TypeMap`] the first time the type is used.
//!
//! ```rust
//! use rust_orm_system::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Order {
//!     id: i32,
//!     user_id: i32,
//!     total: f64,
//! }
//!
//! impl Entity for Order {
//!     fn schema() -> EntitySchema<Self> {
//!         EntitySchema::table("orders")
//!             .identity("id", PrimitiveKind::Int32, |o: &Order| &o.id, |o: &mut Order| &mut o.id)
//!             .column("user_id", PrimitiveKind::Int32, |o: &Order| &o.user_id, |o: &mut Order| &mut o.user_id)
//!             .column("total", PrimitiveKind::Infer, |o: &Order| &o.total, |o: &mut Order| &mut o.total)
//!     }
//! }
//!
//! #[derive(Debug, Default)]
//! struct User {
//!     id: i32,
//!     name: String,
//!     orders: Vec<Order>,
//! }
//!
//! impl Entity for User {
//!     fn schema() -> EntitySchema<Self> {
//!         EntitySchema::table("users")
//!             .identity("id", PrimitiveKind::Int32, |u: &User| &u.id, |u: &mut User| &mut u.id)
//!             .column("name", PrimitiveKind::Varchar, |u: &User| &u.name, |u: &mut User| &mut u.name)
//!             .one_to_many(
//!                 "orders",
//!                 ForeignKey::single("id", "user_id"),
//!                 |u: &User| &u.orders,
//!                 |u: &mut User| &mut u.orders,
//!             )
//!     }
//! }
//! ```

use super::foreign_key::{ForeignKey, RelationKind};
use super::primitive::{NativeShape, Primitive, PrimitiveKind};
use super::type_map::{
    callback_error, short_type_name, ColumnBinding, Hooks, Related, RelatedRows, RelationAccess,
    RelationLink, SchemaOutline, StorageMode, TargetRef, TypeMap,
};
use crate::core::error::{CallbackError, DatabaseError, Result};
use crate::core::value::DatabaseValue;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

/// A native type that maps onto one table
pub trait Entity: Default + Send + Sync + 'static {
    /// Declare the table, columns, keys and relations of the type
    fn schema() -> EntitySchema<Self>;
}

/// Native container holding the objects of one relation
pub trait RelationSlot: Send + Sync + 'static {
    /// Entity stored in the slot
    type Item: Entity;

    fn items(&self) -> Vec<&Self::Item>;

    fn items_mut(&mut self) -> Vec<&mut Self::Item>;

    /// Replace the slot's content with freshly loaded objects
    fn replace(&mut self, items: Vec<Self::Item>) -> Result<()>;
}

impl<R: Entity> RelationSlot for Vec<R> {
    type Item = R;

    fn items(&self) -> Vec<&R> {
        self.iter().collect()
    }

    fn items_mut(&mut self) -> Vec<&mut R> {
        self.iter_mut().collect()
    }

    fn replace(&mut self, items: Vec<R>) -> Result<()> {
        *self = items;
        Ok(())
    }
}

impl<R: Entity> RelationSlot for Option<R> {
    type Item = R;

    fn items(&self) -> Vec<&R> {
        self.iter().collect()
    }

    fn items_mut(&mut self) -> Vec<&mut R> {
        self.iter_mut().collect()
    }

    fn replace(&mut self, items: Vec<R>) -> Result<()> {
        if items.len() > 1 {
            return Err(DatabaseError::type_mismatch(
                "at most one related object",
                &format!("{} objects", items.len()),
            ));
        }
        *self = items.into_iter().next();
        Ok(())
    }
}

struct JunctionDecl {
    table: String,
    target_key: ForeignKey,
}

struct RelationDecl {
    kind: RelationKind,
    name: String,
    foreign_key: ForeignKey,
    junction: Option<JunctionDecl>,
    target: TargetRef,
    access: Arc<dyn RelationAccess>,
}

/// Builder describing how an entity maps onto its table
pub struct EntitySchema<T: Entity> {
    table: Option<String>,
    table_of: Option<TargetRef>,
    columns: Vec<ColumnBinding>,
    keys: Vec<String>,
    auto_convert: Vec<String>,
    relations: Vec<RelationDecl>,
    hooks: Hooks,
    subtypes: Vec<TargetRef>,
    errors: Vec<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Default for EntitySchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntitySchema<T> {
    /// Schema without a table designation
    pub fn new() -> Self {
        Self {
            table: None,
            table_of: None,
            columns: Vec::new(),
            keys: Vec::new(),
            auto_convert: Vec::new(),
            relations: Vec::new(),
            hooks: Hooks::default(),
            subtypes: Vec::new(),
            errors: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Schema stored in `table`
    pub fn table(table: impl Into<String>) -> Self {
        let mut schema = Self::new();
        schema.table = Some(table.into());
        schema
    }

    /// Store the type in the table of entity `E`
    #[must_use]
    pub fn element_of<E: Entity>(mut self) -> Self {
        self.table_of = Some(TargetRef::of::<E>());
        self
    }

    /// Column stored by direct field access
    #[must_use]
    pub fn column<F, G, M>(mut self, name: &str, kind: PrimitiveKind, get: G, get_mut: M) -> Self
    where
        F: Primitive,
        G: Fn(&T) -> &F + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut F + Send + Sync + 'static,
    {
        let binding = ColumnBinding {
            name: name.to_string(),
            kind: resolve_kind(kind, F::SHAPE),
            member: Some(F::SHAPE),
            auto_convert: false,
            storage: StorageMode::Direct,
            identity: false,
            read: Some(Arc::new(move |obj: &dyn Any| -> Result<DatabaseValue> {
                Ok(get(downcast_ref::<T>(obj)?).to_value())
            })),
            write: Some(Arc::new(
                move |obj: &mut dyn Any, value: DatabaseValue| -> Result<()> {
                    *get_mut(downcast_mut::<T>(obj)?) = F::from_value(value)?;
                    Ok(())
                },
            )),
        };
        self.push_column(binding);
        self
    }

    /// Backend generated surrogate key stored by direct field access
    #[must_use]
    pub fn identity<F, G, M>(self, name: &str, kind: PrimitiveKind, get: G, get_mut: M) -> Self
    where
        F: Primitive,
        G: Fn(&T) -> &F + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut F + Send + Sync + 'static,
    {
        let mut schema = self.column(name, kind, get, get_mut);
        if let Some(column) = schema.columns.iter_mut().rev().find(|c| c.name == name) {
            column.identity = true;
        }
        schema.key(name)
    }

    /// Column whose value passes through user callbacks
    #[must_use]
    pub fn callback_column<F, S, L>(mut self, name: &str, kind: PrimitiveKind, save: S, load: L) -> Self
    where
        F: Primitive,
        S: Fn(&T) -> std::result::Result<F, CallbackError> + Send + Sync + 'static,
        L: Fn(&mut T, F) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    {
        let save_label = callback_label::<T>("save", name);
        let load_label = callback_label::<T>("load", name);
        let binding = ColumnBinding {
            name: name.to_string(),
            kind: resolve_kind(kind, F::SHAPE),
            member: Some(F::SHAPE),
            auto_convert: false,
            storage: StorageMode::Callback,
            identity: false,
            read: Some(Arc::new(move |obj: &dyn Any| -> Result<DatabaseValue> {
                let obj = downcast_ref::<T>(obj)?;
                save(obj)
                    .map(|value| value.to_value())
                    .map_err(|e| callback_error(&save_label, e))
            })),
            write: Some(Arc::new(
                move |obj: &mut dyn Any, value: DatabaseValue| -> Result<()> {
                    let value = F::from_value(value)?;
                    load(downcast_mut::<T>(obj)?, value).map_err(|e| callback_error(&load_label, e))
                },
            )),
        };
        self.push_column(binding);
        self
    }

    /// Column that exists only in rows (for example a foreign key without a field)
    #[must_use]
    pub fn unmapped_column(mut self, name: &str, kind: PrimitiveKind) -> Self {
        self.push_column(ColumnBinding::unmapped(name, kind));
        self
    }

    /// Mark a declared column as unique key
    #[must_use]
    pub fn key(mut self, name: &str) -> Self {
        if !self.keys.iter().any(|k| k == name) {
            self.keys.push(name.to_string());
        }
        self
    }

    /// Convert values of a column between its kind and its member shape
    #[must_use]
    pub fn auto_convert(mut self, name: &str) -> Self {
        self.auto_convert.push(name.to_string());
        self
    }

    /// One-to-one relation stored in a field; the owner carries the foreign key
    #[must_use]
    pub fn one_to_one<S, G, M>(self, name: &str, foreign_key: ForeignKey, get: G, get_mut: M) -> Self
    where
        S: RelationSlot,
        G: Fn(&T) -> &S + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut S + Send + Sync + 'static,
    {
        self.slot_relation(RelationKind::OneToOne, name, foreign_key, None, get, get_mut)
    }

    /// One-to-many relation stored in a field; the targets carry the foreign key
    #[must_use]
    pub fn one_to_many<S, G, M>(self, name: &str, foreign_key: ForeignKey, get: G, get_mut: M) -> Self
    where
        S: RelationSlot,
        G: Fn(&T) -> &S + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut S + Send + Sync + 'static,
    {
        self.slot_relation(RelationKind::OneToMany, name, foreign_key, None, get, get_mut)
    }

    /// Many-to-many relation through `junction_table`
    ///
    /// `source` links owner columns onto junction columns, `target` links junction
    /// columns onto target columns. Empty sides default to the key columns.
    #[must_use]
    pub fn many_to_many<S, G, M>(
        self,
        name: &str,
        junction_table: &str,
        source: ForeignKey,
        target: ForeignKey,
        get: G,
        get_mut: M,
    ) -> Self
    where
        S: RelationSlot,
        G: Fn(&T) -> &S + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut S + Send + Sync + 'static,
    {
        let junction = JunctionDecl {
            table: junction_table.to_string(),
            target_key: target,
        };
        self.slot_relation(RelationKind::ManyToMany, name, source, Some(junction), get, get_mut)
    }

    /// One-to-one relation exchanged through user callbacks
    #[must_use]
    pub fn one_to_one_with<R, S, L>(self, name: &str, foreign_key: ForeignKey, save: S, load: L) -> Self
    where
        R: Entity,
        S: Fn(&T) -> std::result::Result<Vec<R>, CallbackError> + Send + Sync + 'static,
        L: for<'r> Fn(&mut T, RelatedRows<'r>) -> std::result::Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        self.callback_relation(RelationKind::OneToOne, name, foreign_key, None, save, load)
    }

    /// One-to-many relation exchanged through user callbacks
    #[must_use]
    pub fn one_to_many_with<R, S, L>(self, name: &str, foreign_key: ForeignKey, save: S, load: L) -> Self
    where
        R: Entity,
        S: Fn(&T) -> std::result::Result<Vec<R>, CallbackError> + Send + Sync + 'static,
        L: for<'r> Fn(&mut T, RelatedRows<'r>) -> std::result::Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        self.callback_relation(RelationKind::OneToMany, name, foreign_key, None, save, load)
    }

    /// Many-to-many relation exchanged through user callbacks
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn many_to_many_with<R, S, L>(
        self,
        name: &str,
        junction_table: &str,
        source: ForeignKey,
        target: ForeignKey,
        save: S,
        load: L,
    ) -> Self
    where
        R: Entity,
        S: Fn(&T) -> std::result::Result<Vec<R>, CallbackError> + Send + Sync + 'static,
        L: for<'r> Fn(&mut T, RelatedRows<'r>) -> std::result::Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        let junction = JunctionDecl {
            table: junction_table.to_string(),
            target_key: target,
        };
        self.callback_relation(RelationKind::ManyToMany, name, source, Some(junction), save, load)
    }

    /// Hook run on a fresh object before its columns are assigned
    #[must_use]
    pub fn on_begin_load<H>(mut self, hook: H) -> Self
    where
        H: Fn(&mut T) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.hooks.begin_load = Some(wrap_hook::<T, H>(callback_label::<T>("begin", "load"), hook));
        self
    }

    /// Hook run after an object and its relations were loaded
    #[must_use]
    pub fn on_end_load<H>(mut self, hook: H) -> Self
    where
        H: Fn(&mut T) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.hooks.end_load = Some(wrap_hook::<T, H>(callback_label::<T>("end", "load"), hook));
        self
    }

    /// Hook run before an object is staged for saving
    #[must_use]
    pub fn on_begin_save<H>(mut self, hook: H) -> Self
    where
        H: Fn(&mut T) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.hooks.begin_save = Some(wrap_hook::<T, H>(callback_label::<T>("begin", "save"), hook));
        self
    }

    /// Hook run after a save committed and generated keys were written back
    #[must_use]
    pub fn on_end_save<H>(mut self, hook: H) -> Self
    where
        H: Fn(&mut T) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.hooks.end_save = Some(wrap_hook::<T, H>(callback_label::<T>("end", "save"), hook));
        self
    }

    /// Declare a subtype whose rows share this type's table
    #[must_use]
    pub fn subtype<S: Entity>(mut self) -> Self {
        self.subtypes.push(TargetRef::of::<S>());
        self
    }

    fn push_column(&mut self, binding: ColumnBinding) {
        if self.columns.iter().any(|c| c.name == binding.name) {
            self.errors.push(format!(
                "member \"{}\" has more than one store designation",
                binding.name
            ));
            return;
        }
        self.columns.push(binding);
    }

    fn slot_relation<S, G, M>(
        self,
        kind: RelationKind,
        name: &str,
        foreign_key: ForeignKey,
        junction: Option<JunctionDecl>,
        get: G,
        get_mut: M,
    ) -> Self
    where
        S: RelationSlot,
        G: Fn(&T) -> &S + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut S + Send + Sync + 'static,
    {
        let access = SlotAccess::<T, S, G, M> {
            get,
            get_mut,
            _marker: PhantomData,
        };
        self.push_relation(RelationDecl {
            kind,
            name: name.to_string(),
            foreign_key,
            junction,
            target: TargetRef::of::<S::Item>(),
            access: Arc::new(access),
        })
    }

    fn callback_relation<R, S, L>(
        self,
        kind: RelationKind,
        name: &str,
        foreign_key: ForeignKey,
        junction: Option<JunctionDecl>,
        save: S,
        load: L,
    ) -> Self
    where
        R: Entity,
        S: Fn(&T) -> std::result::Result<Vec<R>, CallbackError> + Send + Sync + 'static,
        L: for<'r> Fn(&mut T, RelatedRows<'r>) -> std::result::Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        let access = CallbackAccess::<T, R, S, L> {
            save,
            load,
            save_label: callback_label::<T>("save", name),
            load_label: callback_label::<T>("load", name),
            _marker: PhantomData,
        };
        self.push_relation(RelationDecl {
            kind,
            name: name.to_string(),
            foreign_key,
            junction,
            target: TargetRef::of::<R>(),
            access: Arc::new(access),
        })
    }

    fn push_relation(mut self, relation: RelationDecl) -> Self {
        if self.relations.iter().any(|r| r.name == relation.name) {
            self.errors.push(format!(
                "relation \"{}\" is declared more than once",
                relation.name
            ));
        } else if let Err(e) = relation.foreign_key.validate() {
            self.errors
                .push(format!("relation \"{}\": {}", relation.name, e));
        } else {
            self.relations.push(relation);
        }
        self
    }

    fn table_name(&self) -> Result<Option<String>> {
        if let Some(table) = &self.table {
            return Ok(Some(table.clone()));
        }
        match &self.table_of {
            Some(owner) => Ok(owner.outline()?.table),
            None => Ok(None),
        }
    }

    /// Names and kinds of the schema's columns, without touching related schemas
    pub(crate) fn outline(&self) -> Result<SchemaOutline> {
        let mut columns: Vec<(String, Option<PrimitiveKind>)> = self
            .columns
            .iter()
            .map(|c| (c.name.clone(), Some(c.kind)))
            .collect();
        for relation in &self.relations {
            if relation.kind != RelationKind::OneToOne {
                continue;
            }
            for source in relation.foreign_key.source_columns() {
                if !columns.iter().any(|(name, _)| name == source) {
                    columns.push((source.clone(), None));
                }
            }
        }
        Ok(SchemaOutline {
            table: self.table_name()?,
            columns,
            keys: self.keys.clone(),
        })
    }

    /// Validate the declaration and resolve it into a type map
    pub(crate) fn build(self) -> Result<TypeMap> {
        let type_name = short_type_name::<T>();
        let fail = |msg: String| DatabaseError::configuration(format!("{}: {}", type_name, msg));

        if let Some(first) = self.errors.first() {
            return Err(fail(first.clone()));
        }
        let table = self
            .table_name()?
            .ok_or_else(|| fail("no table designation found".to_string()))?;

        let mut columns = self.columns;
        for name in &self.auto_convert {
            let column = columns
                .iter_mut()
                .find(|c| &c.name == name)
                .ok_or_else(|| fail(format!("auto-convert on undeclared member \"{}\"", name)))?;
            column.auto_convert = true;
        }
        for column in &columns {
            check_column(column).map_err(&fail)?;
        }

        let identities: Vec<&ColumnBinding> = columns.iter().filter(|c| c.identity).collect();
        if identities.len() > 1 {
            return Err(fail("more than one identity column".to_string()));
        }
        let identity = identities.first().map(|c| c.name.clone());

        let mut relations = Vec::with_capacity(self.relations.len());
        for decl in self.relations {
            let link = resolve_relation(decl, &mut columns, &self.keys).map_err(|e| match e {
                DatabaseError::Configuration(msg) => fail(msg),
                other => other,
            })?;
            relations.push(link);
        }

        for key in &self.keys {
            if !columns.iter().any(|c| &c.name == key) {
                return Err(fail(format!(
                    "key \"{}\" is not a stored member",
                    key
                )));
            }
        }

        let mut subtype_columns = HashSet::new();
        for subtype in &self.subtypes {
            for (name, _) in subtype.outline()?.columns {
                subtype_columns.insert(name);
            }
        }

        let column_index: HashMap<String, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        Ok(TypeMap {
            type_id: Some(TypeId::of::<T>()),
            type_name,
            table,
            keys: self.keys,
            identity,
            columns,
            column_index,
            relations,
            hooks: self.hooks,
            subtype_columns,
        })
    }
}

fn check_column(column: &ColumnBinding) -> std::result::Result<(), String> {
    if !column.kind.is_concrete() {
        return Err(format!("column \"{}\" has no primitive kind", column.name));
    }
    if let Some(member) = column.member {
        if Some(member) != column.kind.native_shape() && !column.auto_convert {
            return Err(format!(
                "member of column \"{}\" is {} but kind {} expects {}",
                column.name,
                member.name(),
                column.kind,
                column.kind.native_shape().map(|s| s.name()).unwrap_or("nothing")
            ));
        }
    }
    if column.identity {
        let integral = matches!(
            column.kind.native_shape(),
            Some(
                NativeShape::I8
                    | NativeShape::U8
                    | NativeShape::I16
                    | NativeShape::U16
                    | NativeShape::I32
                    | NativeShape::U32
                    | NativeShape::I64
                    | NativeShape::U64
            )
        );
        if !integral {
            return Err(format!(
                "identity column \"{}\" must have an integer kind, not {}",
                column.name, column.kind
            ));
        }
    }
    Ok(())
}

fn resolve_relation(
    decl: RelationDecl,
    columns: &mut Vec<ColumnBinding>,
    keys: &[String],
) -> Result<RelationLink> {
    let outline = decl.target.outline()?;
    let target_table = outline.table.clone().unwrap_or_default();
    let target_kind = |column: &str| -> Result<PrimitiveKind> {
        match outline.kind_of(column) {
            Some(Some(kind)) => Ok(kind),
            Some(None) => Err(DatabaseError::configuration(format!(
                "column \"{}\" of table \"{}\" must be declared to be linked by relation \"{}\"",
                column, target_table, decl.name
            ))),
            None => Err(DatabaseError::configuration(format!(
                "the table \"{}\" does not contain a column \"{}\" for relation \"{}\"",
                target_table, column, decl.name
            ))),
        }
    };
    let source_kind = |columns: &[ColumnBinding], column: &str| -> Result<PrimitiveKind> {
        columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.kind)
            .ok_or_else(|| {
                DatabaseError::configuration(format!(
                    "the source table does not contain a column \"{}\" for relation \"{}\"",
                    column, decl.name
                ))
            })
    };

    match decl.kind {
        RelationKind::OneToOne => {
            let foreign_key = decl.foreign_key.with_defaults(&[], &outline.keys);
            foreign_key.validate_resolved(&decl.name)?;
            for (source, target) in foreign_key.pairs() {
                let kind = target_kind(target)?;
                if !columns.iter().any(|c| c.name == source) {
                    columns.push(ColumnBinding::unmapped(source, kind));
                }
            }
            Ok(RelationLink {
                kind: decl.kind,
                name: decl.name,
                foreign_key,
                target: decl.target,
                junction: None,
                access: Some(decl.access),
            })
        }
        RelationKind::OneToMany => {
            let foreign_key = decl.foreign_key.with_defaults(keys, &outline.keys);
            foreign_key.validate_resolved(&decl.name)?;
            for (source, target) in foreign_key.pairs() {
                source_kind(columns, source)?;
                target_kind(target)?;
            }
            Ok(RelationLink {
                kind: decl.kind,
                name: decl.name,
                foreign_key,
                target: decl.target,
                junction: None,
                access: Some(decl.access),
            })
        }
        RelationKind::ManyToMany => {
            let junction = decl.junction.ok_or_else(|| {
                DatabaseError::configuration(format!(
                    "many-to-many relation \"{}\" has no junction table",
                    decl.name
                ))
            })?;
            if junction.table.is_empty() {
                return Err(DatabaseError::configuration(format!(
                    "many-to-many relation \"{}\" has an empty junction table name",
                    decl.name
                )));
            }
            let source_key = decl.foreign_key.with_defaults(keys, keys);
            source_key.validate_resolved(&decl.name)?;
            let target_key = junction
                .target_key
                .with_defaults(&outline.keys, &outline.keys);
            target_key.validate_resolved(&decl.name)?;

            let mut junction_columns: Vec<ColumnBinding> = Vec::new();
            let mut add = |name: &str, kind: PrimitiveKind| -> Result<()> {
                if junction_columns.iter().any(|c| c.name == name) {
                    return Err(DatabaseError::configuration(format!(
                        "junction table \"{}\" of relation \"{}\" repeats column \"{}\"",
                        junction.table, decl.name, name
                    )));
                }
                junction_columns.push(ColumnBinding::unmapped(name, kind));
                Ok(())
            };
            for (owner_column, junction_column) in source_key.pairs() {
                add(junction_column, source_kind(columns, owner_column)?)?;
            }
            for (junction_column, target_column) in target_key.pairs() {
                add(junction_column, target_kind(target_column)?)?;
            }

            let leg = RelationLink {
                kind: RelationKind::ManyToMany,
                name: decl.name.clone(),
                foreign_key: target_key,
                target: decl.target.clone(),
                junction: None,
                access: None,
            };
            let junction_map = TypeMap::junction(junction.table, junction_columns, leg);
            Ok(RelationLink {
                kind: decl.kind,
                name: decl.name,
                foreign_key: source_key,
                target: decl.target,
                junction: Some(Arc::new(junction_map)),
                access: Some(decl.access),
            })
        }
    }
}

/// Outline of an entity's schema, used while validating relations onto it
pub(crate) fn outline_of<R: Entity>() -> Result<SchemaOutline> {
    R::schema().outline()
}

fn resolve_kind(kind: PrimitiveKind, shape: NativeShape) -> PrimitiveKind {
    if kind == PrimitiveKind::Infer {
        PrimitiveKind::infer(shape)
    } else {
        kind
    }
}

fn callback_label<T>(action: &str, name: &str) -> String {
    format!("{}::{}_{}", short_type_name::<T>(), action, name)
}

fn downcast_ref<T: 'static>(obj: &dyn Any) -> Result<&T> {
    obj.downcast_ref::<T>()
        .ok_or_else(|| DatabaseError::type_mismatch(short_type_name::<T>(), "foreign object"))
}

fn downcast_mut<T: 'static>(obj: &mut dyn Any) -> Result<&mut T> {
    obj.downcast_mut::<T>()
        .ok_or_else(|| DatabaseError::type_mismatch(short_type_name::<T>(), "foreign object"))
}

fn wrap_hook<T, H>(label: String, hook: H) -> super::type_map::HookFn
where
    T: Entity,
    H: Fn(&mut T) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
{
    Arc::new(move |obj: &mut dyn Any| -> Result<()> {
        hook(downcast_mut::<T>(obj)?).map_err(|e| callback_error(&label, e))
    })
}

struct SlotAccess<T, S, G, M> {
    get: G,
    get_mut: M,
    _marker: PhantomData<fn() -> (T, S)>,
}

impl<T, S, G, M> RelationAccess for SlotAccess<T, S, G, M>
where
    T: Entity,
    S: RelationSlot,
    G: Fn(&T) -> &S + Send + Sync + 'static,
    M: Fn(&mut T) -> &mut S + Send + Sync + 'static,
{
    fn related<'a>(&self, owner: &'a dyn Any) -> Result<Vec<Related<'a>>> {
        let owner = downcast_ref::<T>(owner)?;
        Ok((self.get)(owner)
            .items()
            .into_iter()
            .map(|item| Related::Borrowed(item as &dyn Any))
            .collect())
    }

    fn related_mut<'a>(&self, owner: &'a mut dyn Any) -> Result<Vec<&'a mut dyn Any>> {
        let owner = downcast_mut::<T>(owner)?;
        Ok((self.get_mut)(owner)
            .items_mut()
            .into_iter()
            .map(|item| item as &mut dyn Any)
            .collect())
    }

    fn store(&self, owner: &mut dyn Any, rows: RelatedRows<'_>) -> Result<()> {
        let items = rows.materialize::<S::Item>()?;
        (self.get_mut)(downcast_mut::<T>(owner)?).replace(items)
    }
}

struct CallbackAccess<T, R, S, L> {
    save: S,
    load: L,
    save_label: String,
    load_label: String,
    _marker: PhantomData<fn() -> (T, R)>,
}

impl<T, R, S, L> RelationAccess for CallbackAccess<T, R, S, L>
where
    T: Entity,
    R: Entity,
    S: Fn(&T) -> std::result::Result<Vec<R>, CallbackError> + Send + Sync + 'static,
    L: for<'r> Fn(&mut T, RelatedRows<'r>) -> std::result::Result<(), CallbackError>
        + Send
        + Sync
        + 'static,
{
    fn related<'a>(&self, owner: &'a dyn Any) -> Result<Vec<Related<'a>>> {
        let owner = downcast_ref::<T>(owner)?;
        let items = (self.save)(owner).map_err(|e| callback_error(&self.save_label, e))?;
        Ok(items
            .into_iter()
            .map(|item| Related::Owned(Box::new(item)))
            .collect())
    }

    fn related_mut<'a>(&self, _owner: &'a mut dyn Any) -> Result<Vec<&'a mut dyn Any>> {
        Ok(Vec::new())
    }

    fn store(&self, owner: &mut dyn Any, rows: RelatedRows<'_>) -> Result<()> {
        (self.load)(downcast_mut::<T>(owner)?, rows).map_err(|e| callback_error(&self.load_label, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::row::RowGraph;
    use crate::mapping::type_map::Materializer;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Tag {
        id: i64,
        label: String,
    }

    impl Entity for Tag {
        fn schema() -> EntitySchema<Self> {
            EntitySchema::table("tags")
                .identity("id", PrimitiveKind::Int64, |t: &Tag| &t.id, |t: &mut Tag| &mut t.id)
                .column("label", PrimitiveKind::Varchar, |t: &Tag| &t.label, |t: &mut Tag| &mut t.label)
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Note {
        id: i32,
        body: String,
        stars: u8,
        tags: Vec<Tag>,
    }

    impl Entity for Note {
        fn schema() -> EntitySchema<Self> {
            EntitySchema::table("notes")
                .identity("id", PrimitiveKind::Int32, |n: &Note| &n.id, |n: &mut Note| &mut n.id)
                .callback_column(
                    "body",
                    PrimitiveKind::Text,
                    |n: &Note| Ok(n.body.to_uppercase()),
                    |n: &mut Note, body: String| {
                        n.body = body.to_lowercase();
                        Ok(())
                    },
                )
                .column("stars", PrimitiveKind::Infer, |n: &Note| &n.stars, |n: &mut Note| &mut n.stars)
                .many_to_many(
                    "tags",
                    "note_tags",
                    ForeignKey::single("id", "note_id"),
                    ForeignKey::single("tag_id", "id"),
                    |n: &Note| &n.tags,
                    |n: &mut Note| &mut n.tags,
                )
        }
    }

    #[derive(Debug, Default)]
    struct Broken {
        a: i32,
    }

    impl Entity for Broken {
        fn schema() -> EntitySchema<Self> {
            EntitySchema::table("broken")
                .column("a", PrimitiveKind::Varchar, |b: &Broken| &b.a, |b: &mut Broken| &mut b.a)
        }
    }

    #[test]
    fn test_build_resolves_columns_and_keys() -> Result<()> {
        let map = Note::schema().build()?;
        assert_eq!(map.table(), "notes");
        assert_eq!(map.identity(), Some("id"));
        assert_eq!(map.keys(), ["id".to_string()]);
        assert_eq!(map.require_column("stars")?.kind(), PrimitiveKind::UInt8);
        assert_eq!(map.require_column("body")?.storage(), StorageMode::Callback);
        assert_eq!(map.linked_value_names(), vec!["tags"]);
        Ok(())
    }

    #[test]
    fn test_many_to_many_builds_junction() -> Result<()> {
        let map = Note::schema().build()?;
        let relation = &map.relations()[0];
        let junction = relation.junction().ok_or_else(|| DatabaseError::other("no junction"))?;
        assert!(junction.is_synthetic());
        assert_eq!(junction.table(), "note_tags");
        assert_eq!(junction.keys(), ["note_id".to_string(), "tag_id".to_string()]);
        assert_eq!(junction.require_column("tag_id")?.kind(), PrimitiveKind::Int64);
        assert_eq!(junction.relations()[0].foreign_key().target_columns(), ["id".to_string()]);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch_is_configuration_error() {
        let err = Broken::schema().build().err();
        assert!(matches!(err, Some(DatabaseError::Configuration(_))));

        let fixed = Broken::schema().auto_convert("a").build();
        assert!(fixed.is_ok());
    }

    #[test]
    fn test_invalid_declarations() {
        let missing_table = EntitySchema::<Tag>::new()
            .column("label", PrimitiveKind::Varchar, |t: &Tag| &t.label, |t: &mut Tag| &mut t.label)
            .build();
        assert!(missing_table.is_err());

        let twice = Tag::schema()
            .column("label", PrimitiveKind::Text, |t: &Tag| &t.label, |t: &mut Tag| &mut t.label)
            .build();
        assert!(twice.is_err());

        let bad_key = Tag::schema().key("nope").build();
        assert!(bad_key.is_err());

        let two_identities = Tag::schema()
            .identity("other", PrimitiveKind::Int64, |t: &Tag| &t.id, |t: &mut Tag| &mut t.id)
            .build();
        assert!(two_identities.is_err());

        let bad_relation = Note::schema()
            .one_to_many(
                "more_tags",
                ForeignKey::single("id", "missing"),
                |n: &Note| &n.tags,
                |n: &mut Note| &mut n.tags,
            )
            .build();
        assert!(bad_relation.is_err());
    }

    #[test]
    fn test_row_round_trip_for_direct_and_callback_storage() -> Result<()> {
        let map = Note::schema().build()?;
        let note = Note {
            id: 4,
            body: "hello".into(),
            stars: 3,
            tags: Vec::new(),
        };
        let row = map.map_into_row(&note)?;
        assert_eq!(row.get("body"), Some(&DatabaseValue::String("HELLO".into())));

        let mut copy = Note::default();
        map.map_from_row(&row, &mut copy)?;
        assert_eq!(copy, note);
        Ok(())
    }

    #[test]
    fn test_stage_and_materialize_relations() -> Result<()> {
        let map = Note::schema().build()?;
        let shared = Tag {
            id: 9,
            label: "rust".into(),
        };
        let note = Note {
            id: 1,
            body: "x".into(),
            stars: 1,
            tags: vec![shared.clone(), shared.clone()],
        };

        let mut graph = RowGraph::new();
        let root = map.stage(&note, &mut graph, Some(Vec::new()))?;
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.row(root).relation("tags").map(<[_]>::len), Some(2));

        let loaded: Note = Materializer::new(&graph).materialize(&map, root)?;
        assert_eq!(loaded.tags, vec![shared.clone(), shared]);
        Ok(())
    }

    #[test]
    fn test_assign_identity_converts_width() -> Result<()> {
        let map = Note::schema().build()?;
        let mut note = Note::default();
        map.assign_identity(&mut note, DatabaseValue::Long(77))?;
        assert_eq!(note.id, 77);
        assert!(map
            .assign_identity(&mut note, DatabaseValue::Long(i64::MAX))
            .is_err());
        Ok(())
    }
}
