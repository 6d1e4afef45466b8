//! Resolved type maps
//!
//! A [`TypeMap`] is the immutable, type-erased description of how one native type
//! corresponds to one table. It owns the column bindings and relation links built
//! from an [`EntitySchema`](super::schema::EntitySchema) and drives the three
//! generic routines: map-into-row, map-from-row and identity assignment.

use super::foreign_key::{ForeignKey, RelationKind};
use super::primitive::{Conversion, NativeShape, PrimitiveKind};
use super::row::{OriginPath, PathStep, RowGraph, RowId, RowObject};
use super::schema::Entity;
use crate::core::database_types::DatabaseType;
use crate::core::error::{CallbackError, DatabaseError, Result};
use crate::core::value::DatabaseValue;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

pub(crate) type ReadFn = Arc<dyn Fn(&dyn Any) -> Result<DatabaseValue> + Send + Sync>;
pub(crate) type WriteFn = Arc<dyn Fn(&mut dyn Any, DatabaseValue) -> Result<()> + Send + Sync>;
pub(crate) type HookFn = Arc<dyn Fn(&mut dyn Any) -> Result<()> + Send + Sync>;

/// How a column's value reaches the native object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Carried by rows only, no native member (synthesized foreign-key columns)
    None,
    /// Direct field read and assignment
    Direct,
    /// User supplied save and load callbacks
    Callback,
}

/// One column of a type map
#[derive(Clone)]
pub struct ColumnBinding {
    pub(crate) name: String,
    pub(crate) kind: PrimitiveKind,
    pub(crate) member: Option<NativeShape>,
    pub(crate) auto_convert: bool,
    pub(crate) storage: StorageMode,
    pub(crate) identity: bool,
    pub(crate) read: Option<ReadFn>,
    pub(crate) write: Option<WriteFn>,
}

impl ColumnBinding {
    /// Binding that exists only in rows
    pub(crate) fn unmapped(name: impl Into<String>, kind: PrimitiveKind) -> Self {
        Self {
            name: name.into(),
            kind,
            member: None,
            auto_convert: false,
            storage: StorageMode::None,
            identity: false,
            read: None,
            write: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    pub fn storage(&self) -> StorageMode {
        self.storage
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn auto_convert(&self) -> bool {
        self.auto_convert
    }

    /// Shape of the native member, if the column has one
    pub fn member_shape(&self) -> Option<NativeShape> {
        self.member
    }

    fn conversion(&self) -> Conversion {
        if self.auto_convert {
            Conversion::Lossy
        } else {
            Conversion::Exact
        }
    }

    /// Bring a value into the column kind's shape
    pub fn normalize(&self, value: DatabaseValue) -> Result<DatabaseValue> {
        self.kind.normalize(value, self.conversion())
    }

    /// Read the column's value from a native object
    pub(crate) fn read(&self, obj: &dyn Any) -> Result<DatabaseValue> {
        match &self.read {
            Some(read) => self.normalize(read(obj)?),
            None => Ok(DatabaseValue::Null),
        }
    }

    /// Assign a row value onto a native object
    pub(crate) fn write(&self, obj: &mut dyn Any, value: DatabaseValue) -> Result<()> {
        let (Some(write), Some(member)) = (&self.write, self.member) else {
            return Ok(());
        };
        let value = member.coerce(value, self.conversion())?;
        write(obj, value)
    }
}

impl fmt::Debug for ColumnBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnBinding")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("storage", &self.storage)
            .field("identity", &self.identity)
            .field("auto_convert", &self.auto_convert)
            .finish()
    }
}

/// Column names and kinds of a schema, read without resolving its relations
#[derive(Debug, Clone, Default)]
pub(crate) struct SchemaOutline {
    pub table: Option<String>,
    pub columns: Vec<(String, Option<PrimitiveKind>)>,
    pub keys: Vec<String>,
}

impl SchemaOutline {
    pub fn kind_of(&self, column: &str) -> Option<Option<PrimitiveKind>> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, kind)| *kind)
    }
}

/// Lazily resolved reference to another entity's type map
#[derive(Clone)]
pub(crate) struct TargetRef {
    pub type_name: &'static str,
    resolve: fn() -> Result<Arc<TypeMap>>,
    outline: fn() -> Result<SchemaOutline>,
}

impl TargetRef {
    pub fn of<R: Entity>() -> Self {
        Self {
            type_name: short_type_name::<R>(),
            resolve: super::registry::resolve::<R>,
            outline: super::schema::outline_of::<R>,
        }
    }

    pub fn resolve(&self) -> Result<Arc<TypeMap>> {
        (self.resolve)()
    }

    pub fn outline(&self) -> Result<SchemaOutline> {
        (self.outline)()
    }
}

/// Object reachable through a relation while staging a save
pub(crate) enum Related<'a> {
    /// Lives inside the owner; generated keys can be written back
    Borrowed(&'a dyn Any),
    /// Produced by a user callback
    Owned(Box<dyn Any + Send + Sync>),
}

/// Type-erased access to the objects behind one relation
pub(crate) trait RelationAccess: Send + Sync {
    fn related<'a>(&self, owner: &'a dyn Any) -> Result<Vec<Related<'a>>>;

    fn related_mut<'a>(&self, owner: &'a mut dyn Any) -> Result<Vec<&'a mut dyn Any>>;

    fn store(&self, owner: &mut dyn Any, rows: RelatedRows<'_>) -> Result<()>;
}

/// One relation of a type map
#[derive(Clone)]
pub struct RelationLink {
    pub(crate) kind: RelationKind,
    pub(crate) name: String,
    pub(crate) foreign_key: ForeignKey,
    pub(crate) target: TargetRef,
    pub(crate) junction: Option<Arc<TypeMap>>,
    pub(crate) access: Option<Arc<dyn RelationAccess>>,
}

impl RelationLink {
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// Logical name the relation's rows are exchanged under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns of the owner (or junction) linked onto the next table
    pub fn foreign_key(&self) -> &ForeignKey {
        &self.foreign_key
    }

    /// Synthetic junction map of a many-to-many relation
    pub fn junction(&self) -> Option<&Arc<TypeMap>> {
        self.junction.as_ref()
    }

    pub fn target_type_name(&self) -> &'static str {
        self.target.type_name
    }

    /// Resolve the target type map through the registry
    pub fn target(&self) -> Result<Arc<TypeMap>> {
        self.target.resolve()
    }

    /// Whether the relation is bound to a native member or callback
    pub fn is_owned(&self) -> bool {
        self.access.is_some()
    }
}

impl fmt::Debug for RelationLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationLink")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("foreign_key", &self.foreign_key)
            .field("target", &self.target.type_name)
            .field("junction", &self.junction.as_ref().map(|j| j.table()))
            .finish()
    }
}

/// User begin/end hooks
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub begin_load: Option<HookFn>,
    pub end_load: Option<HookFn>,
    pub begin_save: Option<HookFn>,
    pub end_save: Option<HookFn>,
}

/// Resolved mapping of one native type onto one table
pub struct TypeMap {
    pub(crate) type_id: Option<TypeId>,
    pub(crate) type_name: &'static str,
    pub(crate) table: String,
    pub(crate) keys: Vec<String>,
    pub(crate) identity: Option<String>,
    pub(crate) columns: Vec<ColumnBinding>,
    pub(crate) column_index: HashMap<String, usize>,
    pub(crate) relations: Vec<RelationLink>,
    pub(crate) hooks: Hooks,
    pub(crate) subtype_columns: HashSet<String>,
}

impl TypeMap {
    /// Synthetic map of a many-to-many junction table; every column is a key
    pub(crate) fn junction(table: String, columns: Vec<ColumnBinding>, leg: RelationLink) -> Self {
        let keys = columns.iter().map(|c| c.name.clone()).collect();
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            type_id: None,
            type_name: "junction",
            table,
            keys,
            identity: None,
            columns,
            column_index,
            relations: vec![leg],
            hooks: Hooks::default(),
            subtype_columns: HashSet::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Short name of the native type, `junction` for synthetic maps
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the map has no native type behind it
    pub fn is_synthetic(&self) -> bool {
        self.type_id.is_none()
    }

    /// Whether the map describes the native type `T`
    pub fn describes<T: 'static>(&self) -> bool {
        self.type_id == Some(TypeId::of::<T>())
    }

    /// Ordered unique keys, the identity column included
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Column bindings in declaration order
    pub fn columns(&self) -> &[ColumnBinding] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnBinding> {
        self.column_index.get(name).map(|i| &self.columns[*i])
    }

    /// Column binding or a configuration error naming the table
    pub fn require_column(&self, name: &str) -> Result<&ColumnBinding> {
        self.column(name).ok_or_else(|| {
            DatabaseError::configuration(format!(
                "table \"{}\" has no column \"{}\"",
                self.table, name
            ))
        })
    }

    pub fn relations(&self) -> &[RelationLink] {
        &self.relations
    }

    /// Logical names of the relations, parallel to [`TypeMap::relations`]
    pub fn linked_value_names(&self) -> Vec<&str> {
        self.relations.iter().map(|r| r.name.as_str()).collect()
    }

    /// Whether a fetched column is known through a declared subtype
    pub fn accepts_subtype_column(&self, name: &str) -> bool {
        self.subtype_columns.contains(name)
    }

    /// Check every column against the backend, following junctions and
    /// relation targets through the whole graph
    pub fn check_backend(&self, backend: DatabaseType) -> Result<()> {
        let mut visited = HashSet::new();
        self.check_reachable(backend, &mut visited)
    }

    fn check_reachable(&self, backend: DatabaseType, visited: &mut HashSet<String>) -> Result<()> {
        if !visited.insert(self.table.clone()) {
            return Ok(());
        }
        for column in &self.columns {
            column.kind.backend_parameter_kind(backend).map_err(|e| {
                DatabaseError::configuration(format!(
                    "column \"{}\" of table \"{}\": {}",
                    column.name, self.table, e
                ))
            })?;
        }
        for relation in &self.relations {
            if let Some(junction) = &relation.junction {
                junction.check_reachable(backend, visited)?;
            }
            relation.target.resolve()?.check_reachable(backend, visited)?;
        }
        Ok(())
    }

    fn check_object(&self, obj: &dyn Any) -> Result<()> {
        match self.type_id {
            Some(id) if id == obj.type_id() => Ok(()),
            _ => Err(DatabaseError::configuration(format!(
                "type map of {} cannot handle this object",
                self.type_name
            ))),
        }
    }

    /// Write every column of a native object into a new row
    pub fn map_into_row(&self, obj: &dyn Any) -> Result<RowObject> {
        self.check_object(obj)?;
        let mut row = RowObject::new(self.table.clone());
        for column in &self.columns {
            let value = column.read(obj).map_err(|e| {
                wrap_data_error(e, || {
                    format!("Failed to read column \"{}\" of {}", column.name, self.type_name)
                })
            })?;
            row.set(column.name.clone(), value);
        }
        Ok(row)
    }

    /// Assign every column of a row onto a native object
    ///
    /// Relations are left untouched; see [`Materializer`].
    pub fn map_from_row(&self, row: &RowObject, obj: &mut dyn Any) -> Result<()> {
        self.check_object(obj)?;
        for column in &self.columns {
            if column.write.is_none() {
                continue;
            }
            let value = row.get(&column.name).cloned().ok_or_else(|| {
                DatabaseError::initialization(
                    format!("Row of table \"{}\" is missing a column", self.table),
                    DatabaseError::ColumnNotFound(column.name.clone()),
                )
            })?;
            column.write(obj, value).map_err(|e| {
                wrap_data_error(e, || {
                    format!("Failed to assign column \"{}\" of {}", column.name, self.type_name)
                })
            })?;
        }
        Ok(())
    }

    /// Assign a generated identity onto the identity member; no-op without one
    pub fn assign_identity(&self, obj: &mut dyn Any, value: DatabaseValue) -> Result<()> {
        let Some(identity) = self.identity.as_deref().and_then(|name| self.column(name)) else {
            return Ok(());
        };
        let value = identity.kind.normalize(value, Conversion::Exact)?;
        identity.write(obj, value).map_err(|e| {
            wrap_data_error(e, || {
                format!("Failed to assign identity \"{}\" of {}", identity.name, self.type_name)
            })
        })
    }

    /// Stage a native object and everything reachable from it into a row graph
    ///
    /// Objects with the same structural identity collapse into the first staged
    /// row. `origin` is the object's path from the root when it can be written back.
    pub fn stage(
        &self,
        obj: &dyn Any,
        graph: &mut RowGraph,
        origin: Option<OriginPath>,
    ) -> Result<RowId> {
        let row = self.map_into_row(obj)?;
        let key = row.structural_key(&self.keys, self.identity.as_deref());
        if let Some(existing) = key.as_ref().and_then(|k| graph.find(k)) {
            if let Some(origin) = origin {
                graph.row_mut(existing).add_origin(origin);
            }
            return Ok(existing);
        }

        let id = graph.insert(row);
        if let Some(key) = key {
            graph.register(key, id);
        }
        if let Some(origin) = origin.clone() {
            graph.row_mut(id).add_origin(origin);
        }

        for (index, relation) in self.relations.iter().enumerate() {
            let Some(access) = &relation.access else {
                continue;
            };
            let target = relation.target()?;
            let mut children = Vec::new();
            for (item, related) in access.related(obj)?.into_iter().enumerate() {
                let child = match related {
                    Related::Borrowed(child) => {
                        let path = origin.as_ref().map(|path| {
                            let mut path = path.clone();
                            path.push(PathStep {
                                relation: index,
                                item,
                            });
                            path
                        });
                        target.stage(child, graph, path)?
                    }
                    Related::Owned(child) => target.stage(&*child, graph, None)?,
                };
                children.push(child);
            }
            graph.row_mut(id).set_relation(relation.name.clone(), children);
        }
        Ok(id)
    }

    /// Follow an origin path down to the native object it names
    pub(crate) fn with_object_at(
        &self,
        obj: &mut dyn Any,
        path: &[PathStep],
        f: &mut dyn FnMut(&TypeMap, &mut dyn Any) -> Result<()>,
    ) -> Result<()> {
        let Some((step, rest)) = path.split_first() else {
            return f(self, obj);
        };
        let relation = self.relations.get(step.relation).ok_or_else(|| {
            DatabaseError::other(format!("{} has no relation #{}", self.type_name, step.relation))
        })?;
        let Some(access) = &relation.access else {
            return Ok(());
        };
        let target = relation.target()?;
        let mut related = access.related_mut(obj)?;
        if step.item >= related.len() {
            return Err(DatabaseError::other(format!(
                "relation \"{}\" of {} changed while saving",
                relation.name, self.type_name
            )));
        }
        let child = related.swap_remove(step.item);
        target.with_object_at(child, rest, f)
    }

    /// Visit a native object and every object reachable through member relations
    pub(crate) fn visit_mut(
        &self,
        obj: &mut dyn Any,
        f: &mut dyn FnMut(&TypeMap, &mut dyn Any) -> Result<()>,
    ) -> Result<()> {
        f(self, &mut *obj)?;
        for relation in &self.relations {
            let Some(access) = &relation.access else {
                continue;
            };
            let target = relation.target()?;
            for child in access.related_mut(&mut *obj)? {
                target.visit_mut(child, f)?;
            }
        }
        Ok(())
    }

    pub(crate) fn run_hook(&self, hook: Option<&HookFn>, obj: &mut dyn Any) -> Result<()> {
        match hook {
            Some(hook) => hook(obj),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for TypeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMap")
            .field("type", &self.type_name)
            .field("table", &self.table)
            .field("keys", &self.keys)
            .field("identity", &self.identity)
            .field("columns", &self.columns)
            .field("relations", &self.relations)
            .finish()
    }
}

/// Builds native objects out of a loaded row graph
///
/// A row that is reached again while it is still being materialized (a cycle)
/// is materialized with its columns only.
pub struct Materializer<'g> {
    graph: &'g RowGraph,
    active: RefCell<Vec<RowId>>,
}

impl<'g> Materializer<'g> {
    pub fn new(graph: &'g RowGraph) -> Self {
        Self {
            graph,
            active: RefCell::new(Vec::new()),
        }
    }

    pub fn graph(&self) -> &'g RowGraph {
        self.graph
    }

    /// Materialize a row into a fresh `T`
    pub fn materialize<T: Entity>(&self, map: &TypeMap, row: RowId) -> Result<T> {
        let mut obj = T::default();
        self.materialize_into(map, row, &mut obj)?;
        Ok(obj)
    }

    pub(crate) fn materialize_into(
        &self,
        map: &TypeMap,
        row: RowId,
        obj: &mut dyn Any,
    ) -> Result<()> {
        map.run_hook(map.hooks.begin_load.as_ref(), obj)?;
        map.map_from_row(self.graph.row(row), obj)?;

        let cyclic = self.active.borrow().contains(&row);
        if !cyclic {
            self.active.borrow_mut().push(row);
            let result = self.materialize_relations(map, row, obj);
            self.active.borrow_mut().pop();
            result?;
        }

        map.run_hook(map.hooks.end_load.as_ref(), obj)
    }

    fn materialize_relations(&self, map: &TypeMap, row: RowId, obj: &mut dyn Any) -> Result<()> {
        for relation in &map.relations {
            let Some(access) = &relation.access else {
                continue;
            };
            let rows = self
                .graph
                .row(row)
                .relation(&relation.name)
                .map(<[RowId]>::to_vec)
                .unwrap_or_default();
            let related = RelatedRows {
                materializer: self,
                map: relation.target()?,
                rows,
            };
            access.store(obj, related)?;
        }
        Ok(())
    }
}

/// Rows attached under one relation, handed to relation load callbacks
pub struct RelatedRows<'a> {
    materializer: &'a Materializer<'a>,
    map: Arc<TypeMap>,
    rows: Vec<RowId>,
}

impl<'a> RelatedRows<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Type map of the related rows
    pub fn type_map(&self) -> &TypeMap {
        &self.map
    }

    /// Raw intermediate rows
    pub fn rows(&self) -> impl Iterator<Item = &RowObject> + '_ {
        self.rows
            .iter()
            .map(move |id| self.materializer.graph().row(*id))
    }

    /// Build native objects out of the related rows
    pub fn materialize<R: Entity>(&self) -> Result<Vec<R>> {
        if !self.map.describes::<R>() {
            return Err(DatabaseError::configuration(format!(
                "relation rows of {} cannot be materialized as {}",
                self.map.type_name,
                short_type_name::<R>()
            )));
        }
        self.rows
            .iter()
            .map(|row| self.materializer.materialize::<R>(&self.map, *row))
            .collect()
    }
}

/// Keep callback failures as they are, wrap everything else with context
pub(crate) fn wrap_data_error(error: DatabaseError, context: impl FnOnce() -> String) -> DatabaseError {
    match error {
        e @ DatabaseError::ObjectInitialization { .. } => e,
        e => DatabaseError::initialization(context(), e),
    }
}

/// Map a failure returned by a user callback
pub(crate) fn callback_error(label: &str, error: CallbackError) -> DatabaseError {
    match error.downcast::<DatabaseError>() {
        Ok(inner) if matches!(*inner, DatabaseError::ObjectInitialization { .. }) => *inner,
        Ok(inner) => DatabaseError::callback_failed(label, inner),
        Err(other) => DatabaseError::callback_failed(label, other),
    }
}

/// Last path segment of a type name
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
