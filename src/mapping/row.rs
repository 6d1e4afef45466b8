//! Intermediate row objects
//!
//! Rows are the exchange format between native objects and SQL statements. A single
//! load or save pass keeps all of its rows in one [`RowGraph`] arena; rows refer to
//! related rows by [`RowId`], so one canonical row can be shared by several parents
//! and cyclic graphs need no reference counting.

use crate::core::error::{DatabaseError, Result};
use crate::core::value::DatabaseValue;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Index of a row inside its [`RowGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(usize);

impl RowId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Step from a native object into one of its related objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathStep {
    /// Index of the relation in the owner's type map
    pub relation: usize,
    /// Position of the object inside the relation
    pub item: usize,
}

/// Location of a staged native object relative to the root object
pub type OriginPath = Vec<PathStep>;

/// Column/relation-name keyed representation of one table row
#[derive(Debug, Clone, Default)]
pub struct RowObject {
    table: String,
    values: HashMap<String, DatabaseValue>,
    relations: HashMap<String, Vec<RowId>>,
    links: HashMap<String, (RowId, String)>,
    origins: Vec<OriginPath>,
}

impl RowObject {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Column value, if the column is present
    pub fn get(&self, column: &str) -> Option<&DatabaseValue> {
        self.values.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: DatabaseValue) {
        self.values.insert(column.into(), value);
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn values(&self) -> &HashMap<String, DatabaseValue> {
        &self.values
    }

    /// Rows attached under a relation's logical name
    pub fn relation(&self, name: &str) -> Option<&[RowId]> {
        self.relations.get(name).map(Vec::as_slice)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, rows: Vec<RowId>) {
        self.relations.insert(name.into(), rows);
    }

    /// Take the column's value from another row when statements are executed
    pub fn link(&mut self, column: impl Into<String>, source: RowId, source_column: impl Into<String>) {
        self.links.insert(column.into(), (source, source_column.into()));
    }

    pub fn linked_columns(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(String::as_str)
    }

    pub fn origins(&self) -> &[OriginPath] {
        &self.origins
    }

    pub fn add_origin(&mut self, path: OriginPath) {
        self.origins.push(path);
    }

    /// Structural identity over the given key columns
    ///
    /// `None` when the row has no keys, a key is null, or the identity column is
    /// still unset; such rows only compare by reference.
    pub fn structural_key(&self, keys: &[String], identity: Option<&str>) -> Option<RowKey> {
        if keys.is_empty() {
            return None;
        }
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = self.values.get(key)?;
            let unset = if Some(key.as_str()) == identity {
                value.is_unset_key()
            } else {
                value.is_null()
            };
            if unset {
                return None;
            }
            values.push(KeyValue(value.clone()));
        }
        Some(RowKey {
            table: self.table.clone(),
            values,
        })
    }
}

/// Hashable wrapper comparing values across integer widths
#[derive(Debug, Clone)]
pub struct KeyValue(pub DatabaseValue);

#[derive(PartialEq, Eq, Hash)]
enum Canonical<'a> {
    Null,
    Integer(i128),
    Real(u64),
    Text(&'a str),
    Bytes(&'a [u8]),
    Time(chrono::NaiveDateTime),
}

impl KeyValue {
    fn canonical(&self) -> Canonical<'_> {
        match &self.0 {
            DatabaseValue::Null => Canonical::Null,
            DatabaseValue::Bool(v) => Canonical::Integer(i128::from(*v)),
            DatabaseValue::ULong(v) => Canonical::Integer(i128::from(*v)),
            DatabaseValue::Float(v) => Canonical::Real(f64::from(*v).to_bits()),
            DatabaseValue::Double(v) => Canonical::Real(v.to_bits()),
            DatabaseValue::Decimal(s) | DatabaseValue::String(s) => Canonical::Text(s),
            DatabaseValue::Bytes(b) => Canonical::Bytes(b),
            DatabaseValue::DateTime(v) => Canonical::Time(*v),
            other => Canonical::Integer(i128::from(other.as_long().unwrap_or_default())),
        }
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for KeyValue {}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

/// Structural identity of a row: table plus unique-key values
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    table: String,
    values: Vec<KeyValue>,
}

impl RowKey {
    pub fn table(&self) -> &str {
        &self.table
    }
}

/// Arena holding every row of one load or save pass
#[derive(Debug, Default)]
pub struct RowGraph {
    rows: Vec<RowObject>,
    index: HashMap<RowKey, RowId>,
}

impl RowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, row: RowObject) -> RowId {
        let id = RowId(self.rows.len());
        self.rows.push(row);
        id
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, id: RowId) -> &RowObject {
        &self.rows[id.0]
    }

    pub fn row_mut(&mut self, id: RowId) -> &mut RowObject {
        &mut self.rows[id.0]
    }

    pub fn ids(&self) -> impl Iterator<Item = RowId> {
        (0..self.rows.len()).map(RowId)
    }

    /// Row already registered under the given structural identity
    pub fn find(&self, key: &RowKey) -> Option<RowId> {
        self.index.get(key).copied()
    }

    /// Register a row as the canonical row of its structural identity
    pub fn register(&mut self, key: RowKey, id: RowId) {
        self.index.entry(key).or_insert(id);
    }

    /// Current value of a column, following column links to their source row
    pub fn resolve(&self, id: RowId, column: &str) -> Result<DatabaseValue> {
        let mut current = (id, column);
        for _ in 0..=self.rows.len() {
            let row = self.row(current.0);
            match row.links.get(current.1) {
                Some((source, source_column)) => current = (*source, source_column.as_str()),
                None => return Ok(row.get(current.1).cloned().unwrap_or(DatabaseValue::Null)),
            }
        }
        Err(DatabaseError::configuration(format!(
            "column \"{}\" of table \"{}\" is linked in a cycle",
            column,
            self.row(id).table()
        )))
    }

    /// Replace every column link by the value it currently resolves to
    pub fn settle_links(&mut self) -> Result<()> {
        for index in 0..self.rows.len() {
            let id = RowId(index);
            let columns: Vec<String> = self.rows[index].links.keys().cloned().collect();
            for column in columns {
                let value = self.resolve(id, &column)?;
                let row = &mut self.rows[index];
                row.links.remove(&column);
                row.values.insert(column, value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_structural_key_ignores_integer_width() {
        let mut a = RowObject::new("users");
        a.set("id", DatabaseValue::Int(7));
        let mut b = RowObject::new("users");
        b.set("id", DatabaseValue::Long(7));

        let ka = a.structural_key(&keys(&["id"]), Some("id"));
        let kb = b.structural_key(&keys(&["id"]), Some("id"));
        assert!(ka.is_some());
        assert_eq!(ka, kb);
    }

    #[test]
    fn test_unset_identity_has_no_structural_key() {
        let mut row = RowObject::new("users");
        row.set("id", DatabaseValue::Int(0));
        assert!(row.structural_key(&keys(&["id"]), Some("id")).is_none());

        row.set("id", DatabaseValue::Null);
        assert!(row.structural_key(&keys(&["id"]), None).is_none());

        assert!(row.structural_key(&[], None).is_none());
    }

    #[test]
    fn test_tables_distinguish_keys() {
        let mut a = RowObject::new("users");
        a.set("id", DatabaseValue::Int(1));
        let mut b = RowObject::new("roles");
        b.set("id", DatabaseValue::Int(1));
        assert_ne!(
            a.structural_key(&keys(&["id"]), Some("id")),
            b.structural_key(&keys(&["id"]), Some("id"))
        );
    }

    #[test]
    fn test_links_follow_chains() -> Result<()> {
        let mut graph = RowGraph::new();
        let user = graph.insert(RowObject::new("users"));
        let order = graph.insert(RowObject::new("orders"));
        let line = graph.insert(RowObject::new("lines"));

        graph.row_mut(order).link("user_id", user, "id");
        graph.row_mut(line).link("user_id", order, "user_id");
        assert_eq!(graph.resolve(line, "user_id")?, DatabaseValue::Null);

        graph.row_mut(user).set("id", DatabaseValue::Long(42));
        assert_eq!(graph.resolve(line, "user_id")?, DatabaseValue::Long(42));

        graph.settle_links()?;
        assert_eq!(graph.row(order).get("user_id"), Some(&DatabaseValue::Long(42)));
        assert_eq!(graph.row(line).linked_columns().count(), 0);
        Ok(())
    }

    #[test]
    fn test_link_cycle_is_reported() {
        let mut graph = RowGraph::new();
        let a = graph.insert(RowObject::new("a"));
        let b = graph.insert(RowObject::new("b"));
        graph.row_mut(a).link("x", b, "x");
        graph.row_mut(b).link("x", a, "x");
        assert!(graph.resolve(a, "x").is_err());
    }

    #[test]
    fn test_register_keeps_first_row() {
        let mut graph = RowGraph::new();
        let mut row = RowObject::new("roles");
        row.set("id", DatabaseValue::Int(3));
        let key = row.structural_key(&keys(&["id"]), Some("id"));
        let first = graph.insert(row.clone());
        let second = graph.insert(row);

        if let Some(key) = key {
            graph.register(key.clone(), first);
            graph.register(key.clone(), second);
            assert_eq!(graph.find(&key), Some(first));
        } else {
            panic!("expected a structural key");
        }
    }
}
