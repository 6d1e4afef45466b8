//! Graph load
//!
//! Selects rows of one type map, then resolves every relation in declaration
//! order. Rows are admitted into a [`RowGraph`]; a row whose structural key is
//! already known is not expanded again and the caller links the canonical row,
//! which is how cycles and shared references terminate.

use super::status::DbStatus;
use super::{BoxFuture, Session};
use crate::core::error::{DatabaseError, Result};
use crate::core::query_builder::{SelectBuilder, WhereCondition};
use crate::core::value::{DatabaseRow, DatabaseValue};
use crate::mapping::row::{RowGraph, RowId, RowObject};
use crate::mapping::schema::Entity;
use crate::mapping::type_map::{Materializer, RelationLink, TypeMap};
use std::sync::Arc;

/// Nesting depth at which a load gives up
///
/// Rows without unique keys cannot be recognized again, so a cycle through
/// them would never terminate.
pub const MAX_DEPTH: usize = 128;

/// Loads rows and their relations into one row graph
pub struct Loader<'s> {
    session: &'s Session,
    graph: RowGraph,
    depth: usize,
}

impl<'s> Loader<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self {
            session,
            graph: RowGraph::new(),
            depth: 0,
        }
    }

    pub fn graph(&self) -> &RowGraph {
        &self.graph
    }

    pub fn into_graph(self) -> RowGraph {
        self.graph
    }

    /// Load every row matching `condition` and everything reachable from it
    ///
    /// Returns the canonical row of every selected record, in result order.
    pub fn load<'a>(
        &'a mut self,
        map: Arc<TypeMap>,
        condition: Option<WhereCondition>,
    ) -> BoxFuture<'a, Result<Vec<RowId>>>
    where
        's: 'a,
    {
        Box::pin(async move {
            if self.depth >= MAX_DEPTH {
                return Err(DatabaseError::configuration(format!(
                    "relations of table \"{}\" nest deeper than {} levels",
                    map.table(),
                    MAX_DEPTH
                )));
            }

            let mut select = SelectBuilder::new(&map, self.session.backend())
                .allow_invalid_primitives(self.session.allows_invalid_primitives());
            if let Some(condition) = condition {
                select = select.filter(condition);
            }
            let statement = select.build()?;
            let records = self.session.query(&statement).await?;
            tracing::debug!(table = %map.table(), rows = records.len(), "selected");

            let mut ids = Vec::with_capacity(records.len());
            for record in records {
                let row = row_from_record(&map, record)?;
                let key = row.structural_key(map.keys(), map.identity());
                if let Some(existing) = key.as_ref().and_then(|k| self.graph.find(k)) {
                    tracing::trace!(table = %map.table(), "row already loaded, sharing it");
                    ids.push(existing);
                    continue;
                }

                let id = self.graph.insert(row);
                if let Some(key) = key {
                    self.graph.register(key, id);
                }
                self.depth += 1;
                let resolved = self.resolve_relations(&map, id).await;
                self.depth -= 1;
                resolved?;
                ids.push(id);
            }
            Ok(ids)
        })
    }

    async fn resolve_relations(&mut self, map: &TypeMap, id: RowId) -> Result<()> {
        for relation in map.relations() {
            let foreign_key = relation.foreign_key();
            let children = match self.source_values(id, foreign_key.source_columns()) {
                None => Vec::new(),
                Some(values) => match relation.junction() {
                    Some(junction) => {
                        self.load_through_junction(relation, junction, values)
                            .await?
                    }
                    None => match link_condition(foreign_key.target_columns(), values) {
                        Some(condition) => self.load(relation.target()?, Some(condition)).await?,
                        None => Vec::new(),
                    },
                },
            };
            self.graph
                .row_mut(id)
                .set_relation(relation.name().to_string(), children);
        }
        Ok(())
    }

    /// Junction rows are not materialized; their second leg is followed in place
    async fn load_through_junction(
        &mut self,
        relation: &RelationLink,
        junction: &Arc<TypeMap>,
        values: Vec<DatabaseValue>,
    ) -> Result<Vec<RowId>> {
        let Some(condition) = link_condition(relation.foreign_key().target_columns(), values)
        else {
            return Ok(Vec::new());
        };
        let leg = junction.relations().first().ok_or_else(|| {
            DatabaseError::configuration(format!(
                "junction table \"{}\" has no link to its target",
                junction.table()
            ))
        })?;
        let target = leg.target()?;

        let statement = SelectBuilder::new(junction, self.session.backend())
            .allow_invalid_primitives(self.session.allows_invalid_primitives())
            .filter(condition)
            .build()?;
        let links = self.session.query(&statement).await?;

        let mut children = Vec::new();
        for link in links {
            let values: Option<Vec<DatabaseValue>> = leg
                .foreign_key()
                .source_columns()
                .iter()
                .map(|column| link.get(column).filter(|v| !v.is_null()).cloned())
                .collect();
            let Some(condition) =
                values.and_then(|v| link_condition(leg.foreign_key().target_columns(), v))
            else {
                continue;
            };
            for id in self.load(Arc::clone(&target), Some(condition)).await? {
                if !children.contains(&id) {
                    children.push(id);
                }
            }
        }
        Ok(children)
    }

    /// Values of the given columns, `None` when any of them is null
    fn source_values(&self, id: RowId, columns: &[String]) -> Option<Vec<DatabaseValue>> {
        let row = self.graph.row(id);
        columns
            .iter()
            .map(|column| row.get(column).filter(|v| !v.is_null()).cloned())
            .collect()
    }
}

fn link_condition(columns: &[String], values: Vec<DatabaseValue>) -> Option<WhereCondition> {
    WhereCondition::all_equal(columns.iter().cloned().zip(values))
}

/// Convert a fetched record into a row of the type map
///
/// Columns of declared subtypes are carried as fetched; any other unknown
/// column is a data error.
pub(crate) fn row_from_record(map: &TypeMap, record: DatabaseRow) -> Result<RowObject> {
    let mut row = RowObject::new(map.table());
    for (column, value) in record {
        if let Some(binding) = map.column(&column) {
            let value = binding.normalize(value).map_err(|e| {
                DatabaseError::initialization(
                    format!(
                        "Failed to read column \"{}\" of table \"{}\"",
                        column,
                        map.table()
                    ),
                    e,
                )
            })?;
            row.set(column, value);
        } else if map.accepts_subtype_column(&column) {
            row.set(column, value);
        } else {
            return Err(DatabaseError::initialization(
                format!("Row of table \"{}\" has an unmapped column", map.table()),
                DatabaseError::ColumnNotFound(column),
            ));
        }
    }
    Ok(row)
}

/// Condition selecting a row by its single key column
pub fn key_condition(map: &TypeMap, key: DatabaseValue) -> Result<WhereCondition> {
    match map.keys() {
        [column] => Ok(WhereCondition::eq(column.clone(), key)),
        [] => Err(DatabaseError::configuration(format!(
            "{} has no key column to load by",
            map.type_name()
        ))),
        keys => Err(DatabaseError::configuration(format!(
            "{} has a composite key ({}); load it by conditions",
            map.type_name(),
            keys.join(", ")
        ))),
    }
}

/// Load the single object matching `condition`
pub async fn load_unique<T: Entity>(
    session: &Session,
    map: Arc<TypeMap>,
    condition: Option<WhereCondition>,
) -> Result<DbStatus<T>> {
    let mut loader = Loader::new(session);
    let ids = loader.load(Arc::clone(&map), condition).await?;
    match ids.as_slice() {
        [] => Ok(DbStatus::NotFound),
        [id] => {
            let graph = loader.into_graph();
            let object = Materializer::new(&graph).materialize::<T>(&map, *id)?;
            Ok(DbStatus::Success(object))
        }
        _ => Ok(DbStatus::MultipleFound),
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::backends::SqliteDatabase;
    use crate::core::database::Database;
    use crate::mapping::foreign_key::ForeignKey;
    use crate::mapping::primitive::PrimitiveKind;
    use crate::mapping::registry;
    use crate::mapping::schema::EntitySchema;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Person {
        id: i64,
        name: String,
        friends: Vec<Person>,
    }

    impl Entity for Person {
        fn schema() -> EntitySchema<Self> {
            EntitySchema::table("people")
                .identity("id", PrimitiveKind::Int64, |p: &Person| &p.id, |p: &mut Person| &mut p.id)
                .column("name", PrimitiveKind::Varchar, |p: &Person| &p.name, |p: &mut Person| &mut p.name)
                .many_to_many(
                    "friends",
                    "friendships",
                    ForeignKey::single("id", "person_id"),
                    ForeignKey::single("friend_id", "id"),
                    |p: &Person| &p.friends,
                    |p: &mut Person| &mut p.friends,
                )
        }
    }

    async fn session() -> Result<Session> {
        let db = SqliteDatabase::new();
        db.connect(":memory:").await?;
        db.execute("CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT)")
            .await?;
        db.execute("CREATE TABLE friendships (person_id INTEGER, friend_id INTEGER, PRIMARY KEY (person_id, friend_id))")
            .await?;
        db.execute("INSERT INTO people (id, name) VALUES (1, 'ana'), (2, 'bo'), (3, 'cy')")
            .await?;
        Ok(Session::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn test_mutual_friends_terminate() -> Result<()> {
        let session = session().await?;
        session
            .connection()
            .execute("INSERT INTO friendships VALUES (1, 2), (2, 1)")
            .await?;

        let map = registry::resolve::<Person>()?;
        let mut loader = Loader::new(&session);
        let ids = loader
            .load(Arc::clone(&map), Some(WhereCondition::eq("id", 1i64)))
            .await?;
        assert_eq!(ids.len(), 1);

        let graph = loader.graph();
        assert_eq!(graph.len(), 2);
        let bo = graph.row(ids[0]).relation("friends").map(<[RowId]>::to_vec);
        let bo = bo.unwrap_or_default();
        assert_eq!(bo.len(), 1);
        assert_eq!(graph.row(bo[0]).relation("friends"), Some(&ids[..]));
        Ok(())
    }

    #[tokio::test]
    async fn test_load_unique_statuses() -> Result<()> {
        let session = session().await?;
        let map = registry::resolve::<Person>()?;

        let found = load_unique::<Person>(&session, Arc::clone(&map), Some(key_condition(&map, 3i64.into())?)).await?;
        let cy = found.into_data().unwrap_or_default();
        assert_eq!(cy.name, "cy");
        assert!(cy.friends.is_empty());

        let missing = load_unique::<Person>(&session, Arc::clone(&map), Some(key_condition(&map, 9i64.into())?)).await?;
        assert_eq!(missing.code(), 10);

        let many = load_unique::<Person>(&session, map, None).await?;
        assert_eq!(many.code(), 11);
        Ok(())
    }

    #[tokio::test]
    async fn test_unmapped_column_is_data_error() -> Result<()> {
        let session = session().await?;
        session
            .connection()
            .execute("ALTER TABLE people ADD COLUMN nickname TEXT")
            .await?;

        let map = registry::resolve::<Person>()?;
        let err = Loader::new(&session).load(map, None).await.unwrap_err();
        assert!(matches!(err, DatabaseError::ObjectInitialization { .. }));
        Ok(())
    }
}
