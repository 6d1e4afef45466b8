//! Graph save and delete
//!
//! A save stages the object graph into a [`RowGraph`], plans one upsert per
//! distinct row plus the deletes that clear previously linked rows, and runs
//! the whole plan in a single transaction: deletes first, then upserts in
//! planning order. Foreign-key columns are links into the graph and resolve
//! when their statement is built, so identities generated by earlier inserts
//! reach later rows.

use super::status::DbStatus;
use super::Session;
use crate::core::database_types::DatabaseType;
use crate::core::error::{DatabaseError, Result};
use crate::core::query_builder::{DeleteBuilder, InsertBuilder, Statement, WhereCondition};
use crate::core::transaction::TransactionGuard;
use crate::core::value::DatabaseValue;
use crate::mapping::foreign_key::RelationKind;
use crate::mapping::row::{RowGraph, RowId, RowObject};
use crate::mapping::schema::Entity;
use crate::mapping::type_map::{RelationLink, TypeMap};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Statements of one save, in execution order
struct SavePlan {
    graph: RowGraph,
    deletes: Vec<Statement>,
    upserts: Vec<(Arc<TypeMap>, RowId)>,
}

struct Planner {
    backend: DatabaseType,
    lenient: bool,
    graph: RowGraph,
    visited: HashSet<RowId>,
    deletes: Vec<Statement>,
    upserts: Vec<(Arc<TypeMap>, RowId)>,
}

impl Planner {
    fn new(backend: DatabaseType, lenient: bool, graph: RowGraph) -> Self {
        Self {
            backend,
            lenient,
            graph,
            visited: HashSet::new(),
            deletes: Vec::new(),
            upserts: Vec::new(),
        }
    }

    fn children(&self, id: RowId, relation: &RelationLink) -> Vec<RowId> {
        self.graph
            .row(id)
            .relation(relation.name())
            .map(<[RowId]>::to_vec)
            .unwrap_or_default()
    }

    /// Plan a row and everything linked to it, depth first
    ///
    /// One-to-one targets come before their owner, which carries their key.
    fn plan(&mut self, map: &Arc<TypeMap>, id: RowId) -> Result<()> {
        if !self.visited.insert(id) {
            return Ok(());
        }

        for relation in map.relations() {
            if relation.kind() != RelationKind::OneToOne {
                continue;
            }
            let target = relation.target()?;
            for child in self.children(id, relation) {
                for (source, target_column) in relation.foreign_key().pairs() {
                    self.graph.row_mut(id).link(source, child, target_column);
                }
                self.plan(&target, child)?;
            }
        }

        self.upserts.push((Arc::clone(map), id));

        for relation in map.relations() {
            match relation.kind() {
                RelationKind::OneToOne => {}
                RelationKind::OneToMany => {
                    let target = relation.target()?;
                    let foreign_key = relation.foreign_key();
                    self.clear(map, id, &target, foreign_key.source_columns(), foreign_key.target_columns())?;
                    for child in self.children(id, relation) {
                        for (source, target_column) in foreign_key.pairs() {
                            self.graph.row_mut(child).link(target_column, id, source);
                        }
                        self.plan(&target, child)?;
                    }
                }
                RelationKind::ManyToMany => self.plan_junction(map, id, relation)?,
            }
        }
        Ok(())
    }

    fn plan_junction(&mut self, map: &Arc<TypeMap>, id: RowId, relation: &RelationLink) -> Result<()> {
        let junction = relation.junction().ok_or_else(|| {
            DatabaseError::configuration(format!(
                "many-to-many relation \"{}\" has no junction table",
                relation.name()
            ))
        })?;
        let leg = junction.relations().first().ok_or_else(|| {
            DatabaseError::configuration(format!(
                "junction table \"{}\" has no link to its target",
                junction.table()
            ))
        })?;
        let target = relation.target()?;
        let foreign_key = relation.foreign_key();
        self.clear(map, id, junction, foreign_key.source_columns(), foreign_key.target_columns())?;

        for child in self.children(id, relation) {
            self.plan(&target, child)?;

            let link = self.graph.insert(RowObject::new(junction.table()));
            for (owner_column, junction_column) in foreign_key.pairs() {
                self.graph.row_mut(link).link(junction_column, id, owner_column);
            }
            for (junction_column, target_column) in leg.foreign_key().pairs() {
                self.graph.row_mut(link).link(junction_column, child, target_column);
            }
            self.visited.insert(link);
            self.upserts.push((Arc::clone(junction), link));
        }
        Ok(())
    }

    /// Delete the rows of `target` currently linked to the owner row
    ///
    /// Skipped while the owner's key is unset, nothing can be linked to it yet.
    fn clear(
        &mut self,
        owner: &TypeMap,
        id: RowId,
        target: &TypeMap,
        source_columns: &[String],
        target_columns: &[String],
    ) -> Result<()> {
        let mut values = Vec::with_capacity(source_columns.len());
        for column in source_columns {
            let value = self.graph.resolve(id, column)?;
            let unset = if owner.identity() == Some(column.as_str()) {
                value.is_unset_key()
            } else {
                value.is_null()
            };
            if unset {
                return Ok(());
            }
            values.push(value);
        }
        let Some(condition) = WhereCondition::all_equal(target_columns.iter().cloned().zip(values))
        else {
            return Ok(());
        };
        let statement = DeleteBuilder::new(target, self.backend)
            .allow_invalid_primitives(self.lenient)
            .filter(condition)
            .build()?;
        self.deletes.push(statement);
        Ok(())
    }

    fn finish(self) -> SavePlan {
        SavePlan {
            graph: self.graph,
            deletes: self.deletes,
            upserts: self.upserts,
        }
    }
}

impl SavePlan {
    fn statement_count(&self) -> usize {
        self.deletes.len() + self.upserts.len()
    }

    /// Current values of every column of a planned row
    fn values_of(&self, map: &TypeMap, id: RowId) -> Result<HashMap<String, DatabaseValue>> {
        map.columns()
            .iter()
            .map(|column| Ok((column.name().to_string(), self.graph.resolve(id, column.name())?)))
            .collect()
    }

    fn identity_unset(&self, map: &TypeMap, id: RowId) -> Result<bool> {
        match map.identity() {
            Some(identity) => Ok(self.graph.resolve(id, identity)?.is_unset_key()),
            None => Ok(false),
        }
    }

    /// Run every statement inside the transaction; returns the rows that got an identity
    async fn run(&mut self, session: &Session, tx: &TransactionGuard) -> Result<HashSet<RowId>> {
        for statement in &self.deletes {
            session.run_in(tx, statement).await?;
        }

        let mut generated = HashSet::new();
        for index in 0..self.upserts.len() {
            let (map, id) = (Arc::clone(&self.upserts[index].0), self.upserts[index].1);
            let unset = self.identity_unset(&map, id)?;
            let statement = InsertBuilder::new(&map, session.backend())
                .allow_invalid_primitives(session.allows_invalid_primitives())
                .upsert(true)
                .values(self.values_of(&map, id)?)
                .build()?;
            let outcome = session.run_in(tx, &statement).await?;

            if let (true, Some(identity), Some(new_id)) = (unset, map.identity(), outcome.last_insert_id) {
                let value = map
                    .require_column(identity)?
                    .normalize(DatabaseValue::Long(new_id))?;
                self.graph.row_mut(id).set(identity, value);
                generated.insert(id);
            }
        }
        Ok(generated)
    }

    /// Copy generated identities and resolved foreign keys onto the native objects
    fn write_back(&mut self, root: &TypeMap, object: &mut dyn Any, generated: &HashSet<RowId>) -> Result<()> {
        let linked: Vec<(RowId, Vec<String>)> = self
            .upserts
            .iter()
            .map(|(_, id)| {
                let columns = self.graph.row(*id).linked_columns().map(str::to_string).collect();
                (*id, columns)
            })
            .collect();
        self.graph.settle_links()?;

        for (id, columns) in linked {
            let row = self.graph.row(id);
            if row.origins().is_empty() {
                continue;
            }
            let identity_generated = generated.contains(&id);
            for origin in row.origins() {
                root.with_object_at(&mut *object, origin, &mut |map: &TypeMap, obj: &mut dyn Any| {
                    if identity_generated {
                        if let Some(identity) = map.identity() {
                            let value = row.get(identity).cloned().unwrap_or(DatabaseValue::Null);
                            map.assign_identity(obj, value)?;
                        }
                    }
                    for column in &columns {
                        if let Some(binding) = map.column(column) {
                            let value = row.get(column).cloned().unwrap_or(DatabaseValue::Null);
                            binding.write(obj, value)?;
                        }
                    }
                    Ok(())
                })?;
            }
        }
        Ok(())
    }
}

fn run_hooks(map: &TypeMap, object: &mut dyn Any, begin: bool) -> Result<()> {
    map.visit_mut(object, &mut |map: &TypeMap, obj: &mut dyn Any| {
        let hook = if begin {
            map.hooks.begin_save.as_ref()
        } else {
            map.hooks.end_save.as_ref()
        };
        map.run_hook(hook, obj)
    })
}

/// Save an object graph in one transaction
///
/// Statement failures roll the transaction back and are returned as errors;
/// generated identities are written back only after the commit.
pub async fn save_object<T: Entity>(
    session: &Session,
    map: Arc<TypeMap>,
    object: &mut T,
) -> Result<DbStatus> {
    run_hooks(&map, object, true)?;

    let mut graph = RowGraph::new();
    let root = map.stage(&*object, &mut graph, Some(Vec::new()))?;
    let mut planner = Planner::new(session.backend(), session.allows_invalid_primitives(), graph);
    planner.plan(&map, root)?;
    let mut plan = planner.finish();
    tracing::debug!(
        table = %map.table(),
        deletes = plan.deletes.len(),
        upserts = plan.upserts.len(),
        "save planned"
    );

    let tx = session.begin().await?;
    let generated = match plan.run(session, &tx).await {
        Ok(generated) => generated,
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::error!(error = %rollback, "rollback after failed save failed");
            }
            return Err(e);
        }
    };
    tx.commit().await?;
    tracing::info!(
        table = %map.table(),
        statements = plan.statement_count(),
        identities = generated.len(),
        "save committed"
    );

    plan.write_back(&map, object, &generated)?;
    run_hooks(&map, object, false)?;
    Ok(DbStatus::Success(()))
}

/// Delete the single row an object is stored in
///
/// Related rows are left alone. An object whose key is still unset was never
/// stored and is reported as not found.
pub async fn delete_object<T: Entity>(session: &Session, map: Arc<TypeMap>, object: &T) -> Result<DbStatus> {
    if map.keys().is_empty() {
        return Err(DatabaseError::configuration(format!(
            "{} has no key to delete by",
            map.type_name()
        )));
    }
    let row = map.map_into_row(object)?;
    let mut pairs = Vec::with_capacity(map.keys().len());
    for key in map.keys() {
        let value = row.get(key).cloned().unwrap_or(DatabaseValue::Null);
        let unset = if map.identity() == Some(key.as_str()) {
            value.is_unset_key()
        } else {
            value.is_null()
        };
        if unset {
            tracing::debug!(table = %map.table(), key = %key, "delete of an unsaved object");
            return Ok(DbStatus::NotFound);
        }
        pairs.push((key.clone(), value));
    }
    let condition = WhereCondition::all_equal(pairs)
        .ok_or_else(|| DatabaseError::configuration("delete without a condition"))?;

    let statement = DeleteBuilder::new(&map, session.backend())
        .allow_invalid_primitives(session.allows_invalid_primitives())
        .filter(condition)
        .limit(1)
        .build()?;
    match session.execute(&statement).await? {
        0 => Ok(DbStatus::NotFound),
        _ => Ok(DbStatus::Success(())),
    }
}
