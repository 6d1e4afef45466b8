//! Dialect-aware SQL statement builder
//!
//! Builds parameterized statements for the columns of a [`TypeMap`]. Every value
//! travels as a named [`BoundParameter`] that carries the backend parameter kind,
//! so no value is ever spliced into statement text.
//!
//! Placeholders are named `@whereparam{n}` (conditions), `@insertval_{row}_{col}`
//! (inserted values) and `@assignparam{n}` (update assignments). Parameters are
//! listed in the order their placeholders first appear in the text, which lets
//! positional drivers bind them in sequence.

use super::database_types::DatabaseType;
use super::error::{DatabaseError, Result};
use super::value::DatabaseValue;
use crate::mapping::primitive::{ParameterKind, PrimitiveKind};
use crate::mapping::row::RowObject;
use crate::mapping::type_map::TypeMap;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Precision and scale bound for decimal parameters
pub const DECIMAL_PRECISION: (u8, u8) = (18, 0);

const MERGE_TARGET: &str = "__MERGE_TARGET__";
const MERGE_SOURCE: &str = "__MERGE_SOURCE__";

/// SQL comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal to (=)
    Eq,
    /// Not equal to (!=)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// LIKE pattern matching
    Like,
    /// IS NULL
    IsNull,
    /// IS NOT NULL
    IsNotNull,
}

impl Operator {
    fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => " LIKE ",
            Operator::IsNull => " IS NULL",
            Operator::IsNotNull => " IS NOT NULL",
        }
    }

    /// Whether the operator compares against a bound value
    pub fn takes_value(&self) -> bool {
        !matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

/// Logical connective between two condition nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

impl Conjunction {
    fn as_sql(&self) -> &'static str {
        match self {
            Conjunction::And => " AND ",
            Conjunction::Or => " OR ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Predicate {
    column: String,
    operator: Operator,
    value: DatabaseValue,
}

/// Chain of `(column, operator, value)` nodes, rendered left to right
#[derive(Debug, Clone, PartialEq)]
pub struct WhereCondition {
    first: Predicate,
    rest: Vec<(Conjunction, Predicate)>,
}

impl WhereCondition {
    pub fn new(column: impl Into<String>, operator: Operator, value: impl Into<DatabaseValue>) -> Self {
        Self {
            first: Predicate {
                column: column.into(),
                operator,
                value: value.into(),
            },
            rest: Vec::new(),
        }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        Self::new(column, Operator::Eq, value)
    }

    /// `column IS NULL`
    pub fn is_null(column: impl Into<String>) -> Self {
        Self::new(column, Operator::IsNull, DatabaseValue::Null)
    }

    /// Equality on every pair, joined with AND; `None` for no pairs
    pub fn all_equal<I, C, V>(pairs: I) -> Option<Self>
    where
        I: IntoIterator<Item = (C, V)>,
        C: Into<String>,
        V: Into<DatabaseValue>,
    {
        let mut pairs = pairs.into_iter();
        let (column, value) = pairs.next()?;
        let mut condition = Self::eq(column, value);
        for (column, value) in pairs {
            condition = condition.and(column, Operator::Eq, value);
        }
        Some(condition)
    }

    #[must_use]
    pub fn and(mut self, column: impl Into<String>, operator: Operator, value: impl Into<DatabaseValue>) -> Self {
        self.push(Conjunction::And, column.into(), operator, value.into());
        self
    }

    #[must_use]
    pub fn or(mut self, column: impl Into<String>, operator: Operator, value: impl Into<DatabaseValue>) -> Self {
        self.push(Conjunction::Or, column.into(), operator, value.into());
        self
    }

    fn push(&mut self, conjunction: Conjunction, column: String, operator: Operator, value: DatabaseValue) {
        self.rest.push((
            conjunction,
            Predicate {
                column,
                operator,
                value,
            },
        ));
    }

    /// Number of nodes in the chain
    pub fn len(&self) -> usize {
        1 + self.rest.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Columns referenced by the chain, in order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        std::iter::once(&self.first)
            .chain(self.rest.iter().map(|(_, p)| p))
            .map(|p| p.column.as_str())
    }

    /// Render the chain, appending one parameter per value-taking node
    ///
    /// Every node consumes a depth, so placeholders keep their position even
    /// when `IS NULL` nodes sit between them.
    fn render(
        &self,
        map: &TypeMap,
        backend: DatabaseType,
        lenient: bool,
        parameters: &mut Vec<BoundParameter>,
    ) -> Result<String> {
        let mut text = String::new();
        let nodes = std::iter::once((None, &self.first))
            .chain(self.rest.iter().map(|(c, p)| (Some(*c), p)));
        for (depth, (conjunction, predicate)) in nodes.enumerate() {
            if let Some(conjunction) = conjunction {
                text.push_str(conjunction.as_sql());
            }
            let column = map.require_column(&predicate.column)?;
            text.push_str(&predicate.column);
            text.push_str(predicate.operator.as_sql());
            if predicate.operator.takes_value() {
                let name = format!("@whereparam{}", depth);
                text.push_str(&name);
                let value = column.normalize(predicate.value.clone())?;
                parameters.push(BoundParameter::bind(name, value, column.kind(), backend, lenient)?);
            }
        }
        Ok(text)
    }
}

/// One named statement parameter with its binding metadata
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub name: String,
    pub value: DatabaseValue,
    pub primitive: PrimitiveKind,
    pub kind: ParameterKind,
    /// Length for string and binary kinds
    pub size: Option<usize>,
    /// Precision and scale for decimals
    pub precision: Option<(u8, u8)>,
}

impl BoundParameter {
    pub fn new(
        name: impl Into<String>,
        value: DatabaseValue,
        primitive: PrimitiveKind,
        backend: DatabaseType,
    ) -> Result<Self> {
        let kind = primitive.backend_parameter_kind(backend)?;
        Ok(Self::with_kind(name, value, primitive, kind))
    }

    /// Like [`BoundParameter::new`], but a kind the backend rejects binds
    /// with its neutral parameter kind instead of failing
    pub fn neutral(
        name: impl Into<String>,
        value: DatabaseValue,
        primitive: PrimitiveKind,
        backend: DatabaseType,
    ) -> Result<Self> {
        let kind = match primitive.backend_parameter_kind(backend) {
            Ok(kind) => kind,
            Err(e) => primitive.parameter_kind().ok_or(e)?,
        };
        Ok(Self::with_kind(name, value, primitive, kind))
    }

    fn bind(
        name: impl Into<String>,
        value: DatabaseValue,
        primitive: PrimitiveKind,
        backend: DatabaseType,
        lenient: bool,
    ) -> Result<Self> {
        if lenient {
            Self::neutral(name, value, primitive, backend)
        } else {
            Self::new(name, value, primitive, backend)
        }
    }

    fn with_kind(
        name: impl Into<String>,
        value: DatabaseValue,
        primitive: PrimitiveKind,
        kind: ParameterKind,
    ) -> Self {
        let size = primitive.requires_length().then(|| match &value {
            DatabaseValue::String(s) | DatabaseValue::Decimal(s) => s.len(),
            DatabaseValue::Bytes(b) => b.len(),
            _ => 0,
        });
        let precision = primitive
            .requires_precision_and_scale()
            .then_some(DECIMAL_PRECISION);
        Self {
            name: name.into(),
            value,
            primitive,
            kind,
            size,
            precision,
        }
    }
}

/// Statement text plus its ordered parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub parameters: Vec<BoundParameter>,
}

impl Statement {
    /// Raw statement without parameters
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Vec::new(),
        }
    }

    /// Parameter values in binding order
    pub fn values(&self) -> Vec<DatabaseValue> {
        self.parameters.iter().map(|p| p.value.clone()).collect()
    }

    pub fn parameter(&self, name: &str) -> Option<&BoundParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// SELECT statement builder
#[derive(Debug, Clone)]
pub struct SelectBuilder<'m> {
    map: &'m TypeMap,
    backend: DatabaseType,
    lenient: bool,
    columns: Vec<String>,
    condition: Option<WhereCondition>,
}

impl<'m> SelectBuilder<'m> {
    /// Select every column (`*`) of the map's table
    pub fn new(map: &'m TypeMap, backend: DatabaseType) -> Self {
        Self {
            map,
            backend,
            lenient: false,
            columns: Vec::new(),
            condition: None,
        }
    }

    /// Bind kinds the backend rejects with their neutral parameter kind
    #[must_use]
    pub fn allow_invalid_primitives(mut self, allow: bool) -> Self {
        self.lenient = allow;
        self
    }

    /// Select specific columns
    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    #[must_use]
    pub fn filter(mut self, condition: WhereCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn build(&self) -> Result<Statement> {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            for column in &self.columns {
                self.map.require_column(column)?;
            }
            self.columns.join(",")
        };
        let mut parameters = Vec::new();
        let mut text = format!("SELECT {} FROM {}", columns, self.map.table());
        if let Some(condition) = &self.condition {
            text.push_str(" WHERE ");
            text.push_str(&condition.render(self.map, self.backend, self.lenient, &mut parameters)?);
        }
        Ok(Statement { text, parameters })
    }
}

/// INSERT / upsert statement builder
#[derive(Debug, Clone)]
pub struct InsertBuilder<'m> {
    map: &'m TypeMap,
    backend: DatabaseType,
    lenient: bool,
    rows: Vec<HashMap<String, DatabaseValue>>,
    upsert: bool,
}

impl<'m> InsertBuilder<'m> {
    pub fn new(map: &'m TypeMap, backend: DatabaseType) -> Self {
        Self {
            map,
            backend,
            lenient: false,
            rows: Vec::new(),
            upsert: false,
        }
    }

    /// Bind kinds the backend rejects with their neutral parameter kind
    #[must_use]
    pub fn allow_invalid_primitives(mut self, allow: bool) -> Self {
        self.lenient = allow;
        self
    }

    /// Update rows whose keys already exist instead of failing
    #[must_use]
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    /// Add the column values of one row; missing columns bind as null
    #[must_use]
    pub fn row(mut self, row: &RowObject) -> Self {
        self.rows.push(row.values().clone());
        self
    }

    /// Add one row from explicit values
    #[must_use]
    pub fn values(mut self, values: HashMap<String, DatabaseValue>) -> Self {
        self.rows.push(values);
        self
    }

    fn value_of(&self, row: usize, column: &str) -> DatabaseValue {
        self.rows[row]
            .get(column)
            .cloned()
            .unwrap_or(DatabaseValue::Null)
    }

    /// Inserted columns; the identity column is left to the backend when no row sets it
    fn insert_columns(&self) -> Vec<&'m str> {
        let map = self.map;
        let identity = map.identity();
        let identity_unset = (0..self.rows.len())
            .all(|row| identity.map_or(true, |id| self.value_of(row, id).is_unset_key()));
        map.columns()
            .iter()
            .map(|c| c.name())
            .filter(|name| !(identity_unset && Some(*name) == identity))
            .collect()
    }

    pub fn build(&self) -> Result<Statement> {
        if self.rows.is_empty() {
            return Err(DatabaseError::configuration(format!(
                "insert into \"{}\" has no rows",
                self.map.table()
            )));
        }
        for row in &self.rows {
            for column in row.keys() {
                self.map.require_column(column)?;
            }
        }
        let columns = self.insert_columns();
        if columns.is_empty() {
            return self.build_defaults();
        }
        if self.upsert && self.backend == DatabaseType::Mssql {
            return self.build_merge(&columns);
        }

        let mut parameters = Vec::new();
        let mut text = format!("INSERT INTO {}({}) VALUES ", self.map.table(), columns.join(","));
        let tuples = self.value_tuples(&columns, &mut parameters)?;
        text.push_str(
            &tuples
                .iter()
                .map(|t| format!("({})", t.join(",")))
                .collect::<Vec<_>>()
                .join(","),
        );

        if self.upsert && !self.map.keys().is_empty() {
            match self.backend {
                DatabaseType::Sqlite => {
                    let updates: Vec<String> = columns
                        .iter()
                        .filter(|c| !self.is_key(c))
                        .map(|c| format!("{}=excluded.{}", c, c))
                        .collect();
                    let _ = write!(text, " ON CONFLICT({}) ", self.map.keys().join(","));
                    if updates.is_empty() {
                        text.push_str("DO NOTHING");
                    } else {
                        let _ = write!(text, "DO UPDATE SET {}", updates.join(","));
                    }
                }
                DatabaseType::Mysql | DatabaseType::None | DatabaseType::Mssql => {
                    let updates: Vec<String> =
                        columns.iter().map(|c| format!("{}=VALUES({})", c, c)).collect();
                    let _ = write!(text, " ON DUPLICATE KEY UPDATE {}", updates.join(","));
                }
            }
        }
        Ok(Statement { text, parameters })
    }

    fn is_key(&self, column: &str) -> bool {
        self.map.keys().iter().any(|k| k == column)
    }

    fn value_tuples(
        &self,
        columns: &[&str],
        parameters: &mut Vec<BoundParameter>,
    ) -> Result<Vec<Vec<String>>> {
        let mut tuples = Vec::with_capacity(self.rows.len());
        for row in 0..self.rows.len() {
            let mut names = Vec::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                let binding = self.map.require_column(column)?;
                let name = format!("@insertval_{}_{}", row, index);
                let value = binding.normalize(self.value_of(row, column))?;
                parameters.push(BoundParameter::bind(
                    name.clone(),
                    value,
                    binding.kind(),
                    self.backend,
                    self.lenient,
                )?);
                names.push(name);
            }
            tuples.push(names);
        }
        Ok(tuples)
    }

    /// Rows whose only column is an unset identity; nothing can conflict
    fn build_defaults(&self) -> Result<Statement> {
        let table = self.map.table();
        let text = match self.backend {
            DatabaseType::Mysql | DatabaseType::None => format!(
                "INSERT INTO {} () VALUES {}",
                table,
                vec!["()"; self.rows.len()].join(",")
            ),
            DatabaseType::Mssql | DatabaseType::Sqlite if self.rows.len() == 1 => {
                format!("INSERT INTO {} DEFAULT VALUES", table)
            }
            DatabaseType::Mssql | DatabaseType::Sqlite => {
                return Err(DatabaseError::configuration(format!(
                    "insert of {} default rows into \"{}\" needs one statement per row",
                    self.rows.len(),
                    table
                )));
            }
        };
        Ok(Statement::raw(text))
    }

    fn build_merge(&self, columns: &[&str]) -> Result<Statement> {
        let map = self.map;
        let mut parameters = Vec::new();
        let sources: Vec<String> = self
            .value_tuples(columns, &mut parameters)?
            .into_iter()
            .map(|names| format!("SELECT {}", names.join(",")))
            .collect();

        let on_columns: Vec<&str> = if map.keys().is_empty() {
            columns.to_vec()
        } else {
            columns.iter().copied().filter(|c| self.is_key(c)).collect()
        };
        let on = if on_columns.is_empty() {
            // new rows without any other key never match
            "1=0".to_string()
        } else {
            on_columns
                .iter()
                .map(|c| format!("{}.{}={}.{}", MERGE_TARGET, c, MERGE_SOURCE, c))
                .collect::<Vec<_>>()
                .join(" AND ")
        };

        let mut text = format!(
            "MERGE INTO {} AS {} USING ({}) AS {} ({}) ON ({})",
            map.table(),
            MERGE_TARGET,
            sources.join(" UNION ALL "),
            MERGE_SOURCE,
            columns.join(","),
            on
        );

        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !self.is_key(c))
            .map(|c| format!("{}.{}={}.{}", MERGE_TARGET, c, MERGE_SOURCE, c))
            .collect();
        if !updates.is_empty() {
            let _ = write!(text, " WHEN MATCHED THEN UPDATE SET {}", updates.join(","));
        }

        let inserted: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|c| Some(*c) != map.identity())
            .collect();
        if inserted.is_empty() {
            text.push_str(" WHEN NOT MATCHED THEN INSERT DEFAULT VALUES;");
        } else {
            let _ = write!(
                text,
                " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
                inserted.join(","),
                inserted
                    .iter()
                    .map(|c| format!("{}.{}", MERGE_SOURCE, c))
                    .collect::<Vec<_>>()
                    .join(",")
            );
        }
        Ok(Statement { text, parameters })
    }
}

/// UPDATE statement builder
#[derive(Debug, Clone)]
pub struct UpdateBuilder<'m> {
    map: &'m TypeMap,
    backend: DatabaseType,
    lenient: bool,
    assignments: Vec<(String, DatabaseValue)>,
    condition: Option<WhereCondition>,
}

impl<'m> UpdateBuilder<'m> {
    pub fn new(map: &'m TypeMap, backend: DatabaseType) -> Self {
        Self {
            map,
            backend,
            lenient: false,
            assignments: Vec::new(),
            condition: None,
        }
    }

    /// Bind kinds the backend rejects with their neutral parameter kind
    #[must_use]
    pub fn allow_invalid_primitives(mut self, allow: bool) -> Self {
        self.lenient = allow;
        self
    }

    /// Set a column value
    #[must_use]
    pub fn set(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.assignments.push((column.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn filter(mut self, condition: WhereCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn build(&self) -> Result<Statement> {
        if self.assignments.is_empty() {
            return Err(DatabaseError::configuration(format!(
                "update of \"{}\" assigns nothing",
                self.map.table()
            )));
        }
        let mut parameters = Vec::new();
        let mut clauses = Vec::with_capacity(self.assignments.len());
        for (index, (column, value)) in self.assignments.iter().enumerate() {
            let binding = self.map.require_column(column)?;
            let name = format!("@assignparam{}", index);
            clauses.push(format!("{}={}", column, name));
            let value = binding.normalize(value.clone())?;
            parameters.push(BoundParameter::bind(
                name,
                value,
                binding.kind(),
                self.backend,
                self.lenient,
            )?);
        }

        let mut text = format!("UPDATE {} SET {}", self.map.table(), clauses.join(","));
        if let Some(condition) = &self.condition {
            text.push_str(" WHERE ");
            text.push_str(&condition.render(self.map, self.backend, self.lenient, &mut parameters)?);
        }
        Ok(Statement { text, parameters })
    }
}

/// DELETE statement builder
#[derive(Debug, Clone)]
pub struct DeleteBuilder<'m> {
    map: &'m TypeMap,
    backend: DatabaseType,
    lenient: bool,
    condition: Option<WhereCondition>,
    limit: u64,
}

impl<'m> DeleteBuilder<'m> {
    pub fn new(map: &'m TypeMap, backend: DatabaseType) -> Self {
        Self {
            map,
            backend,
            lenient: false,
            condition: None,
            limit: 0,
        }
    }

    /// Bind kinds the backend rejects with their neutral parameter kind
    #[must_use]
    pub fn allow_invalid_primitives(mut self, allow: bool) -> Self {
        self.lenient = allow;
        self
    }

    #[must_use]
    pub fn filter(mut self, condition: WhereCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Delete at most `limit` rows; `0` deletes every matching row
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn build(&self) -> Result<Statement> {
        let table = self.map.table();
        let mut parameters = Vec::new();
        let filter = match &self.condition {
            Some(condition) => Some(condition.render(self.map, self.backend, self.lenient, &mut parameters)?),
            None => None,
        };
        let where_clause = filter
            .as_ref()
            .map(|f| format!(" WHERE {}", f))
            .unwrap_or_default();

        let text = match (self.backend, self.limit) {
            (_, 0) => format!("DELETE FROM {}{}", table, where_clause),
            (DatabaseType::Mssql, n) => format!("DELETE TOP ({}) FROM {}{}", n, table, where_clause),
            (DatabaseType::Sqlite, n) => format!(
                "DELETE FROM {} WHERE rowid IN (SELECT rowid FROM {}{} LIMIT {})",
                table, table, where_clause, n
            ),
            (DatabaseType::Mysql | DatabaseType::None, n) => {
                format!("DELETE FROM {}{} LIMIT {}", table, where_clause, n)
            }
        };
        Ok(Statement { text, parameters })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::primitive::PrimitiveKind;
    use crate::mapping::schema::{Entity, EntitySchema};

    #[derive(Debug, Default)]
    struct Account {
        id: i32,
        email: String,
        balance: crate::mapping::primitive::Decimal,
        deleted: bool,
    }

    impl Entity for Account {
        fn schema() -> EntitySchema<Self> {
            EntitySchema::table("accounts")
                .identity("id", PrimitiveKind::Int32, |a: &Account| &a.id, |a: &mut Account| &mut a.id)
                .column("email", PrimitiveKind::Varchar, |a: &Account| &a.email, |a: &mut Account| &mut a.email)
                .column("balance", PrimitiveKind::Decimal, |a: &Account| &a.balance, |a: &mut Account| &mut a.balance)
                .column("deleted", PrimitiveKind::Boolean, |a: &Account| &a.deleted, |a: &mut Account| &mut a.deleted)
        }
    }

    fn account_map() -> TypeMap {
        match Account::schema().build() {
            Ok(map) => map,
            Err(e) => panic!("account schema: {}", e),
        }
    }

    fn row(id: i32, email: &str) -> RowObject {
        let mut row = RowObject::new("accounts");
        row.set("id", DatabaseValue::Int(id));
        row.set("email", DatabaseValue::String(email.to_string()));
        row.set("balance", DatabaseValue::Decimal("10".into()));
        row.set("deleted", DatabaseValue::Bool(false));
        row
    }

    #[test]
    fn test_select_all() -> Result<()> {
        let map = account_map();
        let stmt = SelectBuilder::new(&map, DatabaseType::Mysql).build()?;
        assert_eq!(stmt.text, "SELECT * FROM accounts");
        assert!(stmt.parameters.is_empty());
        Ok(())
    }

    #[test]
    fn test_select_where_placeholders() -> Result<()> {
        let map = account_map();
        let condition = WhereCondition::eq("email", "a@b.c")
            .and("deleted", Operator::IsNull, DatabaseValue::Null)
            .or("id", Operator::Gt, 5);
        let stmt = SelectBuilder::new(&map, DatabaseType::Mysql)
            .columns(&["id", "email"])
            .filter(condition)
            .build()?;
        assert_eq!(
            stmt.text,
            "SELECT id,email FROM accounts WHERE email=@whereparam0 AND deleted IS NULL OR id>@whereparam2"
        );
        assert_eq!(stmt.parameters.len(), 2);
        assert_eq!(stmt.parameters[1].name, "@whereparam2");
        assert_eq!(stmt.parameters[1].value, DatabaseValue::Int(5));
        assert_eq!(stmt.parameters[0].size, Some(5));
        Ok(())
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let map = account_map();
        let stmt = SelectBuilder::new(&map, DatabaseType::Mysql)
            .filter(WhereCondition::eq("nickname", "x"))
            .build();
        assert!(matches!(stmt, Err(DatabaseError::Configuration(_))));

        let stmt = SelectBuilder::new(&map, DatabaseType::Mysql).columns(&["nope"]).build();
        assert!(stmt.is_err());
    }

    #[test]
    fn test_delete_dialects() -> Result<()> {
        let map = account_map();
        let filter = WhereCondition::eq("id", 3);

        let mysql = DeleteBuilder::new(&map, DatabaseType::Mysql)
            .filter(filter.clone())
            .limit(1)
            .build()?;
        assert_eq!(mysql.text, "DELETE FROM accounts WHERE id=@whereparam0 LIMIT 1");

        let mssql = DeleteBuilder::new(&map, DatabaseType::Mssql)
            .filter(filter.clone())
            .limit(1)
            .build()?;
        assert_eq!(mssql.text, "DELETE TOP (1) FROM accounts WHERE id=@whereparam0");

        let sqlite = DeleteBuilder::new(&map, DatabaseType::Sqlite)
            .filter(filter.clone())
            .limit(2)
            .build()?;
        assert_eq!(
            sqlite.text,
            "DELETE FROM accounts WHERE rowid IN (SELECT rowid FROM accounts WHERE id=@whereparam0 LIMIT 2)"
        );

        let unbounded = DeleteBuilder::new(&map, DatabaseType::Mssql).filter(filter).build()?;
        assert_eq!(unbounded.text, "DELETE FROM accounts WHERE id=@whereparam0");
        Ok(())
    }

    #[test]
    fn test_insert_skips_unset_identity() -> Result<()> {
        let map = account_map();
        let stmt = InsertBuilder::new(&map, DatabaseType::Mysql)
            .row(&row(0, "a@b.c"))
            .build()?;
        assert_eq!(
            stmt.text,
            "INSERT INTO accounts(email,balance,deleted) VALUES (@insertval_0_0,@insertval_0_1,@insertval_0_2)"
        );
        assert_eq!(stmt.parameters[1].precision, Some((18, 0)));
        assert_eq!(stmt.parameters[1].kind, ParameterKind::Decimal);
        Ok(())
    }

    #[test]
    fn test_mysql_upsert() -> Result<()> {
        let map = account_map();
        let stmt = InsertBuilder::new(&map, DatabaseType::Mysql)
            .upsert(true)
            .row(&row(4, "a@b.c"))
            .row(&row(5, "d@e.f"))
            .build()?;
        assert!(stmt.text.starts_with(
            "INSERT INTO accounts(id,email,balance,deleted) VALUES (@insertval_0_0,@insertval_0_1,@insertval_0_2,@insertval_0_3),(@insertval_1_0,"
        ));
        assert!(stmt
            .text
            .ends_with(" ON DUPLICATE KEY UPDATE id=VALUES(id),email=VALUES(email),balance=VALUES(balance),deleted=VALUES(deleted)"));
        assert_eq!(stmt.parameters.len(), 8);
        Ok(())
    }

    #[test]
    fn test_sqlite_upsert() -> Result<()> {
        let map = account_map();
        let stmt = InsertBuilder::new(&map, DatabaseType::Sqlite)
            .upsert(true)
            .row(&row(4, "a@b.c"))
            .build()?;
        assert!(stmt.text.ends_with(
            " ON CONFLICT(id) DO UPDATE SET email=excluded.email,balance=excluded.balance,deleted=excluded.deleted"
        ));
        Ok(())
    }

    #[test]
    fn test_mssql_merge() -> Result<()> {
        let map = account_map();
        let stmt = InsertBuilder::new(&map, DatabaseType::Mssql)
            .upsert(true)
            .row(&row(4, "a@b.c"))
            .build()?;
        assert_eq!(
            stmt.text,
            "MERGE INTO accounts AS __MERGE_TARGET__ USING (SELECT @insertval_0_0,@insertval_0_1,@insertval_0_2,@insertval_0_3) \
             AS __MERGE_SOURCE__ (id,email,balance,deleted) ON (__MERGE_TARGET__.id=__MERGE_SOURCE__.id) \
             WHEN MATCHED THEN UPDATE SET __MERGE_TARGET__.email=__MERGE_SOURCE__.email,\
             __MERGE_TARGET__.balance=__MERGE_SOURCE__.balance,__MERGE_TARGET__.deleted=__MERGE_SOURCE__.deleted \
             WHEN NOT MATCHED THEN INSERT (email,balance,deleted) VALUES (__MERGE_SOURCE__.email,__MERGE_SOURCE__.balance,__MERGE_SOURCE__.deleted);"
        );
        Ok(())
    }

    #[test]
    fn test_mssql_merge_of_new_row_never_matches() -> Result<()> {
        let map = account_map();
        let stmt = InsertBuilder::new(&map, DatabaseType::Mssql)
            .upsert(true)
            .row(&row(0, "a@b.c"))
            .build()?;
        assert!(stmt.text.contains(" ON (1=0)"));
        assert_eq!(stmt.parameters.len(), 3);
        Ok(())
    }

    #[test]
    fn test_update() -> Result<()> {
        let map = account_map();
        let stmt = UpdateBuilder::new(&map, DatabaseType::Mysql)
            .set("email", "x@y.z")
            .set("deleted", true)
            .filter(WhereCondition::eq("id", 1))
            .build()?;
        assert_eq!(
            stmt.text,
            "UPDATE accounts SET email=@assignparam0,deleted=@assignparam1 WHERE id=@whereparam0"
        );
        assert_eq!(stmt.values().len(), 3);

        assert!(UpdateBuilder::new(&map, DatabaseType::Mysql).build().is_err());
        Ok(())
    }

    #[test]
    fn test_condition_values_take_column_kind() -> Result<()> {
        let map = account_map();
        let stmt = SelectBuilder::new(&map, DatabaseType::Mysql)
            .filter(WhereCondition::eq("id", DatabaseValue::Long(7)))
            .build()?;
        assert_eq!(stmt.parameters[0].value, DatabaseValue::Int(7));
        assert_eq!(stmt.parameters[0].kind, ParameterKind::Int32);

        let overflow = SelectBuilder::new(&map, DatabaseType::Mysql)
            .filter(WhereCondition::eq("id", DatabaseValue::Long(i64::MAX)))
            .build();
        assert!(overflow.is_err());
        Ok(())
    }

    #[test]
    fn test_rejected_kind_binds_only_when_allowed() -> Result<()> {
        let strict = BoundParameter::new("@p", DatabaseValue::TinyInt(3), PrimitiveKind::Int8, DatabaseType::Mssql);
        assert!(matches!(strict, Err(DatabaseError::UnsupportedPrimitive { .. })));

        let neutral = BoundParameter::neutral("@p", DatabaseValue::TinyInt(3), PrimitiveKind::Int8, DatabaseType::Mssql)?;
        assert_eq!(Some(neutral.kind), PrimitiveKind::Int8.parameter_kind());
        Ok(())
    }

    #[derive(Debug, Default)]
    struct Batch {
        id: i64,
    }

    impl Entity for Batch {
        fn schema() -> EntitySchema<Self> {
            EntitySchema::table("batches").identity("id", PrimitiveKind::Int64, |b: &Batch| &b.id, |b: &mut Batch| &mut b.id)
        }
    }

    #[test]
    fn test_identity_only_rows_insert_defaults() -> Result<()> {
        let map = match Batch::schema().build() {
            Ok(map) => map,
            Err(e) => panic!("batch schema: {}", e),
        };
        let mut unset = RowObject::new("batches");
        unset.set("id", DatabaseValue::Long(0));

        let insert = |backend| InsertBuilder::new(&map, backend).upsert(true).row(&unset).build();
        assert_eq!(insert(DatabaseType::Mysql)?.text, "INSERT INTO batches () VALUES ()");
        assert_eq!(insert(DatabaseType::Sqlite)?.text, "INSERT INTO batches DEFAULT VALUES");
        assert_eq!(insert(DatabaseType::Mssql)?.text, "INSERT INTO batches DEFAULT VALUES");
        assert!(insert(DatabaseType::Mssql)?.parameters.is_empty());

        // a known identity is still merged on its key
        let mut known = RowObject::new("batches");
        known.set("id", DatabaseValue::Long(9));
        let merge = InsertBuilder::new(&map, DatabaseType::Mssql).upsert(true).row(&known).build()?;
        assert!(merge.text.ends_with("WHEN NOT MATCHED THEN INSERT DEFAULT VALUES;"));
        Ok(())
    }

    #[derive(Debug, Default)]
    struct Rate {
        currency: String,
        value: crate::mapping::primitive::Decimal,
    }

    impl Entity for Rate {
        fn schema() -> EntitySchema<Self> {
            EntitySchema::table("rates")
                .column("currency", PrimitiveKind::Varchar, |r: &Rate| &r.currency, |r: &mut Rate| &mut r.currency)
                .column("value", PrimitiveKind::Decimal, |r: &Rate| &r.value, |r: &mut Rate| &mut r.value)
                .key("currency")
        }
    }

    #[test]
    fn test_mssql_merge_inserts_natural_keys() -> Result<()> {
        let map = match Rate::schema().build() {
            Ok(map) => map,
            Err(e) => panic!("rate schema: {}", e),
        };
        let mut rate = RowObject::new("rates");
        rate.set("currency", DatabaseValue::String("EUR".into()));
        rate.set("value", DatabaseValue::Decimal("1".into()));
        let stmt = InsertBuilder::new(&map, DatabaseType::Mssql).upsert(true).row(&rate).build()?;
        assert!(stmt.text.contains(" ON (__MERGE_TARGET__.currency=__MERGE_SOURCE__.currency)"));
        assert!(stmt.text.contains(" WHEN MATCHED THEN UPDATE SET __MERGE_TARGET__.value=__MERGE_SOURCE__.value "));
        assert!(stmt.text.ends_with(
            "WHEN NOT MATCHED THEN INSERT (currency,value) VALUES (__MERGE_SOURCE__.currency,__MERGE_SOURCE__.value);"
        ));
        Ok(())
    }
}
