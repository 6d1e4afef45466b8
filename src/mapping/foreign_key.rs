//! Relation and foreign-key model
//!
//! A [`ForeignKey`] links an ordered set of source columns to an equally long set of
//! target columns. Empty column lists mean "fill in the default" and are resolved
//! when the owning type map is built.

use crate::core::error::{DatabaseError, Result};
use std::fmt;

/// Kind of a relation link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Owner carries the foreign key columns of at most one target
    OneToOne,
    /// Targets carry the owner's key columns
    OneToMany,
    /// Linked through a junction table
    ManyToMany,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::OneToOne => "one-to-one",
            RelationKind::OneToMany => "one-to-many",
            RelationKind::ManyToMany => "many-to-many",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed column-set link between two tables
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForeignKey {
    source_columns: Vec<String>,
    target_columns: Vec<String>,
}

impl ForeignKey {
    /// Link `source` columns onto `target` columns, pairwise
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the two lists differ in length.
    pub fn new<S, T>(source: S, target: T) -> Result<Self>
    where
        S: IntoIterator,
        S::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        let key = Self {
            source_columns: source.into_iter().map(Into::into).collect(),
            target_columns: target.into_iter().map(Into::into).collect(),
        };
        key.validate()?;
        Ok(key)
    }

    /// Single column on each side
    pub fn single(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_columns: vec![source.into()],
            target_columns: vec![target.into()],
        }
    }

    /// Same column names on both sides
    pub fn same<S>(columns: S) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        Self {
            source_columns: columns.clone(),
            target_columns: columns,
        }
    }

    /// Both sides left to the defaults of the relation kind
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Only the source side is declared; targets default
    pub fn from_source<S>(columns: S) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            source_columns: columns.into_iter().map(Into::into).collect(),
            target_columns: Vec::new(),
        }
    }

    pub fn source_columns(&self) -> &[String] {
        &self.source_columns
    }

    pub fn target_columns(&self) -> &[String] {
        &self.target_columns
    }

    /// Number of linked column pairs
    pub fn len(&self) -> usize {
        self.source_columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source_columns.is_empty() && self.target_columns.is_empty()
    }

    /// Iterate `(source, target)` pairs
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.source_columns
            .iter()
            .map(String::as_str)
            .zip(self.target_columns.iter().map(String::as_str))
    }

    /// Fill in missing sides
    pub(crate) fn with_defaults(&self, source: &[String], target: &[String]) -> Self {
        Self {
            source_columns: if self.source_columns.is_empty() {
                source.to_vec()
            } else {
                self.source_columns.clone()
            },
            target_columns: if self.target_columns.is_empty() {
                target.to_vec()
            } else {
                self.target_columns.clone()
            },
        }
    }

    /// Check that both sides have the same, non-zero number of columns
    pub fn validate(&self) -> Result<()> {
        if self.source_columns.len() != self.target_columns.len() {
            return Err(DatabaseError::configuration(format!(
                "{} foreign columns cannot be projected onto {} source columns",
                self.target_columns.len(),
                self.source_columns.len()
            )));
        }
        if self
            .source_columns
            .iter()
            .chain(&self.target_columns)
            .any(|c| c.is_empty())
        {
            return Err(DatabaseError::configuration(
                "foreign key column names may not be empty",
            ));
        }
        Ok(())
    }

    /// Check the key after defaults were applied
    pub(crate) fn validate_resolved(&self, relation: &str) -> Result<()> {
        if self.source_columns.is_empty() {
            return Err(DatabaseError::configuration(format!(
                "relation \"{}\" has no columns to link on",
                relation
            )));
        }
        self.validate().map_err(|e| {
            DatabaseError::configuration(format!("relation \"{}\": {}", relation, e))
        })
    }
}
