//! Catalog objects and the reader abstraction used to enumerate them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Kind of an exportable schema object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Table,
    Function,
    Procedure,
}

impl ObjectKind {
    /// Whether this is a stored routine (function or procedure).
    pub fn is_routine(&self) -> bool {
        !matches!(self, ObjectKind::Table)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::Function => "function",
            ObjectKind::Procedure => "procedure",
        }
    }

    /// Map a `pg_proc.prokind` code to a routine kind.
    pub fn from_prokind(prokind: &str) -> Self {
        if prokind == "p" {
            ObjectKind::Procedure
        } else {
            ObjectKind::Function
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table or routine read from the catalog.
///
/// `definition` is only populated for routines; table DDL is produced at export time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogObject {
    pub name: String,
    pub kind: ObjectKind,
    pub definition: Option<String>,
}

impl CatalogObject {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ObjectKind::Table,
            definition: None,
        }
    }

    pub fn routine(name: impl Into<String>, kind: ObjectKind, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            definition: Some(definition.into()),
        }
    }
}

/// Read-only access to the database's metadata catalog.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Base tables in `schema`, ordered by name ascending.
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Functions and procedures in `schema` with their full definitions, unordered.
    async fn list_routines(&self, schema: &str) -> Result<Vec<CatalogObject>>;

    /// Round-trip check used by the health check.
    async fn test_connection(&self) -> Result<()>;
}
