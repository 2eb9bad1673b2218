//! Data models and their storage archetypes.
//!
//! A model tells the framework which backing store it lives in and, for
//! relational tables, how its schema evolves: a declared version plus an
//! ordered list of numbered migration steps.

pub mod registry;

use crate::migration::MigrationStep;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use registry::ModelRegistry;

/// Storage kind a model can declare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Archetype {
    /// A relational table with versioned SQL migrations.
    Table,
    /// A queue-backed table.
    Queue,
    /// A quad-based graph entity.
    Graph,
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Table => "TABLE",
            Self::Queue => "QUEUE",
            Self::Graph => "GRAPH",
        })
    }
}

/// Relational flavour of a table model, which decides its base columns.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TableKind {
    /// Soft-deletable: `id`, timestamps and `deleted_at`.
    #[default]
    Table,
    /// Hard-deletable: `id` and timestamps.
    Destructible,
    /// Identity only: `id`.
    Lightweight,
}

impl TableKind {
    pub fn soft_delete(self) -> bool {
        matches!(self, Self::Table)
    }

    pub fn timestamps(self) -> bool {
        !matches!(self, Self::Lightweight)
    }

    /// Columns every table of this kind carries besides `id`.
    pub fn base_columns(self) -> Vec<ColumnDef> {
        let mut columns = Vec::new();
        if self.timestamps() {
            for name in ["created_at", "updated_at"] {
                columns.push(
                    ColumnDef::new(name, "timestamptz")
                        .not_null()
                        .default_expr("now()"),
                );
            }
        }
        if self.soft_delete() {
            columns.push(ColumnDef::new("deleted_at", "timestamptz"));
        }
        columns
    }
}

/// One persisted column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }
}

/// Static schema descriptor of a table model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Base columns of the model's kind followed by its own columns.
    pub fn of(model: &dyn Model) -> Self {
        let kind = model.table_kind();
        let mut columns = kind.base_columns();
        columns.extend(model.columns());
        Self {
            name: model.name().to_string(),
            kind,
            columns,
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column.name == name)
    }
}

/// A tangible data model.
///
/// Only `name` and `archetype` are required. Table models override `version`
/// and `up` once they need hand-written migrations:
///
/// ```
/// use leviathan::{Archetype, MigrationStep, Model};
///
/// struct User;
///
/// impl Model for User {
///     fn name(&self) -> &str { "users" }
///     fn archetype(&self) -> Archetype { Archetype::Table }
///     fn version(&self) -> u32 { 2 }
///     fn up(&self) -> Vec<MigrationStep> {
///         vec![
///             MigrationStep::new(1).sql("CREATE TABLE users (id BIGSERIAL PRIMARY KEY)"),
///             MigrationStep::new(2).sql("ALTER TABLE users ADD COLUMN login text"),
///         ]
///     }
/// }
/// ```
pub trait Model: Send + Sync + 'static {
    /// Table (or queue/graph) name; also the key of the migration record.
    fn name(&self) -> &str;

    fn archetype(&self) -> Archetype;

    fn table_kind(&self) -> TableKind {
        TableKind::Table
    }

    /// Latest schema version. Zero means the model relies on auto-migration.
    fn version(&self) -> u32 {
        0
    }

    /// Up-migration steps, ascending by version.
    fn up(&self) -> Vec<MigrationStep> {
        Vec::new()
    }

    /// Down-migration steps, keyed by the version they undo.
    fn down(&self) -> Vec<MigrationStep> {
        Vec::new()
    }

    /// Model-specific columns, used by auto-migration.
    fn columns(&self) -> Vec<ColumnDef> {
        Vec::new()
    }
}
