//! Additive schema sync for early development.
//!
//! Never drops or alters an existing column: it only creates the table and
//! adds missing columns described by the model's [`TableSchema`].

use crate::core::{MigrationError, MigrationFailure};
use crate::model::{Archetype, ColumnDef, Model, TableSchema};
use crate::store::RelationalStore;

/// Statements `auto_migrate` runs for a schema, in order.
pub fn auto_migrate_statements(schema: &TableSchema) -> Vec<String> {
    let mut statements = Vec::with_capacity(schema.columns.len() + 1);
    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (id BIGSERIAL PRIMARY KEY)",
        schema.name
    ));
    statements.extend(
        schema
            .columns
            .iter()
            .map(|column| add_column_statement(&schema.name, column)),
    );
    statements
}

fn add_column_statement(table: &str, column: &ColumnDef) -> String {
    let mut query = format!(
        "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS \"{}\" {}",
        column.name, column.sql_type
    );
    if let Some(default) = &column.default {
        query.push_str(&format!(" DEFAULT ({default})"));
    }
    if column.not_null {
        query.push_str(" NOT NULL");
    }
    query
}

/// Creates the model's table if missing and adds any missing column, in its
/// own transaction.
pub async fn auto_migrate(
    store: &dyn RelationalStore,
    model: &dyn Model,
) -> Result<(), MigrationError> {
    if model.archetype() != Archetype::Table {
        return Err(MigrationError::new(
            Some(model.name()),
            MigrationFailure::BadArchetype(model.archetype()),
        ));
    }

    let schema = TableSchema::of(model);
    let mut tx = store
        .begin()
        .await
        .map_err(|err| MigrationError::new(Some(model.name()), err))?;

    for statement in auto_migrate_statements(&schema) {
        let result = tx.execute(&statement).await;
        if let Err(err) = result {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "auto-migration rollback failed");
            }
            return Err(MigrationError::new(Some(model.name()), err).with_statement(statement));
        }
    }

    tx.commit()
        .await
        .map_err(|err| MigrationError::new(Some(model.name()), err))
}
