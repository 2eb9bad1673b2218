use super::{Archetype, Model, TableSchema};
use crate::core::RegistrationError;
use crate::migration::MigrationPlan;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

/// Registered models grouped by archetype, each group in registration order.
///
/// Registration happens before migration: the table group is the migration
/// order.
#[derive(Default, Clone)]
pub struct ModelRegistry {
    tables: Vec<Arc<dyn Model>>,
    queues: Vec<Arc<dyn Model>>,
    graphs: Vec<Arc<dyn Model>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a batch of models.
    ///
    /// The whole batch is validated first; if any model is invalid, none of
    /// the batch is registered.
    pub fn register<I>(&mut self, models: I) -> Result<(), RegistrationError>
    where
        I: IntoIterator<Item = Arc<dyn Model>>,
    {
        let models: Vec<Arc<dyn Model>> = models.into_iter().collect();

        let mut names: HashSet<&str> = self.iter().map(|model| model.name()).collect();
        for model in &models {
            let name = model.name();
            if name.trim().is_empty() {
                return Err(RegistrationError::EmptyName {
                    archetype: model.archetype(),
                });
            }
            if !names.insert(name) {
                return Err(RegistrationError::Duplicate(name.to_string()));
            }
            if model.archetype() == Archetype::Table {
                MigrationPlan::new(model.version(), model.up())
                    .validate()
                    .map_err(|source| RegistrationError::InvalidPlan {
                        model: name.to_string(),
                        source,
                    })?;
            }
        }

        for model in models {
            match model.archetype() {
                Archetype::Table => self.tables.push(model),
                Archetype::Queue => self.queues.push(model),
                Archetype::Graph => self.graphs.push(model),
            }
        }
        Ok(())
    }

    pub fn tables(&self) -> &[Arc<dyn Model>] {
        &self.tables
    }

    pub fn queues(&self) -> &[Arc<dyn Model>] {
        &self.queues
    }

    pub fn graphs(&self) -> &[Arc<dyn Model>] {
        &self.graphs
    }

    pub fn table(&self, name: &str) -> Option<&Arc<dyn Model>> {
        self.tables.iter().find(|model| model.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Model>> {
        self.tables
            .iter()
            .chain(self.queues.iter())
            .chain(self.graphs.iter())
    }

    pub fn len(&self) -> usize {
        self.tables.len() + self.queues.len() + self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Boot listing: tables sorted by name with kind markers, then queues and
    /// graphs. `#` marks a table without soft delete, `$` one without
    /// timestamps.
    pub fn listing(&self) -> String {
        let mut out = String::from("MODELS\n\n");

        let mut schemas: Vec<TableSchema> = self
            .tables
            .iter()
            .map(|model| TableSchema::of(model.as_ref()))
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        for schema in &schemas {
            let mut markers = String::new();
            if !schema.has_column("deleted_at") {
                markers.push('#');
            }
            if !schema.has_column("created_at") {
                markers.push('$');
            }
            let _ = writeln!(
                out,
                "{:>8} {} <{:?}{}>",
                Archetype::Table,
                schema.name,
                schema.kind,
                markers
            );
        }

        for model in self.queues.iter().chain(self.graphs.iter()) {
            let _ = writeln!(out, "{:>8} {}", model.archetype(), model.name());
        }
        out.push('\n');
        out
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |models: &[Arc<dyn Model>]| -> Vec<String> {
            models.iter().map(|model| model.name().to_string()).collect()
        };
        f.debug_struct("ModelRegistry")
            .field("tables", &names(&self.tables))
            .field("queues", &names(&self.queues))
            .field("graphs", &names(&self.graphs))
            .finish()
    }
}
