// ============================================================================
// Leviathan Library
// ============================================================================

pub mod app;
pub mod config;
pub mod core;
pub mod graph;
pub mod log;
pub mod migration;
pub mod model;
pub mod render;
pub mod store;
pub mod web;

// Re-export main types for convenience
pub use app::{App, RouteInfo};
pub use config::Config;
pub use core::{
    BootError, ConfigError, MigrationError, MigrationFailure, PlanError, RegistrationError,
    RenderError, Result, StoreError,
};
pub use log::{LogEntry, Logger, RequestReport, Severity, StdLogger, TracingLogger};
pub use migration::{MigrationGate, MigrationPlan, MigrationStep};
pub use model::{Archetype, ColumnDef, Model, ModelRegistry, TableKind, TableSchema};
pub use render::{NoRenderer, Renderer};
pub use store::{MemoryStore, PgStore, RelationalStore, StoreTransaction};
pub use web::{Form, FormError, Lv, ValidationError, WebError};
