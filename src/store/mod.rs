//! Relational store boundary.
//!
//! The framework never builds queries itself; it needs a store that can run
//! raw statements, open a transaction spanning arbitrary statements, and keep
//! the `migrations` metadata table of `(table, version)` pairs.

pub mod memory;
pub mod postgres;

use crate::core::StoreError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Name of the metadata table holding applied schema versions.
pub const MIGRATIONS_TABLE: &str = "migrations";

/// DDL for the metadata table.
pub const MIGRATIONS_DDL: &str = r#"CREATE TABLE IF NOT EXISTS migrations ("table" TEXT PRIMARY KEY, version INTEGER NOT NULL)"#;

/// Query reading every migration record.
pub const SELECT_VERSIONS: &str = r#"SELECT "table", version FROM migrations"#;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Every migration record as `table -> applied version`.
    ///
    /// Creates the metadata table when it does not exist yet, so a fresh
    /// database reports an empty map.
    async fn load_versions(&self) -> StoreResult<HashMap<String, u32>>;

    /// Opens a transaction; it rolls back unless committed.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Runs a statement outside any transaction.
    async fn execute(&self, statement: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn execute(&mut self, statement: &str) -> StoreResult<()>;

    /// Upserts the migration record for `table`.
    async fn record_version(&mut self, table: &str, version: u32) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Runs `f` in a fresh transaction: commits on `Ok`, rolls back on `Err`.
///
/// The closure's error type only has to absorb [`StoreError`], so callers can
/// keep their own error enums.
pub async fn run_in_transaction<T, E, F>(store: &dyn RelationalStore, f: F) -> Result<T, E>
where
    F: for<'a> FnOnce(&'a mut dyn StoreTransaction) -> BoxFuture<'a, Result<T, E>>,
    E: From<StoreError>,
{
    let mut tx = store.begin().await?;
    match f(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}
