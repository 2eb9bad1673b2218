use super::{MIGRATIONS_DDL, RelationalStore, SELECT_VERSIONS, StoreResult, StoreTransaction};
use crate::core::StoreError;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use std::time::Duration;

const UPSERT_VERSION: &str = r#"INSERT INTO migrations ("table", version) VALUES ($1, $2)
ON CONFLICT ("table") DO UPDATE SET version = EXCLUDED.version"#;

/// PostgreSQL store backed by a sqlx connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|err| StoreError::Connection(err.to_string()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Converts a stored version; a negative value is corrupt metadata.
fn stored_version(table: &str, version: i32) -> StoreResult<u32> {
    u32::try_from(version).map_err(|_| {
        StoreError::statement(SELECT_VERSIONS, format!("negative version for {table}"))
    })
}

fn statement_error(statement: &str, err: sqlx::Error) -> StoreError {
    StoreError::statement(statement, err.to_string())
}

#[async_trait]
impl RelationalStore for PgStore {
    async fn load_versions(&self) -> StoreResult<HashMap<String, u32>> {
        sqlx::raw_sql(MIGRATIONS_DDL)
            .execute(&self.pool)
            .await
            .map_err(|err| statement_error(MIGRATIONS_DDL, err))?;

        let rows = sqlx::query(SELECT_VERSIONS)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| statement_error(SELECT_VERSIONS, err))?;

        let mut versions = HashMap::with_capacity(rows.len());
        for row in rows {
            let table: String = row
                .try_get("table")
                .map_err(|err| statement_error(SELECT_VERSIONS, err))?;
            let version: i32 = row
                .try_get("version")
                .map_err(|err| statement_error(SELECT_VERSIONS, err))?;
            let version = stored_version(&table, version)?;
            versions.insert(table, version);
        }
        Ok(versions)
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|err| StoreError::Transaction(err.to_string()))?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn execute(&self, statement: &str) -> StoreResult<()> {
        sqlx::raw_sql(statement)
            .execute(&self.pool)
            .await
            .map_err(|err| statement_error(statement, err))?;
        Ok(())
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn execute(&mut self, statement: &str) -> StoreResult<()> {
        sqlx::Executor::execute(&mut *self.tx, sqlx::raw_sql(statement))
            .await
            .map_err(|err| statement_error(statement, err))?;
        Ok(())
    }

    async fn record_version(&mut self, table: &str, version: u32) -> StoreResult<()> {
        let version = i32::try_from(version)
            .map_err(|_| StoreError::statement(UPSERT_VERSION, "version out of range"))?;
        sqlx::query(UPSERT_VERSION)
            .bind(table)
            .bind(version)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| statement_error(UPSERT_VERSION, err))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|err| StoreError::Transaction(err.to_string()))
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|err| StoreError::Transaction(err.to_string()))
    }
}
