//! In-process relational store.
//!
//! Statements are not interpreted; they are recorded. A transaction keeps
//! its statements and version writes pending until commit, so a rolled back
//! transaction leaves no trace. Useful for development and for exercising
//! migration and request code without a database.

use super::{RelationalStore, StoreResult, StoreTransaction};
use crate::core::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryState {
    executed: Vec<String>,
    versions: HashMap<String, u32>,
    fail_on: Vec<String>,
    commits: u64,
    rollbacks: u64,
}

impl MemoryState {
    fn check(&self, statement: &str) -> StoreResult<()> {
        match self
            .fail_on
            .iter()
            .find(|fragment| statement.contains(fragment.as_str()))
        {
            Some(fragment) => Err(StoreError::statement(
                statement,
                format!("injected failure on '{fragment}'"),
            )),
            None => Ok(()),
        }
    }
}

/// Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

/// Recorded state stays consistent after a panic, so a poisoned lock is
/// recovered rather than reported.
fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every statement containing `fragment` fail.
    pub fn fail_on(&self, fragment: impl Into<String>) -> &Self {
        lock(&self.state).fail_on.push(fragment.into());
        self
    }

    /// Seeds a migration record as if a previous boot had committed it.
    pub fn set_version(&self, table: impl Into<String>, version: u32) -> &Self {
        lock(&self.state).versions.insert(table.into(), version);
        self
    }

    /// Committed statements, in commit order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.state).executed.clone()
    }

    pub fn versions(&self) -> HashMap<String, u32> {
        lock(&self.state).versions.clone()
    }

    pub fn version(&self, table: &str) -> Option<u32> {
        self.versions().get(table).copied()
    }

    /// `(commits, rollbacks)` seen so far.
    pub fn transaction_counts(&self) -> (u64, u64) {
        let state = lock(&self.state);
        (state.commits, state.rollbacks)
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn load_versions(&self) -> StoreResult<HashMap<String, u32>> {
        Ok(lock(&self.state).versions.clone())
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            statements: Vec::new(),
            versions: Vec::new(),
        }))
    }

    async fn execute(&self, statement: &str) -> StoreResult<()> {
        let mut state = lock(&self.state);
        state.check(statement)?;
        state.executed.push(statement.to_string());
        Ok(())
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    statements: Vec<String>,
    versions: Vec<(String, u32)>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn execute(&mut self, statement: &str) -> StoreResult<()> {
        lock(&self.state).check(statement)?;
        self.statements.push(statement.to_string());
        Ok(())
    }

    async fn record_version(&mut self, table: &str, version: u32) -> StoreResult<()> {
        self.versions.push((table.to_string(), version));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        let mut state = lock(&this.state);
        state.executed.extend(this.statements);
        state.versions.extend(this.versions);
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        lock(&self.state).rollbacks += 1;
        Ok(())
    }
}
