//! Versioned schema migrations.
//!
//! Every table model declares a schema version and an ordered list of
//! numbered steps. The engine compares the stored version against each step
//! number through a [`MigrationGate`] and applies the admitted steps inside
//! one transaction shared by all models.

pub mod auto;
pub mod engine;

use crate::core::{PlanError, StoreError};
use crate::store::StoreTransaction;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

pub use auto::auto_migrate;
pub use engine::{MigrationOutcome, MigrationReport, migrate_down, migrate_up};

/// Asynchronous body of a migration step.
pub type StepFn = Arc<
    dyn for<'a> Fn(&'a mut dyn StoreTransaction) -> BoxFuture<'a, Result<(), StoreError>>
        + Send
        + Sync,
>;

/// Decides which numbered blocks run for a `(from, to)` version pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationGate {
    pub from: u32,
    pub to: u32,
}

impl MigrationGate {
    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    /// True for every up-block numbered above `from` and up to `to`.
    pub fn up(&self, version: u32) -> bool {
        version > self.from && version <= self.to
    }

    /// True for every down-block numbered above `to` and up to `from`.
    pub fn down(&self, version: u32) -> bool {
        version > self.to && version <= self.from
    }
}

/// A single numbered schema change.
///
/// SQL statements run first, in order, followed by the optional function.
#[derive(Clone)]
pub struct MigrationStep {
    pub version: u32,
    pub statements: Vec<String>,
    apply: Option<StepFn>,
}

impl MigrationStep {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            statements: Vec::new(),
            apply: None,
        }
    }

    pub fn sql(mut self, statement: impl Into<String>) -> Self {
        self.statements.push(statement.into());
        self
    }

    /// Attaches an asynchronous body for changes plain SQL cannot express.
    ///
    /// ```
    /// use leviathan::MigrationStep;
    ///
    /// let step = MigrationStep::new(3).with_fn(|tx| {
    ///     Box::pin(async move {
    ///         tx.execute("UPDATE users SET login = lower(login)").await
    ///     })
    /// });
    /// assert_eq!(step.version, 3);
    /// ```
    pub fn with_fn<F>(mut self, apply: F) -> Self
    where
        F: for<'a> Fn(&'a mut dyn StoreTransaction) -> BoxFuture<'a, Result<(), StoreError>>
            + Send
            + Sync
            + 'static,
    {
        self.apply = Some(Arc::new(apply));
        self
    }

    pub async fn apply(&self, tx: &mut dyn StoreTransaction) -> Result<(), StoreError> {
        for statement in &self.statements {
            tx.execute(statement).await?;
        }
        if let Some(apply) = &self.apply {
            apply(&mut *tx).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("version", &self.version)
            .field("statements", &self.statements)
            .field("apply", &self.apply.is_some())
            .finish()
    }
}

/// Declared version plus the steps that reach it.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    version: u32,
    steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    pub fn new(version: u32, steps: Vec<MigrationStep>) -> Self {
        Self { version, steps }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Checks for:
    /// - step numbers >= 1,
    /// - strictly ascending order,
    /// - no step above the declared version.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut previous = 0;
        for step in &self.steps {
            if step.version == 0 {
                return Err(PlanError::ZeroStep);
            }
            if step.version <= previous {
                return Err(PlanError::NotAscending {
                    previous,
                    next: step.version,
                });
            }
            if step.version > self.version {
                return Err(PlanError::ExceedsVersion {
                    step: step.version,
                    version: self.version,
                });
            }
            previous = step.version;
        }
        Ok(())
    }

    /// Steps the up-gate admits, ascending.
    pub fn pending_up(&self, gate: MigrationGate) -> impl Iterator<Item = &MigrationStep> {
        self.steps.iter().filter(move |step| gate.up(step.version))
    }

    /// Steps the down-gate admits, descending.
    pub fn pending_down(&self, gate: MigrationGate) -> impl Iterator<Item = &MigrationStep> {
        self.steps
            .iter()
            .rev()
            .filter(move |step| gate.down(step.version))
    }
}
