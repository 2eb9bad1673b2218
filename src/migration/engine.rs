use super::{MigrationGate, MigrationPlan};
use crate::core::{MigrationError, MigrationFailure, StoreError};
use crate::model::{Model, ModelRegistry};
use crate::store::{RelationalStore, SELECT_VERSIONS, StoreTransaction};
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to one table during a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub table: String,
    pub from: u32,
    pub to: u32,
    /// Step numbers applied, in application order.
    pub applied: Vec<u32>,
}

impl MigrationOutcome {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub outcomes: Vec<MigrationOutcome>,
}

impl MigrationReport {
    pub fn applied_steps(&self) -> usize {
        self.outcomes.iter().map(|outcome| outcome.applied.len()).sum()
    }

    pub fn outcome(&self, table: &str) -> Option<&MigrationOutcome> {
        self.outcomes.iter().find(|outcome| outcome.table == table)
    }
}

/// Brings every registered table to its declared version.
///
/// All tables migrate inside a single transaction: if any step of any model
/// fails, nothing from this run is persisted. The engine records each table's
/// new version in the same transaction right after its steps succeed.
pub async fn migrate_up(
    store: &dyn RelationalStore,
    registry: &ModelRegistry,
) -> Result<MigrationReport, MigrationError> {
    let versions = store.load_versions().await.map_err(load_error)?;

    let mut plans = Vec::with_capacity(registry.tables().len());
    for model in registry.tables() {
        let plan = MigrationPlan::new(model.version(), model.up());
        plan.validate()
            .map_err(|err| MigrationError::new(Some(model.name()), err))?;
        let from = versions.get(model.name()).copied().unwrap_or(0);
        if from > plan.version() {
            return Err(MigrationError::new(
                Some(model.name()),
                MigrationFailure::Downgrade {
                    stored: from,
                    declared: plan.version(),
                },
            ));
        }
        plans.push((Arc::clone(model), plan, from));
    }

    let mut tx = store
        .begin()
        .await
        .map_err(|err| MigrationError::new(None, err))?;

    let mut report = MigrationReport::default();
    for (model, plan, from) in &plans {
        let result = migrate_model_up(tx.as_mut(), model.as_ref(), plan, *from).await;
        match result {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(err) => {
                abort(tx).await;
                return Err(err);
            }
        }
    }

    tx.commit()
        .await
        .map_err(|err| MigrationError::new(None, err))?;

    for outcome in report.outcomes.iter().filter(|outcome| outcome.changed()) {
        info!(
            table = %outcome.table,
            from = outcome.from,
            to = outcome.to,
            steps = outcome.applied.len(),
            "table migrated"
        );
    }
    Ok(report)
}

async fn migrate_model_up(
    tx: &mut dyn StoreTransaction,
    model: &dyn Model,
    plan: &MigrationPlan,
    from: u32,
) -> Result<MigrationOutcome, MigrationError> {
    let gate = MigrationGate::new(from, plan.version());
    let mut applied = Vec::new();
    for step in plan.pending_up(gate) {
        step.apply(&mut *tx)
            .await
            .map_err(|err| MigrationError::new(Some(model.name()), err))?;
        applied.push(step.version);
    }

    if from != plan.version() {
        tx.record_version(model.name(), plan.version())
            .await
            .map_err(|err| MigrationError::new(Some(model.name()), err))?;
    }

    Ok(MigrationOutcome {
        table: model.name().to_string(),
        from,
        to: plan.version(),
        applied,
    })
}

/// Reverts one table down to version `to` using its down steps.
///
/// Steps numbered above `to` and up to the stored version run in descending
/// order, then the record is set to `to`, all in one transaction.
pub async fn migrate_down(
    store: &dyn RelationalStore,
    registry: &ModelRegistry,
    table: &str,
    to: u32,
) -> Result<MigrationOutcome, MigrationError> {
    let model = registry
        .table(table)
        .ok_or_else(|| {
            MigrationError::new(None, MigrationFailure::UnknownTable(table.to_string()))
        })?;

    let versions = store.load_versions().await.map_err(load_error)?;
    let from = versions.get(table).copied().unwrap_or(0);
    if to > from {
        return Err(MigrationError::new(
            Some(table),
            MigrationFailure::InvalidTarget { stored: from, target: to },
        ));
    }

    let plan = MigrationPlan::new(model.version(), model.down());
    plan.validate()
        .map_err(|err| MigrationError::new(Some(table), err))?;

    let gate = MigrationGate::new(from, to);
    let mut tx = store
        .begin()
        .await
        .map_err(|err| MigrationError::new(None, err))?;

    let mut applied = Vec::new();
    for step in plan.pending_down(gate) {
        let result = step.apply(tx.as_mut()).await;
        if let Err(err) = result {
            abort(tx).await;
            return Err(MigrationError::new(Some(table), err));
        }
        applied.push(step.version);
    }

    if from != to {
        let result = tx.record_version(table, to).await;
        if let Err(err) = result {
            abort(tx).await;
            return Err(MigrationError::new(Some(table), err));
        }
    }

    tx.commit()
        .await
        .map_err(|err| MigrationError::new(Some(table), err))?;

    info!(table, from, to, steps = applied.len(), "table reverted");
    Ok(MigrationOutcome {
        table: table.to_string(),
        from,
        to,
        applied,
    })
}

fn load_error(err: StoreError) -> MigrationError {
    let migration_error = MigrationError::new(None, err);
    if migration_error.statement.is_some() {
        migration_error
    } else {
        migration_error.with_statement(SELECT_VERSIONS)
    }
}

async fn abort(tx: Box<dyn StoreTransaction>) {
    if let Err(err) = tx.rollback().await {
        warn!(error = %err, "migration rollback failed");
    }
}
