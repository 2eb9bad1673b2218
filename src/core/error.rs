use crate::model::Archetype;
use std::fmt;
use thiserror::Error;

/// Failure reported by a relational store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("statement failed: {message}")]
    Statement { statement: String, message: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("transaction error: {0}")]
    Transaction(String),
}

impl StoreError {
    pub fn statement(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Statement {
            statement: statement.into(),
            message: message.into(),
        }
    }

    /// Text of the statement that failed, when the store reported one.
    pub fn failed_statement(&self) -> Option<&str> {
        match self {
            Self::Statement { statement, .. } => Some(statement),
            _ => None,
        }
    }
}

/// A model's migration plan is malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("migration step versions must be >= 1")]
    ZeroStep,

    #[error("migration step {next} must come after step {previous}")]
    NotAscending { previous: u32, next: u32 },

    #[error("migration step {step} exceeds declared schema version {version}")]
    ExceedsVersion { step: u32, version: u32 },
}

/// Programming errors discovered while registering models.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("model name must not be empty ({archetype})")]
    EmptyName { archetype: Archetype },

    #[error("model '{0}' registered twice")]
    Duplicate(String),

    #[error("model '{model}' has an invalid migration plan: {source}")]
    InvalidPlan {
        model: String,
        #[source]
        source: PlanError,
    },
}

/// Underlying reason a migration failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationFailure {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("stored version {stored} is ahead of declared version {declared}")]
    Downgrade { stored: u32, declared: u32 },

    #[error("cannot revert from version {stored} up to version {target}")]
    InvalidTarget { stored: u32, target: u32 },

    #[error("archetype not supported: {0}")]
    BadArchetype(Archetype),

    #[error("no registered table named '{0}'")]
    UnknownTable(String),
}

/// Occurs whenever a table migration fails.
///
/// Carries the offending model (absent when the failure happened before any
/// model was touched), the cause, and the statement text if one was involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationError {
    pub model: Option<String>,
    pub cause: MigrationFailure,
    pub statement: Option<String>,
}

impl MigrationError {
    pub fn new(model: Option<&str>, cause: impl Into<MigrationFailure>) -> Self {
        let cause = cause.into();
        let statement = match &cause {
            MigrationFailure::Store(err) => err.failed_statement().map(str::to_string),
            _ => None,
        };
        Self {
            model: model.map(str::to_string),
            cause,
            statement,
        }
    }

    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{model} failed to migrate: {}", self.cause)?,
            None => write!(f, "migration failed: {}", self.cause)?,
        }
        if let Some(statement) = &self.statement {
            write!(f, "\n>>> {statement}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("a cookie domain must be set in production")]
    MissingDomain,

    #[error("port must be > 0")]
    ZeroPort,

    #[error("log group window must be > 0")]
    ZeroLogWindow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("no renderer configured for template '{0}'")]
    NotConfigured(String),

    #[error("template '{name}' failed: {message}")]
    Template { name: String, message: String },
}

/// Anything that stops the application from booting.
#[derive(Error, Debug)]
pub enum BootError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = BootError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_error_renders_model_cause_and_statement() {
        let err = MigrationError::new(
            Some("users"),
            StoreError::statement("ALTER TABLE users ADD COLUMN x int", "syntax error"),
        );
        assert_eq!(
            err.to_string(),
            "users failed to migrate: statement failed: syntax error\n>>> ALTER TABLE users ADD COLUMN x int"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn migration_error_without_model_or_statement() {
        let err = MigrationError::new(None, StoreError::Connection("refused".into()));
        assert_eq!(err.to_string(), "migration failed: connection error: refused");
        assert_eq!(err.statement, None);
    }
}
