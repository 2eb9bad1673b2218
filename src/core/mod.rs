pub mod error;

pub use error::{
    BootError, ConfigError, MigrationError, MigrationFailure, PlanError, RegistrationError,
    RenderError, Result, StoreError,
};
