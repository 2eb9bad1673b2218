use super::context::Lv;
use super::{Result, ValidationError, WebError};
use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use std::fmt;

/// Why a form was rejected.
#[derive(Debug)]
pub enum FormError {
    /// The client sent something invalid; answered with 422.
    Validation(ValidationError),
    /// Validation itself could not run.
    Other(anyhow::Error),
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Other(err) => write!(f, "{err:#}"),
        }
    }
}

impl std::error::Error for FormError {}

impl From<ValidationError> for FormError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<anyhow::Error> for FormError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err)
    }
}

/// A request payload that validates itself before being applied.
#[async_trait]
pub trait Form: Send + Sync {
    async fn validate(&self, lv: &Lv) -> std::result::Result<(), FormError>;

    async fn apply(self, lv: &Lv) -> Result<Response>;
}

impl Lv {
    /// Validates `form` and applies it.
    ///
    /// A [`ValidationError`] is answered with 422 and its JSON body without
    /// being logged; any other validation failure becomes a handler error.
    pub async fn paperwork<F: Form>(&self, form: F) -> Result<Response> {
        match form.validate(self).await {
            Ok(()) => form.apply(self).await,
            Err(FormError::Validation(err)) => Ok(err.into_response()),
            Err(FormError::Other(err)) => {
                Err(WebError::Internal(format!("when validating: {err:#}")))
            }
        }
    }
}
