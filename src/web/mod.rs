//! Request-scoped web layer.
//!
//! Every request routed through an [`App`](crate::App) runs inside the
//! lifecycle middleware and can extract an [`Lv`] handle for logging,
//! cookies, background jobs and store access.

pub mod context;
pub mod cookie;
pub mod fault;
pub mod form;
pub mod jobs;
pub mod lifecycle;

use crate::core::{RenderError, StoreError};
use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use std::fmt;

pub use context::Lv;
pub use cookie::{Cookie, SameSite};
pub use fault::Fault;
pub use form::{Form, FormError};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Marks a response produced from a handler error; the lifecycle logs the
/// message at error severity.
#[derive(Debug, Clone)]
pub struct HandlerFailure(pub String);

/// Form validation failure, answered with 422 and not logged as a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            field: None,
            message: message.into(),
        }
    }

    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "validation error: {} (field {field})", self.message),
            None => write!(f, "validation error: {}", self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        (StatusCode::UNPROCESSABLE_ENTITY, Json(self)).into_response()
    }
}

#[derive(Debug)]
pub enum WebError {
    Store(StoreError),
    Render(RenderError),
    Validation(ValidationError),
    Input(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
    Custom {
        status: StatusCode,
        code: String,
        message: String,
    },
}

impl WebError {
    pub fn custom(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Custom {
            status,
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Render(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Input(message)
            | Self::NotFound(message)
            | Self::Conflict(message)
            | Self::Internal(message) => f.write_str(message),
            Self::Custom { message, .. } => f.write_str(message),
        }
    }
}

impl std::error::Error for WebError {}

impl From<StoreError> for WebError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<RenderError> for WebError {
    fn from(err: RenderError) -> Self {
        Self::Render(err)
    }
}

impl From<ValidationError> for WebError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<anyhow::Error> for WebError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let failure = HandlerFailure(self.to_string());
        let (status, message, code) = match self {
            WebError::Validation(err) => return err.into_response(),
            WebError::Store(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                "database_error".to_string(),
            ),
            WebError::Render(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                "render_error".to_string(),
            ),
            WebError::Input(msg) => (StatusCode::BAD_REQUEST, msg, "input_error".to_string()),
            WebError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "not_found".to_string()),
            WebError::Conflict(msg) => (StatusCode::CONFLICT, msg, "conflict".to_string()),
            WebError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                msg,
                "internal_error".to_string(),
            ),
            WebError::Custom {
                status,
                code,
                message,
            } => (status, message, code),
        };

        let body = Json(ErrorResponse {
            error: message,
            code,
        });

        let mut response = (status, body).into_response();
        response.extensions_mut().insert(failure);
        response
    }
}

pub type Result<T> = std::result::Result<T, WebError>;
