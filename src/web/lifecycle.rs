//! Request lifecycle middleware.
//!
//! Wraps every routed request: begin (timing, incoming line, pre-request
//! hook), the handler inside a panic boundary, then end. End waits for the
//! request's background jobs, writes the finished line and reports the log
//! exactly once, whatever the handler did.

use super::HandlerFailure;
use super::context::Lv;
use super::fault;
use crate::config::{Config, Inb4};
use crate::log::Logger;
use crate::render::Renderer;
use crate::store::RelationalStore;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::header::SET_COOKIE;
use http::{HeaderValue, StatusCode};
use std::fmt;
use std::sync::Arc;

/// Everything a request needs from the application.
pub struct Runtime {
    pub(crate) production: bool,
    pub(crate) domain: String,
    pub(crate) inb4: Option<Inb4>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) renderer: Arc<dyn Renderer>,
    pub(crate) store: Arc<dyn RelationalStore>,
}

impl Runtime {
    pub fn new(config: &Config, store: Arc<dyn RelationalStore>) -> Self {
        Self {
            production: config.production,
            domain: config.cookie_domain().to_string(),
            inb4: config.inb4.clone(),
            logger: config.resolve_logger(),
            renderer: config.resolve_renderer(),
            store,
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("production", &self.production)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// Runs one request through its whole lifecycle.
///
/// Everything after begin runs on its own task, so a client that disconnects
/// mid-request cannot cancel it: the handler, the request's jobs and the
/// single log report still run to completion.
pub async fn lifecycle(
    State(runtime): State<Arc<Runtime>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let lv = Lv::begin(runtime, &parts);
    parts.extensions.insert(lv.clone());
    let request = Request::from_parts(parts, body);

    let task = tokio::spawn(run(lv, request, next));
    match task.await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, "request task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn run(lv: Lv, request: Request, next: Next) -> Response {
    let outcome = fault::recover({
        let lv = lv.clone();
        async move {
            lv.run_inb4();
            next.run(request).await
        }
    })
    .await;

    let mut response = match outcome {
        Ok(response) => {
            if let Some(HandlerFailure(message)) = response.extensions().get::<HandlerFailure>() {
                lv.error(message.clone());
            }
            response
        }
        Err(fault) => {
            lv.panic(fault.to_string());
            StatusCode::FORBIDDEN.into_response()
        }
    };

    for cookie in lv.take_cookies() {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(_) => lv.warn(format!("cookie '{}' is not a valid header value", cookie.name)),
        }
    }

    lv.end(response.status()).await;
    response
}
