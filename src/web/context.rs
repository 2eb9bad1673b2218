//! The per-request handle.
//!
//! An [`Lv`] is created by the lifecycle middleware for every request and
//! shared with the handler and with every background job the handler spawns.
//! It owns the request's append-only log buffer, its timing and its job
//! counter, and queues cookies for the response.

use super::cookie::{Cookie, find_cookie};
use super::fault;
use super::jobs::JobTracker;
use super::lifecycle::Runtime;
use super::{Result, WebError};
use crate::core::StoreError;
use crate::log::{LogEntry, RequestReport, Severity};
use crate::store::{RelationalStore, StoreTransaction, run_in_transaction};
use axum::extract::{ConnectInfo, FromRequestParts, Query};
use axum::response::{Html, IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use http::header::{COOKIE, HeaderMap, USER_AGENT};
use http::request::Parts;
use http::{Method, StatusCode, Uri};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const CLOUDFLARE_IP: &str = "cf-connecting-ip";
const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Handle to the current request's context.
#[derive(Clone)]
pub struct Lv(Arc<RequestContext>);

pub struct RequestContext {
    runtime: Arc<Runtime>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    addr: String,
    agent: String,
    started: Instant,
    started_at: DateTime<Utc>,
    finished: Mutex<Option<Duration>>,
    entries: Mutex<Vec<LogEntry>>,
    cookies: Mutex<Vec<Cookie>>,
    jobs: Arc<JobTracker>,
}

impl Deref for Lv {
    type Target = RequestContext;

    fn deref(&self) -> &RequestContext {
        &self.0
    }
}

impl fmt::Debug for Lv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lv")
            .field("method", &self.method)
            .field("path", &self.path())
            .field("addr", &self.addr)
            .field("jobs", &self.jobs.outstanding())
            .finish_non_exhaustive()
    }
}

/// Best-effort originating address: proxy headers first, then the socket.
pub fn resolve_addr(headers: &HeaderMap, connected: Option<SocketAddr>) -> String {
    if let Some(ip) = header_value(headers, CLOUDFLARE_IP) {
        return ip.to_string();
    }
    let forwarded = header_value(headers, FORWARDED_FOR).and_then(|list| list.split(',').next());
    if let Some(first) = forwarded {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    if let Some(ip) = header_value(headers, REAL_IP) {
        return ip.to_string();
    }
    connected
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl Lv {
    pub(crate) fn begin(runtime: Arc<Runtime>, parts: &Parts) -> Self {
        let connected = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let agent = parts
            .headers
            .get_all(USER_AGENT)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");

        let lv = Lv(Arc::new(RequestContext {
            runtime,
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            addr: resolve_addr(&parts.headers, connected),
            agent,
            started: Instant::now(),
            started_at: Utc::now(),
            finished: Mutex::new(None),
            entries: Mutex::new(Vec::new()),
            cookies: Mutex::new(Vec::new()),
            jobs: Arc::new(JobTracker::new()),
        }));

        lv.print(format!(
            "INCOMING {} {} NOW {} ADDR {} AGENT {}",
            lv.method,
            lv.path(),
            lv.started_at.to_rfc3339(),
            lv.addr,
            lv.agent
        ));
        lv
    }

    pub(crate) fn run_inb4(&self) {
        if let Some(hook) = &self.runtime.inb4 {
            hook(self);
        }
    }

    /// Waits for every background job, records the finish time and hands
    /// the log to the configured logger.
    pub(crate) async fn end(&self, status: StatusCode) {
        self.jobs.wait().await;

        let elapsed = self.started.elapsed();
        *self.finished.lock().unwrap_or_else(PoisonError::into_inner) = Some(elapsed);
        self.print(format!(
            "FINISHED WITH {} ELAPSED {:?}",
            status.as_u16(),
            elapsed
        ));

        let report = RequestReport {
            method: self.method.to_string(),
            path: self.path().to_string(),
            status: status.as_u16(),
            started_at: self.started_at,
            elapsed,
            entries: self.entries(),
        };
        if let Err(err) = self.runtime.logger.report(&report) {
            tracing::warn!(
                method = %report.method,
                path = %report.path,
                error = %err,
                "request logger failed"
            );
        }
    }

    pub(crate) fn take_cookies(&self) -> Vec<Cookie> {
        std::mem::take(&mut *self.cookies.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Runs `job` concurrently as part of this request.
    ///
    /// The request does not finish, and its log is not flushed, until every
    /// job has returned. An `Err` is logged at error severity and a panic at
    /// panic severity; neither affects the response.
    pub fn go<F, Fut>(&self, job: F)
    where
        F: FnOnce(Lv) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let guard = self.jobs.start();
        let lv = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let handle = lv.clone();
            match fault::recover(async move { job(handle).await }).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => lv.error(format!("{err:#}")),
                Err(fault) => lv.panic(fault.to_string()),
            }
        });
    }

    /// Like [`go`](Self::go), for blocking work on the blocking thread pool.
    pub fn go_blocking<F>(&self, job: F)
    where
        F: FnOnce(Lv) -> anyhow::Result<()> + Send + 'static,
    {
        let guard = self.jobs.start();
        let lv = self.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            match fault::recover_blocking(|| job(lv.clone())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => lv.error(format!("{err:#}")),
                Err(fault) => lv.panic(fault.to_string()),
            }
        });
    }
}

impl RequestContext {
    fn log(&self, severity: Severity, message: String) {
        let entry = LogEntry {
            severity,
            elapsed: self.started.elapsed(),
            message,
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn print(&self, message: impl Into<String>) {
        self.log(Severity::Print, message.into());
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Severity::Debug, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Severity::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message.into());
    }

    /// Records a panic-severity entry. Does not unwind.
    pub fn panic(&self, message: impl Into<String>) {
        self.log(Severity::Panic, message.into());
    }

    /// Snapshot of the log so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Total request time, set once every job has finished.
    pub fn finished(&self) -> Option<Duration> {
        *self.finished.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn outstanding_jobs(&self) -> usize {
        self.jobs.outstanding()
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_prod(&self) -> bool {
        self.runtime.production
    }

    pub fn is_dev(&self) -> bool {
        !self.runtime.production
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|header| find_cookie(header, name))
            .map(str::to_string)
    }

    /// Queues a root cookie following the environment's cookie policy.
    pub fn put_cookie(&self, name: &str, value: &str, http_only: bool) {
        let cookie = Cookie::root(
            name,
            value,
            http_only,
            self.runtime.production,
            &self.runtime.domain,
        );
        self.queue_cookie(cookie);
    }

    pub fn drop_cookie(&self, name: &str) {
        let cookie = Cookie::removal(name, self.runtime.production, &self.runtime.domain);
        self.queue_cookie(cookie);
    }

    fn queue_cookie(&self, cookie: Cookie) {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cookie);
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(&self.uri).ok()?;
        params.remove(name)
    }

    /// Parses a query parameter, answering 400 when it is missing or malformed.
    pub fn query<T: FromStr>(&self, name: &str) -> Result<T> {
        let raw = self
            .query_param(name)
            .ok_or_else(|| WebError::Input(format!("missing query parameter '{name}'")))?;
        raw.parse()
            .map_err(|_| WebError::Input(format!("malformed query parameter '{name}': '{raw}'")))
    }

    pub fn query_i64(&self, name: &str) -> Result<i64> {
        self.query(name)
    }

    pub fn store(&self) -> Arc<dyn RelationalStore> {
        Arc::clone(&self.runtime.store)
    }

    pub async fn execute(&self, statement: &str) -> std::result::Result<(), StoreError> {
        self.runtime.store.execute(statement).await
    }

    /// Runs `f` in a store transaction: committed on `Ok`, rolled back on `Err`.
    pub async fn atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut dyn StoreTransaction) -> BoxFuture<'a, Result<T>>,
    {
        run_in_transaction(self.runtime.store.as_ref(), f).await
    }

    /// Renders a template through the configured renderer.
    pub fn render<D: Serialize>(
        &self,
        status: StatusCode,
        name: &str,
        data: &D,
    ) -> Result<Response> {
        let data = serde_json::to_value(data).map_err(|err| {
            WebError::Internal(format!("cannot serialize data for '{name}': {err}"))
        })?;
        let body = self.runtime.renderer.render(name, &data)?;
        Ok((status, Html(body)).into_response())
    }

    /// Placeholder for routes that are not implemented yet.
    pub fn tba(&self) -> Response {
        self.warn("TBA");
        StatusCode::NOT_IMPLEMENTED.into_response()
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Lv
where
    S: Send + Sync,
{
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts.extensions.get::<Lv>().cloned().ok_or_else(|| {
            WebError::Internal(
                "request context missing: route is not wrapped by the lifecycle".into(),
            )
        })
    }
}
