//! Panic recovery boundaries.
//!
//! A process-wide panic hook records the backtrace of a panic into a
//! thread-local slot, but only while a [`CaptureScope`] is active on the
//! panicking thread. Outside capture scopes the previously installed hook
//! runs unchanged. Futures run through [`recover`] and closures run through
//! [`recover_blocking`] turn a panic into a [`Fault`] value.

use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// A recovered panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub message: String,
    pub trace: String,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.trace.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}\n{}", self.message, self.trace)
        }
    }
}

impl Fault {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "panic with a non-string payload".to_string()
        };
        let trace = LAST_TRACE
            .with(|slot| slot.borrow_mut().take())
            .map(|trace| trim_trace(&trace))
            .unwrap_or_default();
        Self { message, trace }
    }
}

pub fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            if DEPTH.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let mut trace = String::new();
            if let Some(location) = info.location() {
                trace.push_str(&format!("at {location}\n"));
            }
            trace.push_str(&Backtrace::force_capture().to_string());
            LAST_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
        }));
    });
}

/// Marks the current thread as recovering panics until dropped.
pub struct CaptureScope(());

impl CaptureScope {
    pub fn enter() -> Self {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self(())
    }
}

impl Drop for CaptureScope {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Polls the inner future inside a capture scope.
struct Captured<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for Captured<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _scope = CaptureScope::enter();
        self.inner.as_mut().poll(cx)
    }
}

/// Runs a future to completion, turning a panic into a [`Fault`].
pub async fn recover<F: Future>(future: F) -> Result<F::Output, Fault> {
    install_hook();
    AssertUnwindSafe(Captured {
        inner: Box::pin(future),
    })
    .catch_unwind()
    .await
    .map_err(Fault::from_payload)
}

/// Runs a closure, turning a panic into a [`Fault`].
pub fn recover_blocking<T>(f: impl FnOnce() -> T) -> Result<T, Fault> {
    install_hook();
    let _scope = CaptureScope::enter();
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(Fault::from_payload)
}

/// Drops the frames belonging to the panic machinery itself, keeping the
/// `at <location>` header and everything from the first frame of user code.
pub fn trim_trace(trace: &str) -> String {
    let lines: Vec<&str> = trace.lines().collect();
    let header: Vec<&str> = lines
        .iter()
        .take_while(|line| line.starts_with("at "))
        .copied()
        .collect();

    let frames = &lines[header.len()..];
    let start = frames
        .iter()
        .rposition(|line| {
            line.contains("core::panicking")
                || line.contains("std::panicking")
                || line.contains("rust_begin_unwind")
        })
        .map(|index| index + 1)
        .unwrap_or(0);
    let rest = &frames[start..];
    let skip = rest
        .iter()
        .take_while(|line| line.trim_start().starts_with("at "))
        .count();

    header
        .iter()
        .chain(rest[skip..].iter())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_trace_skips_panic_machinery() {
        let trace = [
            "at src/handlers.rs:10:5",
            "   0: std::backtrace::Backtrace::force_capture",
            "             at /rustc/library/std/src/backtrace.rs:1",
            "   1: std::panicking::begin_panic_handler",
            "             at /rustc/library/std/src/panicking.rs:2",
            "   2: core::panicking::panic_fmt",
            "             at /rustc/library/core/src/panicking.rs:3",
            "   3: app::handlers::explode",
            "             at src/handlers.rs:10:5",
            "   4: tokio::runtime::task::poll",
        ]
        .join("\n");
        assert_eq!(
            trim_trace(&trace),
            "at src/handlers.rs:10:5\n   3: app::handlers::explode\n             at src/handlers.rs:10:5\n   4: tokio::runtime::task::poll"
        );
    }

    #[test]
    fn trim_trace_keeps_unrecognised_traces() {
        assert_eq!(trim_trace("   0: main"), "   0: main");
    }

    #[test]
    fn recover_blocking_reports_the_message() {
        let fault = recover_blocking(|| -> u8 { panic!("boom {}", 7) }).unwrap_err();
        assert_eq!(fault.message, "boom 7");
        assert!(fault.trace.starts_with("at "));
        assert_eq!(recover_blocking(|| 3), Ok(3));
    }

    #[tokio::test]
    async fn recover_catches_panics_in_futures() {
        let fault = recover(async {
            if true {
                panic!("async boom");
            }
            1u8
        })
        .await
        .unwrap_err();
        assert_eq!(fault.message, "async boom");
        assert_eq!(recover(async { 5 }).await, Ok(5));
    }
}
