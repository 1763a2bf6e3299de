//! Call logging middleware for inbound calls.
//!
//! Emits exactly one record per call, after the handler finished: method,
//! classified status code and elapsed time. Calls to targets in the
//! [`FilterSet`] go straight to the handler.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use rpcguard_core::CallOutcome;
use tokio::time::Instant;
use tonic::Status;
use tower::{Layer, Service};

use crate::call::{FilterSet, InboundCall};

// ---------------------------------------------------------------------------
// LoggingLayer
// ---------------------------------------------------------------------------

/// Tower layer that records the outcome and duration of every inbound call.
#[derive(Debug, Clone, Default)]
pub struct LoggingLayer {
    filter: Arc<FilterSet>,
}

impl LoggingLayer {
    /// Create a layer that skips calls to the targets in `filter`.
    #[must_use]
    pub fn new(filter: FilterSet) -> Self {
        Self {
            filter: Arc::new(filter),
        }
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            filter: Arc::clone(&self.filter),
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingService
// ---------------------------------------------------------------------------

/// Service wrapper that logs each call once it completes.
///
/// Works for both call shapes: for a streaming call the inner future covers
/// the whole stream, so the record is emitted when the stream closes.
#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    inner: S,
    filter: Arc<FilterSet>,
}

impl<S, T> Service<InboundCall<T>> for LoggingService<S>
where
    S: Service<InboundCall<T>, Error = Status> + Send,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = Status;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, Status>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: InboundCall<T>) -> Self::Future {
        if self.filter.contains(&call.info.target) {
            return Box::pin(self.inner.call(call));
        }

        let record = CallRecord::start(Arc::clone(&call.info.method));
        let fut = self.inner.call(call);
        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => {
                    record.finish(&CallOutcome::from_result(&result));
                    result
                }
                Err(payload) => {
                    record.finish(&CallOutcome::from_status(&handler_panicked()));
                    panic::resume_unwind(payload)
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// CallRecord
// ---------------------------------------------------------------------------

fn handler_panicked() -> Status {
    Status::internal("handler panicked")
}

/// Pending log record for one call.
///
/// A panic raised while polling the handler is logged as `Internal` and then
/// resumed. If the call never reaches [`CallRecord::finish`] the record is
/// emitted on drop instead: as `Internal` while unwinding from a panic in
/// the handler's `call`, or as `Cancelled` when the caller dropped the call
/// future.
struct CallRecord {
    method: Arc<str>,
    start: Instant,
    emitted: bool,
}

impl CallRecord {
    fn start(method: Arc<str>) -> Self {
        Self {
            method,
            start: Instant::now(),
            emitted: false,
        }
    }

    fn finish(mut self, outcome: &CallOutcome) {
        self.emit(outcome);
    }

    fn emit(&mut self, outcome: &CallOutcome) {
        self.emitted = true;
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        let method = &*self.method;
        if outcome.is_ok() {
            tracing::info!(method, code = ?outcome.code(), duration_ms, "rpc call finished");
        } else {
            tracing::warn!(
                method,
                code = ?outcome.code(),
                duration_ms,
                error = outcome.message(),
                "rpc call finished"
            );
        }
    }
}

impl Drop for CallRecord {
    fn drop(&mut self) {
        if self.emitted {
            return;
        }
        let status = if std::thread::panicking() {
            handler_panicked()
        } else {
            Status::cancelled("call dropped before completion")
        };
        self.emit(&CallOutcome::from_status(&status));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
