//! Outbound call wrapper.
//!
//! Runs a client call with an optional deadline and reports unexpected
//! failures (see [`rpcguard_core::is_severe`]) on the calling side. The
//! caller always receives the call's own result.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rpcguard_core::CallOutcome;
use tonic::{IntoRequest, Request, Status};

use crate::config::OutboundConfig;

/// A prepared outbound call: target method plus optional deadline.
#[derive(Debug, Clone)]
pub struct OutboundCall {
    method: Arc<str>,
    deadline: Option<Duration>,
}

impl OutboundCall {
    /// Unbounded call to `method`.
    #[must_use]
    pub fn new(method: impl Into<Arc<str>>) -> Self {
        Self {
            method: method.into(),
            deadline: None,
        }
    }

    /// Call to `method` using the configured default deadline.
    #[must_use]
    pub fn from_config(method: impl Into<Arc<str>>, config: &OutboundConfig) -> Self {
        Self {
            method: method.into(),
            deadline: config.default_deadline(),
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Invokes `call` with `input`.
    ///
    /// With a deadline the request carries it as its gRPC timeout, and the
    /// call future is dropped once the deadline passes, yielding
    /// `DeadlineExceeded`. The timer lives inside this future and is
    /// released on every exit path.
    ///
    /// # Errors
    ///
    /// Returns the status produced by `call`, or `DeadlineExceeded` when the
    /// deadline elapsed first.
    pub async fn invoke<I, O, F, Fut>(&self, call: F, input: impl IntoRequest<I>) -> Result<O, Status>
    where
        F: FnOnce(Request<I>) -> Fut,
        Fut: Future<Output = Result<O, Status>>,
    {
        let mut request = input.into_request();

        let result = match self.deadline {
            Some(deadline) => {
                request.set_timeout(deadline);
                match tokio::time::timeout(deadline, call(request)).await {
                    Ok(result) => result,
                    Err(_elapsed) => Err(Status::deadline_exceeded(format!(
                        "deadline of {}ms exceeded",
                        deadline.as_millis()
                    ))),
                }
            }
            None => call(request).await,
        };

        if let Err(status) = &result {
            let outcome = CallOutcome::from_status(status);
            if outcome.is_severe() {
                tracing::warn!(
                    method = &*self.method,
                    code = ?outcome.code(),
                    error = outcome.message(),
                    "rpc request encountered unexpected error"
                );
            }
        }

        result
    }
}

/// Invokes `call` on `method` with an optional deadline.
///
/// Shorthand for [`OutboundCall::invoke`].
///
/// # Errors
///
/// Returns the status produced by `call`, or `DeadlineExceeded` when the
/// deadline elapsed first.
pub async fn invoke<I, O, F, Fut>(
    method: &str,
    call: F,
    input: impl IntoRequest<I>,
    deadline: Option<Duration>,
) -> Result<O, Status>
where
    F: FnOnce(Request<I>) -> Fut,
    Fut: Future<Output = Result<O, Status>>,
{
    let outbound = OutboundCall {
        method: Arc::from(method),
        deadline,
    };
    outbound.invoke(call, input).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
