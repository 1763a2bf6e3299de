//! Panic recovery middleware for inbound calls.
//!
//! A panic inside a handler, whether raised by `call` itself or while the
//! returned future is polled, is caught at this boundary, logged with its
//! backtrace, and turned into a generic `Internal` status. The connection
//! and the serving process stay up.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::task::{Context, Poll};

use futures_util::{future, FutureExt};
use tonic::Status;
use tower::{Layer, Service};

use crate::call::InboundCall;

/// Message returned to callers whose handler panicked.
pub const RECOVERED_MESSAGE: &str = "an unexpected error occurred";

// ---------------------------------------------------------------------------
// Panic-site backtraces
// ---------------------------------------------------------------------------

thread_local! {
    static BOUNDARY_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_PANIC_SITE: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Backtrace recorded by the hook, tagged with the panic message it belongs to.
struct PanicSite {
    message: String,
    backtrace: Backtrace,
}

/// Marks the current thread as running handler code for as long as it lives.
struct BoundaryScope;

impl BoundaryScope {
    fn enter() -> Self {
        BOUNDARY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for BoundaryScope {
    fn drop(&mut self) {
        BOUNDARY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Chains a panic hook that stores the panic-site backtrace so the recovery
/// boundary can log where the panic happened, not where it was caught.
/// Panics raised outside a boundary are passed straight to the previous hook.
fn install_backtrace_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if BOUNDARY_DEPTH.with(Cell::get) > 0 {
                let site = PanicSite {
                    message: panic_message(info.payload()).to_string(),
                    backtrace: Backtrace::force_capture(),
                };
                LAST_PANIC_SITE.with(|slot| *slot.borrow_mut() = Some(site));
            }
            previous(info);
        }));
    });
}

fn clear_panic_site() {
    LAST_PANIC_SITE.with(|slot| slot.borrow_mut().take());
}

/// Returns the stored backtrace if it was recorded for this `payload`,
/// otherwise one captured here.
fn take_backtrace(payload: &(dyn Any + Send)) -> Backtrace {
    LAST_PANIC_SITE
        .with(|slot| slot.borrow_mut().take())
        .filter(|site| site.message == panic_message(payload))
        .map_or_else(Backtrace::force_capture, |site| site.backtrace)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

fn recovered(method: &str, payload: &(dyn Any + Send)) -> Status {
    let backtrace = take_backtrace(payload);
    tracing::error!(
        method,
        panic = panic_message(payload),
        backtrace = %backtrace,
        "recovered from panic in rpc handler"
    );
    Status::internal(RECOVERED_MESSAGE)
}

// ---------------------------------------------------------------------------
// RecoveryLayer
// ---------------------------------------------------------------------------

/// Tower layer that converts handler panics into `Internal` errors.
#[derive(Debug, Clone)]
pub struct RecoveryLayer {
    _priv: (),
}

impl RecoveryLayer {
    /// Create the layer, installing the backtrace hook on first use.
    #[must_use]
    pub fn new() -> Self {
        install_backtrace_hook();
        Self { _priv: () }
    }
}

impl Default for RecoveryLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService { inner }
    }
}

// ---------------------------------------------------------------------------
// RecoveryService
// ---------------------------------------------------------------------------

/// Service wrapper that establishes a fault boundary around one call.
#[derive(Debug, Clone)]
pub struct RecoveryService<S> {
    inner: S,
}

impl<S, T> Service<InboundCall<T>> for RecoveryService<S>
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
        let method: Arc<str> = Arc::clone(&call.info.method);
        let inner = &mut self.inner;

        clear_panic_site();
        let fut = match panic::catch_unwind(AssertUnwindSafe(|| {
            let _scope = BoundaryScope::enter();
            inner.call(call)
        })) {
            Ok(fut) => fut,
            Err(payload) => {
                let status = recovered(&method, &*payload);
                return Box::pin(async move { Err(status) });
            }
        };

        let mut fut = Box::pin(fut);
        let scoped = future::poll_fn(move |cx| {
            let _scope = BoundaryScope::enter();
            fut.as_mut().poll(cx)
        });

        Box::pin(async move {
            match AssertUnwindSafe(scoped).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(recovered(&method, &*payload)),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::backtrace::BacktraceStatus;

    use tonic::Code;
    use tower::{service_fn, ServiceExt};
    use tracing::Level;

    use super::*;
    use crate::call::{CallInfo, TargetRef};
    use crate::stream::CallStream;
    use crate::testing::capture;

    fn call<T>(method: &str, message: T) -> InboundCall<T> {
        InboundCall::new(CallInfo::new(method, TargetRef::from(Arc::new(()))), message)
    }

    /// Service whose `call` panics before returning a future.
    struct PanicsOnCall;

    impl Service<InboundCall<()>> for PanicsOnCall {
        type Response = ();
        type Error = Status;
        type Future = std::future::Ready<Result<(), Status>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _call: InboundCall<()>) -> Self::Future {
            panic!("router table corrupted");
        }
    }

    #[tokio::test]
    async fn normal_result_passes_through() {
        let (captured, _guard) = capture();
        let svc = RecoveryLayer::new()
            .layer(service_fn(|c: InboundCall<u8>| async move { Ok::<_, Status>(c.message) }));
        assert_eq!(svc.oneshot(call("/pkg.Svc/Echo", 9)).await.unwrap(), 9);
        assert!(captured.events().is_empty());
    }

    #[tokio::test]
    async fn business_error_passes_through_unchanged() {
        let svc = RecoveryLayer::new().layer(service_fn(|_c: InboundCall<()>| async {
            Err::<(), _>(Status::failed_precondition("map is frozen"))
        }));
        let err = svc.oneshot(call("/pkg.Svc/Write", ())).await.unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
        assert_eq!(err.message(), "map is frozen");
    }

    #[tokio::test]
    async fn panic_while_polling_becomes_internal() {
        let (captured, _guard) = capture();
        let svc = RecoveryLayer::new().layer(service_fn(|_c: InboundCall<()>| async {
            let v: Vec<u8> = Vec::new();
            Ok::<u8, Status>(v[3])
        }));

        let err = svc.oneshot(call("/pkg.Svc/Index", ())).await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(err.message(), RECOVERED_MESSAGE);

        let records = captured.with_message("recovered from panic in rpc handler");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::ERROR);
        assert_eq!(records[0].field("method"), Some("/pkg.Svc/Index"));
        assert!(records[0].field("panic").unwrap().contains("index out of bounds"));
        assert!(!records[0].field("backtrace").unwrap().is_empty());
    }

    #[tokio::test]
    async fn panic_in_call_becomes_internal() {
        let (captured, _guard) = capture();
        let svc = RecoveryLayer::new().layer(PanicsOnCall);

        let err = svc.oneshot(call("/pkg.Svc/Route", ())).await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);

        let records = captured.with_message("recovered from panic in rpc handler");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field("panic"), Some("router table corrupted"));
    }

    #[tokio::test]
    async fn panic_mid_stream_ends_stream_once() {
        let (captured, _guard) = capture();
        let (stream, mut peer) = CallStream::<u32, u32>::channel(4);

        let svc = RecoveryLayer::new().layer(service_fn(
            |c: InboundCall<CallStream<u32, u32>>| async move {
                let mut stream = c.into_inner();
                while let Some(n) = stream.recv().await {
                    assert!(n < 2, "poison message {n}");
                    stream.send(n).await?;
                }
                Ok::<_, Status>(())
            },
        ));

        let handle = tokio::spawn(svc.oneshot(call("/pkg.Svc/Pipe", stream)));
        peer.inbound.send(1).await.unwrap();
        assert_eq!(peer.outbound.recv().await, Some(1));
        peer.inbound.send(7).await.unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(peer.outbound.recv().await, None);
        assert_eq!(
            captured
                .with_message("recovered from panic in rpc handler")
                .len(),
            1
        );
    }

    fn stored_site(message: &str) {
        let site = PanicSite {
            message: message.to_string(),
            backtrace: Backtrace::disabled(),
        };
        LAST_PANIC_SITE.with(|slot| *slot.borrow_mut() = Some(site));
    }

    fn site_is_empty() -> bool {
        LAST_PANIC_SITE.with(|slot| slot.borrow().is_none())
    }

    #[test]
    fn panic_outside_boundary_records_no_site() {
        let _layer = RecoveryLayer::new();
        clear_panic_site();
        let result = panic::catch_unwind(|| panic!("unrelated failure"));
        assert!(result.is_err());
        assert!(site_is_empty());
    }

    #[test]
    fn stale_site_is_not_attributed_to_a_later_panic() {
        stored_site("earlier failure");
        let payload: Box<dyn Any + Send> = Box::new("later failure");
        assert_ne!(take_backtrace(&*payload).status(), BacktraceStatus::Disabled);
        assert!(site_is_empty());
    }

    #[test]
    fn matching_site_is_used() {
        stored_site("router table corrupted");
        let payload: Box<dyn Any + Send> = Box::new("router table corrupted");
        assert_eq!(take_backtrace(&*payload).status(), BacktraceStatus::Disabled);
        assert!(site_is_empty());
    }

    #[tokio::test]
    async fn boundary_clears_site_left_by_earlier_panic() {
        stored_site("left over");
        let svc = RecoveryLayer::new()
            .layer(service_fn(|_c: InboundCall<()>| async { Ok::<_, Status>(()) }));
        svc.oneshot(call("/pkg.Svc/Ping", ())).await.unwrap();
        assert!(site_is_empty());
    }

    #[test]
    fn panic_message_variants() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(17_u8);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }
}
