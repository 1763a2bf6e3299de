//! Pipeline composition: wraps a handler with the inbound middleware layers.

use tower::layer::util::{Identity, Stack};
use tower::{Layer, ServiceBuilder};

use super::logging::{LoggingLayer, LoggingService};
use super::recovery::{RecoveryLayer, RecoveryService};
use crate::call::FilterSet;

/// The composed layer type produced by [`build_inbound_layers`].
pub type InboundLayers = Stack<LoggingLayer, Stack<RecoveryLayer, Identity>>;

/// Builds the inbound middleware stack.
///
/// Layer order (outermost to innermost):
/// 1. `RecoveryLayer` -- catches handler panics and answers `Internal`
/// 2. `LoggingLayer` -- records method, code and duration of the call
///
/// With this order a panicking handler still gets its logging record (with
/// code `Internal`) before the recovery layer converts the panic. The same
/// stack serves unary handlers and streaming handlers.
#[must_use]
pub fn build_inbound_layers(filter: FilterSet) -> InboundLayers {
    ServiceBuilder::new()
        .layer(RecoveryLayer::new())
        .layer(LoggingLayer::new(filter))
        .into_inner()
}

/// Wraps `handler` with [`build_inbound_layers`].
///
/// The returned service implements `tower::Service<InboundCall<T>>` for every
/// `T` the handler accepts.
#[must_use]
pub fn build_inbound_pipeline<S>(handler: S, filter: FilterSet) -> RecoveryService<LoggingService<S>> {
    build_inbound_layers(filter).layer(handler)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
