//! `rpcguard` Server: tower interceptors for inbound calls and an outbound call wrapper.
//!
//! Inbound calls are wrapped, outermost first, by [`middleware::RecoveryLayer`]
//! and [`middleware::LoggingLayer`]; see [`middleware::build_inbound_pipeline`].
//! Outbound calls go through [`outbound::OutboundCall`].

pub mod call;
pub mod config;
pub mod middleware;
pub mod observability;
pub mod outbound;
pub mod stream;

#[cfg(test)]
mod testing;

pub use call::{CallInfo, FilterSet, InboundCall, TargetRef};
pub use config::{ConfigError, LoggingConfig, MiddlewareConfig, OutboundConfig};
pub use middleware::{build_inbound_pipeline, LoggingLayer, RecoveryLayer};
pub use outbound::{invoke, OutboundCall};
pub use rpcguard_core::{classify, CallOutcome, ScopedValidator};
pub use stream::{CallStream, StreamPeer};
