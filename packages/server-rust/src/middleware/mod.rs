//! Tower middleware layers for inbound calls.
//!
//! - [`logging`]: One outcome record per call, with a target filter
//! - [`recovery`]: Panic-to-`Internal` fault boundary
//! - [`pipeline`]: Composes both layers around a handler

pub mod logging;
pub mod pipeline;
pub mod recovery;

pub use logging::LoggingLayer;
pub use pipeline::{build_inbound_layers, build_inbound_pipeline, InboundLayers};
pub use recovery::{RecoveryLayer, RECOVERED_MESSAGE};
