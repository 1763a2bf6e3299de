//! Channel-backed stream handle for streaming handlers.
//!
//! The interceptors never look inside a stream; they only time and guard the
//! future that owns it. The host pumps transport frames into the inbound
//! channel and drains the outbound one.

use tokio::sync::mpsc;
use tonic::Status;

/// Handler-side view of a bidirectional stream.
#[derive(Debug)]
pub struct CallStream<In, Out> {
    inbound: mpsc::Receiver<In>,
    outbound: mpsc::Sender<Out>,
}

/// Host-side view of the same stream.
#[derive(Debug)]
pub struct StreamPeer<In, Out> {
    pub inbound: mpsc::Sender<In>,
    pub outbound: mpsc::Receiver<Out>,
}

impl<In, Out> CallStream<In, Out> {
    /// Creates a connected handler/host pair with bounded channels.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, StreamPeer<In, Out>) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        (
            Self {
                inbound: in_rx,
                outbound: out_tx,
            },
            StreamPeer {
                inbound: in_tx,
                outbound: out_rx,
            },
        )
    }

    /// Next message from the peer, or `None` once the peer closed its side.
    pub async fn recv(&mut self) -> Option<In> {
        self.inbound.recv().await
    }

    /// Sends a message to the peer.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the peer stopped reading.
    pub async fn send(&self, message: Out) -> Result<(), Status> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| Status::cancelled("stream peer went away"))
    }
}
