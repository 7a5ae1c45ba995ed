//! Transport abstraction: a line-delimited, bidirectional character stream.
//!
//! spec.md §1 treats transports as an injected bidirectional line stream;
//! concrete stdio/process transports are an external collaborator and out
//! of scope here. A `Transport` deals only in raw lines — JSON decoding,
//! malformed-frame recovery, and the optional protocol log sink all live
//! one layer up in [`crate::peer::Peer`], since a parse failure must
//! produce a JSON-RPC error response rather than tear down the connection
//! (spec.md §7).

pub mod codec;
pub mod duplex;

use async_trait::async_trait;

use crate::protocol::TransportError;

/// A raw line observed flowing across a transport, with its direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDirection {
    Inbound,
    Outbound,
}

/// Observes every raw line before it is delivered/sent (spec.md §4.1's
/// "optional protocol log sink"). Distinct from the crate's own `tracing`
/// diagnostics: this sink sees exactly the bytes that crossed the wire.
pub trait ProtocolLogSink: Send + Sync {
    fn on_line(&self, direction: LineDirection, line: &str);
}

/// One endpoint's view of a bidirectional, line-granular stream.
///
/// Implementations must preserve write order: lines handed to `send_line`
/// are observed by the remote peer in the order they were sent (spec.md §5).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Returns `Ok(None)` when the remote end has closed the stream cleanly.
    async fn receive_line(&mut self) -> Result<Option<String>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

pub use duplex::{duplex_pair, DuplexTransport};
