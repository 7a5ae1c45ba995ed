//! An in-memory transport pair: wires two peers together without any real
//! I/O, used throughout the test suite to exercise end-to-end scenarios
//! (spec.md §8) without a concrete stdio/process transport.

use tokio::sync::mpsc;

use crate::protocol::TransportError;
use crate::transport::Transport;
use async_trait::async_trait;

/// One end of an in-memory duplex channel carrying raw lines.
pub struct DuplexTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
    closed: bool,
}

/// Create two connected ends: lines sent on one are received on the other.
pub fn duplex_pair() -> (DuplexTransport, DuplexTransport) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();
    (
        DuplexTransport {
            tx: tx_a,
            rx: rx_b,
            closed: false,
        },
        DuplexTransport {
            tx: tx_b,
            rx: rx_a,
            closed: false,
        },
    )
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(line.to_string())
            .map_err(|_| TransportError::Closed)
    }

    async fn receive_line(&mut self) -> Result<Option<String>, TransportError> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}
