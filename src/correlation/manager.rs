//! Pending-response table: matches an inbound `JsonRpcResponse` to the
//! outbound `JsonRpcRequest` that caused it, by id.
//!
//! Adapted from the teacher's `CorrelationManager` (`DashMap` + one-shot
//! channel per in-flight request); simplified to drop the generic
//! timeout/cleanup-task machinery, since spec.md only requires a timeout
//! on `ping` — ordinary `sendRequest` calls complete when the remote
//! replies or the transport closes, and `Peer::ping` wraps its own
//! receiver in `tokio::time::timeout`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::trace;

use crate::protocol::{JsonRpcResponse, McpError, RequestId};

/// Tuning knobs for the correlation table; currently only `max_pending`,
/// kept as a struct (rather than a bare parameter) so it composes into
/// `PeerConfig` the way the teacher's `CorrelationConfig` composed into
/// higher-level configs.
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// Maximum number of simultaneously in-flight outbound requests (0 = unlimited).
    pub max_pending: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self { max_pending: 10_000 }
    }
}

/// Thread-safe pending-request table for one direction of one peer.
#[derive(Debug)]
pub struct CorrelationManager {
    pending: Arc<DashMap<RequestId, oneshot::Sender<Result<JsonRpcResponse, McpError>>>>,
    next_id: AtomicI64,
    config: CorrelationConfig,
}

impl CorrelationManager {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicI64::new(1),
            config,
        }
    }

    /// Allocate a fresh numeric request id, unique for the lifetime of this peer.
    pub fn next_request_id(&self) -> RequestId {
        RequestId::new_number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a request awaiting correlation, returning the receiver the
    /// caller should await for the eventual response.
    pub fn register(
        &self,
        id: RequestId,
    ) -> Result<oneshot::Receiver<Result<JsonRpcResponse, McpError>>, McpError> {
        if self.config.max_pending != 0 && self.pending.len() >= self.config.max_pending {
            return Err(McpError::StateError("too many pending requests".to_string()));
        }
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        Ok(rx)
    }

    /// Deliver a response to its matching pending request, if any is still
    /// registered. A response with no matching entry (duplicate, or arrived
    /// after the caller gave up) is dropped silently.
    pub fn resolve(&self, id: &RequestId, response: Result<JsonRpcResponse, McpError>) {
        if let Some((_, sender)) = self.pending.remove(id) {
            let _ = sender.send(response);
        } else {
            trace!(%id, "response for unknown or already-resolved request id");
        }
    }

    /// Cancel and forget a pending request without resolving it (used when
    /// the caller sends `notifications/cancelled`).
    pub fn forget(&self, id: &RequestId) {
        self.pending.remove(id);
    }

    /// Fail every outstanding request with `TransportClosed` (peer shutdown).
    pub fn fail_all(&self) {
        let ids: Vec<RequestId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, sender)) = self.pending.remove(&id) {
                let _ = sender.send(Err(McpError::TransportClosed));
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_delivers_to_matching_receiver() {
        let manager = CorrelationManager::new(CorrelationConfig::default());
        let id = manager.next_request_id();
        let rx = manager.register(id.clone()).unwrap();
        let response = JsonRpcResponse::success(json!({"ok": true}), id.clone());
        manager.resolve(&id, Ok(response.clone()));
        assert_eq!(rx.await.unwrap().unwrap(), response);
    }

    #[tokio::test]
    async fn resolve_with_no_registrant_is_silently_dropped() {
        let manager = CorrelationManager::new(CorrelationConfig::default());
        let id = RequestId::new_number(999);
        manager.resolve(&id, Err(McpError::TransportClosed));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn fail_all_resolves_every_pending_request_with_transport_closed() {
        let manager = CorrelationManager::new(CorrelationConfig::default());
        let id1 = manager.next_request_id();
        let id2 = manager.next_request_id();
        let rx1 = manager.register(id1).unwrap();
        let rx2 = manager.register(id2).unwrap();
        manager.fail_all();
        assert!(matches!(rx1.await.unwrap(), Err(McpError::TransportClosed)));
        assert!(matches!(rx2.await.unwrap(), Err(McpError::TransportClosed)));
    }
}
