//! Server-side roots-tracking mixin (spec.md §4.11): a cached view of the
//! client's root set that never exposes a partial value.
//!
//! The cache is `UpToDate(list)` or `Pending(generation)`; a `Pending` read
//! awaits the in-flight `roots/list` request for the generation current at
//! the time the read started. "Completer identity" (spec.md §9) is modeled
//! as a generation counter: when a `roots/list` response lands, its result
//! is only published if the generation it was issued for is still the
//! newest one — a newer change notification in the meantime discards it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use crate::modules::roots_fallback::RootsView;
use crate::peer::Peer;
use crate::protocol::{methods, McpError, Root};

#[derive(Debug, Clone)]
enum Cache {
    UpToDate(Vec<Root>),
    Pending,
}

/// Caps how long a refresh waits for the handshake to finish before giving
/// up: 50 attempts at 20ms apart, 1s total. Bounds a misbehaving peer that
/// completes `initialize` but never sends `notifications/initialized`.
const MAX_READY_WAIT_ATTEMPTS: u32 = 50;

struct Inner {
    peer: Peer,
    cache: Mutex<Cache>,
    generation: AtomicU64,
    /// Broadcasts the latest resolved list; `Pending` reads await this.
    tx: watch::Sender<Option<Vec<Root>>>,
    /// Set once `activate` has confirmed the client advertised
    /// `roots.listChanged` and registered the subscription (spec.md §4.11:
    /// "the server MUST NOT subscribe ... " when the client did not).
    activated: AtomicBool,
}

pub struct RootsTrackingModule {
    inner: Arc<Inner>,
}

impl RootsTrackingModule {
    /// Constructs the tracker without registering any handler or issuing any
    /// request yet. Call [`Self::activate`] once the client's declared
    /// capabilities are known and confirmed to include `roots.listChanged`.
    pub fn new(peer: Peer) -> Arc<Self> {
        let (tx, _rx) = watch::channel(None);
        let inner = Arc::new(Inner {
            peer,
            cache: Mutex::new(Cache::Pending),
            generation: AtomicU64::new(0),
            tx,
            activated: AtomicBool::new(false),
        });
        Arc::new(Self { inner })
    }

    /// Registers the `notifications/roots/list_changed` handler and issues
    /// the first `roots/list` fetch. Callers MUST have already confirmed
    /// the client advertised `roots.listChanged` — this module never checks
    /// that itself, since it has no view of `ClientCapabilities`.
    pub fn activate(self: &Arc<Self>) -> Result<(), McpError> {
        if self.inner.activated.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let note_inner = Arc::clone(&self.inner);
        self.inner.peer.register_notification_handler(methods::ROOTS_LIST_CHANGED, move |_params| {
            let inner = Arc::clone(&note_inner);
            async move { start_refresh(inner).await }
        })?;

        tokio::spawn(start_refresh(Arc::clone(&self.inner)));
        Ok(())
    }

    /// Current roots: returns immediately if `UpToDate`, otherwise awaits
    /// the in-flight refresh. Never returns a partial list (spec.md §3).
    /// Returns `StateError` without blocking if `activate` was never called.
    pub async fn roots(&self) -> Result<Vec<Root>, McpError> {
        if !self.inner.activated.load(Ordering::Acquire) {
            return Err(McpError::StateError(
                "roots tracking is not active: client did not advertise roots.listChanged".to_string(),
            ));
        }
        let snapshot = {
            let cache = self.inner.cache.lock().await;
            match &*cache {
                Cache::UpToDate(list) => return Ok(list.clone()),
                Cache::Pending => self.inner.tx.subscribe(),
            }
        };
        await_resolved(snapshot).await
    }
}

#[async_trait]
impl RootsView for RootsTrackingModule {
    async fn roots(&self) -> Result<Vec<Root>, McpError> {
        self.roots().await
    }
}

async fn start_refresh(inner: Arc<Inner>) {
    *inner.cache.lock().await = Cache::Pending;
    let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
    // Force any reader that subscribes while this refresh is outstanding to
    // wait for its result rather than replaying a previous (stale) snapshot.
    let _ = inner.tx.send(None);

    let fetch_inner = Arc::clone(&inner);
    tokio::spawn(async move {
        // The module may be activated before the handshake completes; a
        // `send_request` made while not-yet-ready fails fast with
        // `StateError` rather than queuing, so retry until the peer is
        // ready or gone instead of giving up on the very first attempt —
        // but only up to `MAX_READY_WAIT_ATTEMPTS`, not indefinitely.
        let mut attempts: u32 = 0;
        let roots = loop {
            if fetch_inner.peer.is_shutting_down() {
                return;
            }
            match fetch_inner.peer.send_request(methods::ROOTS_LIST, None).await {
                Ok(value) => break serde_json::from_value::<RootsListResult>(value).ok().map(|r| r.roots),
                Err(McpError::StateError(_)) if !fetch_inner.peer.is_ready() => {
                    attempts += 1;
                    if attempts >= MAX_READY_WAIT_ATTEMPTS {
                        return;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    continue;
                }
                Err(_) => break None,
            }
        };
        let Some(roots) = roots else { return };

        // Completer identity: only the newest outstanding refresh may publish.
        if fetch_inner.generation.load(Ordering::Acquire) != generation {
            return;
        }
        *fetch_inner.cache.lock().await = Cache::UpToDate(roots.clone());
        let _ = fetch_inner.tx.send(Some(roots));
    });
}

async fn await_resolved(mut rx: watch::Receiver<Option<Vec<Root>>>) -> Result<Vec<Root>, McpError> {
    loop {
        if let Some(roots) = rx.borrow().clone() {
            return Ok(roots);
        }
        if rx.changed().await.is_err() {
            return Err(McpError::TransportClosed);
        }
    }
}

#[derive(serde::Deserialize)]
struct RootsListResult {
    roots: Vec<Root>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::RootsModule;
    use crate::peer::PeerConfig;
    use crate::protocol::Uri;
    use crate::transport::duplex_pair;

    async fn ready_pair() -> (Peer, Peer) {
        let (a, b) = duplex_pair();
        let peer_a = Peer::spawn(a, PeerConfig::default(), None);
        let peer_b = Peer::spawn(b, PeerConfig::default(), None);
        peer_a.mark_ready();
        peer_b.mark_ready();
        (peer_a, peer_b)
    }

    #[tokio::test]
    async fn tracker_converges_to_latest_snapshot_after_changes_settle() {
        let (server_peer, client_peer) = ready_pair().await;
        let client_roots = RootsModule::install(client_peer.clone(), true).unwrap();
        let tracker = RootsTrackingModule::new(server_peer);
        tracker.activate().unwrap();

        // initial fetch should converge to empty list
        assert_eq!(tracker.roots().await.unwrap(), Vec::<Root>::new());

        client_roots.add_root(Root { uri: Uri::new_unchecked("test://a"), name: None }).await;
        client_roots.add_root(Root { uri: Uri::new_unchecked("test://b"), name: None }).await;

        // give notifications + refreshes time to settle
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let roots = tracker.roots().await.unwrap();
        assert_eq!(roots, vec![
            Root { uri: Uri::new_unchecked("test://a"), name: None },
            Root { uri: Uri::new_unchecked("test://b"), name: None },
        ]);
    }

    /// spec.md §4.11: a tracker that was never activated (client did not
    /// advertise `roots.listChanged`) must not subscribe or fetch, and must
    /// report that state instead of hanging.
    #[tokio::test]
    async fn unactivated_tracker_errors_instead_of_blocking() {
        let (server_peer, _client_peer) = ready_pair().await;
        let tracker = RootsTrackingModule::new(server_peer);

        let err = tracker.roots().await.unwrap_err();
        assert!(matches!(err, McpError::StateError(_)));
    }
}
