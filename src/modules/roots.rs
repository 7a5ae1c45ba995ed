//! Roots module, client side (spec.md §4.10): an insertion-ordered set of
//! roots the client owns, answering `roots/list` and announcing changes.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::peer::Peer;
use crate::protocol::{methods, McpError, ProtocolError, Root};

pub struct RootsModule {
    peer: Peer,
    roots: Mutex<Vec<Root>>,
    /// Whether this peer advertised `capabilities.roots.listChanged = true`;
    /// gates whether `add_root`/`remove_root` emit a notification at all.
    announce_changes: bool,
}

impl RootsModule {
    pub fn install(peer: Peer, announce_changes: bool) -> Result<Arc<Self>, McpError> {
        let module = Arc::new(Self { peer, roots: Mutex::new(Vec::new()), announce_changes });

        let list_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::ROOTS_LIST, move |_params| {
            let module = Arc::clone(&list_module);
            async move { module.handle_list().await }
        })?;

        Ok(module)
    }

    /// Add a root, rejecting duplicates by URI. Returns whether the set
    /// actually changed (spec.md §4.10).
    pub async fn add_root(&self, root: Root) -> bool {
        let mut roots = self.roots.lock().await;
        if roots.iter().any(|r| r.uri == root.uri) {
            return false;
        }
        roots.push(root);
        drop(roots);
        self.announce();
        true
    }

    pub async fn remove_root(&self, uri: &crate::protocol::Uri) -> bool {
        let mut roots = self.roots.lock().await;
        let before = roots.len();
        roots.retain(|r| &r.uri != uri);
        let changed = roots.len() != before;
        drop(roots);
        if changed {
            self.announce();
        }
        changed
    }

    pub async fn list(&self) -> Vec<Root> {
        self.roots.lock().await.clone()
    }

    /// Whether this module announces `notifications/roots/list_changed` —
    /// the value the owning `Client` must mirror into
    /// `capabilities.roots.listChanged` at handshake time.
    pub fn announces_changes(&self) -> bool {
        self.announce_changes
    }

    fn announce(&self) {
        if self.announce_changes {
            self.peer.send_notification(methods::ROOTS_LIST_CHANGED, None);
        }
    }

    async fn handle_list(&self) -> Result<Value, ProtocolError> {
        let roots = self.list().await;
        serde_json::to_value(serde_json::json!({ "roots": roots }))
            .map_err(|e| ProtocolError::Internal { message: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    async fn roots_changes_propagate_in_insertion_order() {
        let (server_peer, client_peer) = ready_pair().await;
        let roots = RootsModule::install(client_peer.clone(), true).unwrap();

        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        server_peer
            .register_notification_handler(methods::ROOTS_LIST_CHANGED, {
                let seen = Arc::clone(&seen);
                move |_params| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                }
            })
            .unwrap();

        assert!(roots.add_root(Root { uri: Uri::new_unchecked("test://a"), name: None }).await);
        assert!(roots.add_root(Root { uri: Uri::new_unchecked("test://b"), name: None }).await);
        // duplicate uri is rejected
        assert!(!roots.add_root(Root { uri: Uri::new_unchecked("test://a"), name: None }).await);

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 2);

        let result = server_peer.send_request(methods::ROOTS_LIST, None).await.unwrap();
        let roots_list: Vec<Root> = serde_json::from_value(result["roots"].clone()).unwrap();
        assert_eq!(roots_list, vec![
            Root { uri: Uri::new_unchecked("test://a"), name: None },
            Root { uri: Uri::new_unchecked("test://b"), name: None },
        ]);
    }

    #[tokio::test]
    async fn no_announcement_without_list_changed_capability() {
        let (server_peer, client_peer) = ready_pair().await;
        let roots = RootsModule::install(client_peer, false).unwrap();
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        server_peer
            .register_notification_handler(methods::ROOTS_LIST_CHANGED, {
                let seen = Arc::clone(&seen);
                move |_params| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                }
            })
            .unwrap();
        roots.add_root(Root { uri: Uri::new_unchecked("test://a"), name: None }).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
