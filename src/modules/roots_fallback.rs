//! Roots-fallback tools (spec.md §4.12): when an MCP server needs roots but
//! the connected client never advertised the `roots` capability, it can
//! register `add_roots`/`remove_roots` tools instead and keep an in-process
//! roots store that the rest of the server treats exactly like a real
//! [`crate::modules::RootsTrackingModule`] view.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{watch, Mutex};

use crate::modules::tools::ToolsModule;
use crate::protocol::{CallToolResult, McpError, Root, Tool};

/// A read-only view of the currently-known root set, implemented by both
/// the real client-backed tracker and this in-process fallback, so server
/// code can depend on one trait regardless of which is installed.
#[async_trait]
pub trait RootsView: Send + Sync {
    async fn roots(&self) -> Result<Vec<Root>, McpError>;
}

/// `add_roots`/`remove_roots` mutate an in-process store directly, with no
/// real client to send `notifications/roots/list_changed` — spec.md §4.12
/// requires a manual change stream anyway, so downstream code that watches
/// for root changes (e.g. re-deriving a file watcher) behaves the same
/// whether the client has real roots or this fallback.
pub struct RootsFallbackModule {
    roots: Mutex<Vec<Root>>,
    changed: watch::Sender<()>,
}

impl RootsFallbackModule {
    /// Registers `add_roots`/`remove_roots` on `tools` and returns the
    /// shared store both tools mutate. Always starts empty: the server must
    /// be told its roots via the tools, since there is no client-side set
    /// to query.
    pub async fn install(tools: &Arc<ToolsModule>) -> Result<Arc<Self>, McpError> {
        let (changed, _rx) = watch::channel(());
        let module = Arc::new(Self { roots: Mutex::new(Vec::new()), changed });

        let add_module = Arc::clone(&module);
        tools
            .register_tool(
                Tool {
                    name: "add_roots".to_string(),
                    description: Some("Add one or more roots the server may operate on".to_string()),
                    input_schema: serde_json::json!({
                        "type": "object",
                        "properties": { "roots": { "type": "array", "items": { "type": "object" } } },
                        "required": ["roots"],
                    }),
                    annotations: None,
                },
                move |args| {
                    let module = Arc::clone(&add_module);
                    Box::pin(async move { module.handle_add_roots(args).await })
                },
            )
            .await?;

        let remove_module = Arc::clone(&module);
        tools
            .register_tool(
                Tool {
                    name: "remove_roots".to_string(),
                    description: Some("Remove one or more roots by URI".to_string()),
                    input_schema: serde_json::json!({
                        "type": "object",
                        "properties": { "uris": { "type": "array", "items": { "type": "string" } } },
                        "required": ["uris"],
                    }),
                    annotations: None,
                },
                move |args| {
                    let module = Arc::clone(&remove_module);
                    Box::pin(async move { module.handle_remove_roots(args).await })
                },
            )
            .await?;

        Ok(module)
    }

    /// Subscribe to root-set changes. Mirrors the signal a real
    /// [`crate::modules::RootsTrackingModule`] reacts to on
    /// `notifications/roots/list_changed`, so code watching either can share
    /// one code path.
    pub fn subscribe_changes(&self) -> watch::Receiver<()> {
        self.changed.subscribe()
    }

    fn announce_change(&self) {
        let _ = self.changed.send(());
    }

    async fn handle_add_roots(&self, args: serde_json::Value) -> Result<CallToolResult, String> {
        #[derive(Deserialize)]
        struct Args {
            roots: Vec<Root>,
        }
        let args: Args = serde_json::from_value(args).map_err(|e| e.to_string())?;
        let mut roots = self.roots.lock().await;
        let mut changed = false;
        for root in args.roots {
            if !roots.iter().any(|r| r.uri == root.uri) {
                roots.push(root);
                changed = true;
            }
        }
        drop(roots);
        if changed {
            self.announce_change();
        }
        Ok(CallToolResult::success(vec![]))
    }

    async fn handle_remove_roots(&self, args: serde_json::Value) -> Result<CallToolResult, String> {
        #[derive(Deserialize)]
        struct Args {
            uris: Vec<String>,
        }
        let args: Args = serde_json::from_value(args).map_err(|e| e.to_string())?;
        let mut roots = self.roots.lock().await;
        let before = roots.len();
        roots.retain(|r| !args.uris.contains(&r.uri.as_str().to_string()));
        let changed = roots.len() != before;
        drop(roots);
        if changed {
            self.announce_change();
        }
        Ok(CallToolResult::success(vec![]))
    }
}

#[async_trait]
impl RootsView for RootsFallbackModule {
    async fn roots(&self) -> Result<Vec<Root>, McpError> {
        Ok(self.roots.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{Peer, PeerConfig};
    use crate::protocol::Uri;
    use crate::transport::duplex_pair;
    use serde_json::json;

    #[tokio::test]
    async fn add_then_remove_roots_via_tools() {
        let (a, b) = duplex_pair();
        let client = Peer::spawn(a, PeerConfig::default(), None);
        let server = Peer::spawn(b, PeerConfig::default(), None);
        client.mark_ready();
        server.mark_ready();

        let tools = ToolsModule::install(server).unwrap();
        let fallback = RootsFallbackModule::install(&tools).await.unwrap();

        assert!(tools.list().await.iter().any(|t| t.name == "add_roots"));

        let add_args = json!({"name": "add_roots", "arguments": {"roots": [{"uri": "file:///a"}, {"uri": "file:///b"}]}});
        let result = client.send_request(crate::protocol::methods::TOOLS_CALL, Some(add_args)).await.unwrap();
        let result: CallToolResult = serde_json::from_value(result).unwrap();
        assert_eq!(result.is_error, None);

        let roots = fallback.roots().await.unwrap();
        assert_eq!(roots.len(), 2);

        let remove_args = json!({"name": "remove_roots", "arguments": {"uris": ["file:///a"]}});
        client.send_request(crate::protocol::methods::TOOLS_CALL, Some(remove_args)).await.unwrap();
        let roots = fallback.roots().await.unwrap();
        assert_eq!(roots, vec![Root { uri: Uri::new_unchecked("file:///b"), name: None }]);
    }

    #[tokio::test]
    async fn add_roots_signals_subscribers_of_the_change_stream() {
        let (_client, server) = duplex_pair();
        let server = Peer::spawn(server, PeerConfig::default(), None);
        server.mark_ready();

        let tools = ToolsModule::install(server).unwrap();
        let fallback = RootsFallbackModule::install(&tools).await.unwrap();
        let mut changes = fallback.subscribe_changes();

        tools
            .list()
            .await
            .iter()
            .find(|t| t.name == "add_roots")
            .expect("add_roots registered");

        let add_args = json!({"roots": [{"uri": "file:///a"}]});
        fallback.handle_add_roots(add_args).await.unwrap();
        changes.changed().await.unwrap();

        // A no-op add (duplicate uri) must not fire a spurious change.
        let dup_args = json!({"roots": [{"uri": "file:///a"}]});
        fallback.handle_add_roots(dup_args).await.unwrap();
        assert!(matches!(
            tokio::time::timeout(std::time::Duration::from_millis(20), changes.changed()).await,
            Err(_)
        ));
    }
}
