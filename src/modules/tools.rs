//! Tools module (spec.md §4.4): two parallel name-keyed maps — `Tool`
//! metadata and its handler — exposed over `tools/list` and `tools/call`.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::peer::Peer;
use crate::protocol::{methods, CallToolResult, McpError, ProtocolError, Tool, ToolsCapability};

/// A registered tool's handler. Returning `Err` models the source's "handler
/// throws" case (spec.md §4.4): the message is rendered into the same
/// domain-level `CallToolResult::error_text` response a missing tool gets,
/// never a JSON-RPC error.
pub type ToolHandlerFn = dyn Fn(Value) -> BoxFuture<'static, Result<CallToolResult, String>> + Send + Sync;

struct ToolEntry {
    name: String,
    tool: Tool,
    handler: Arc<ToolHandlerFn>,
}

pub struct ToolsModule {
    peer: Peer,
    tools: Mutex<Vec<ToolEntry>>,
}

impl ToolsModule {
    /// Construct the module and register `tools/list`/`tools/call` on `peer`.
    pub fn install(peer: Peer) -> Result<Arc<Self>, McpError> {
        let module = Arc::new(Self {
            peer,
            tools: Mutex::new(Vec::new()),
        });

        let list_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::TOOLS_LIST, move |_params| {
            let module = Arc::clone(&list_module);
            async move { module.handle_list().await }
        })?;

        let call_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::TOOLS_CALL, move |params| {
            let module = Arc::clone(&call_module);
            async move { module.handle_call(params).await }
        })?;

        Ok(module)
    }

    /// This module is always present with `listChanged = true` once installed.
    pub fn capability(&self) -> ToolsCapability {
        ToolsCapability { list_changed: Some(true) }
    }

    /// Register a new tool. Fails with `StateError` if the name is already
    /// taken. Fires `notifications/tools/list_changed` if the peer is ready
    /// (a no-op otherwise, per `Peer::send_notification`).
    pub async fn register_tool<F, Fut>(&self, tool: Tool, handler: F) -> Result<(), McpError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, String>> + Send + 'static,
    {
        let mut tools = self.tools.lock().await;
        if tools.iter().any(|entry| entry.name == tool.name) {
            return Err(McpError::StateError(format!("tool '{}' already registered", tool.name)));
        }
        let name = tool.name.clone();
        let handler: Arc<ToolHandlerFn> = Arc::new(move |args| Box::pin(handler(args)));
        tools.push(ToolEntry { name, tool, handler });
        drop(tools);
        self.peer.send_notification(methods::TOOLS_LIST_CHANGED, None);
        Ok(())
    }

    /// Unregister a tool. Per spec.md §9's documented asymmetry, this does
    /// NOT fire a list-change notification (unlike prompts/resources).
    pub async fn unregister_tool(&self, name: &str) -> Result<(), McpError> {
        let mut tools = self.tools.lock().await;
        let before = tools.len();
        tools.retain(|entry| entry.name != name);
        if tools.len() == before {
            return Err(McpError::StateError(format!("tool '{name}' is not registered")));
        }
        Ok(())
    }

    pub async fn list(&self) -> Vec<Tool> {
        self.tools.lock().await.iter().map(|entry| entry.tool.clone()).collect()
    }

    async fn handle_list(&self) -> Result<Value, ProtocolError> {
        let tools = self.list().await;
        serde_json::to_value(serde_json::json!({ "tools": tools }))
            .map_err(|e| ProtocolError::Internal { message: e.to_string() })
    }

    async fn handle_call(&self, params: Option<Value>) -> Result<Value, ProtocolError> {
        #[derive(Deserialize)]
        struct CallParams {
            name: String,
            #[serde(default)]
            arguments: Value,
        }
        let params: CallParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| ProtocolError::InvalidParams { message: e.to_string() })?;

        let handler = {
            let tools = self.tools.lock().await;
            tools
                .iter()
                .find(|entry| entry.name == params.name)
                .map(|entry| Arc::clone(&entry.handler))
        };

        let result = match handler {
            Some(handler) => match handler(params.arguments).await {
                Ok(result) => result,
                Err(message) => CallToolResult::error_text(message),
            },
            None => CallToolResult::error_text(format!("No tool registered with the name {}", params.name)),
        };

        serde_json::to_value(result).map_err(|e| ProtocolError::Internal { message: e.to_string() })
    }
}
