//! A Model Context Protocol runtime core: a transport-agnostic,
//! symmetric client/server engine over JSON-RPC 2.0, plus the standard
//! MCP capability modules (tools, prompts, resources, completions,
//! logging, sampling, elicitation, roots) composed on top of it.
//!
//! # Architecture
//!
//! - **`protocol`**: JSON-RPC 2.0 framing and the MCP data model —
//!   messages, capability records, and the crate's error taxonomy.
//! - **`transport`**: the line-delimited bidirectional stream abstraction
//!   a `Peer` is spawned on top of, plus an in-memory duplex pair for
//!   tests.
//! - **`correlation`**: the pending-request table matching responses
//!   back to their requests.
//! - **`peer`**: the symmetric request/response/notification engine and
//!   the `initialize` handshake state machine built on top of it.
//! - **`progress`**: per-token progress event broadcasting.
//! - **`modules`**: the capability modules (tools, prompts, resources,
//!   completions, logging, sampling, elicitation, roots and its two
//!   server-side flavors) installed onto a `Peer`.
//! - **`server`** / **`client`**: the two endpoint types applications
//!   build against, each composing a `Peer` with the modules an
//!   application opts into.
//!
//! ## Quick start
//!
//! ```rust
//! use mcp_runtime::protocol::{CallToolResult, Content, Tool};
//! use mcp_runtime::server::{ServerBuilder, ServerConfig};
//! use mcp_runtime::client::{ClientBuilder, ClientConfig};
//! use mcp_runtime::transport::duplex_pair;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (server_transport, client_transport) = duplex_pair();
//!
//! let server = ServerBuilder::new(ServerConfig::default())
//!     .with_tools()
//!     .build(server_transport, None)
//!     .await
//!     .unwrap();
//! server
//!     .tools()
//!     .unwrap()
//!     .register_tool(
//!         Tool { name: "echo".into(), description: None, input_schema: json!({"type": "object"}), annotations: None },
//!         |args| async move { Ok(CallToolResult::success(vec![Content::text(args.to_string())])) },
//!     )
//!     .await
//!     .unwrap();
//!
//! let client = ClientBuilder::new(ClientConfig::default())
//!     .build(client_transport, None)
//!     .await
//!     .unwrap();
//! assert!(client.server_info().unwrap().capabilities.tools.is_some());
//! # }
//! ```

pub mod client;
pub mod correlation;
pub mod modules;
pub mod peer;
pub mod progress;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{Client, ClientBuilder, ClientConfig};
pub use peer::{HandshakeConfig, Peer, PeerConfig};
pub use protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpError, McpResult,
    ProtocolError, ProtocolVersion, RequestId, ResponseId,
};
pub use server::{Server, ServerBuilder, ServerConfig};

/// Crate version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
