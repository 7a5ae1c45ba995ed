//! JSON-RPC 2.0 framing plus the MCP data model (spec.md §1.1 / §3).

pub mod constants;
pub mod errors;
pub mod message;
pub mod types;

pub use constants::{error_codes, methods, MAX_COMPLETION_VALUES};
pub use errors::{McpError, McpResult, ProtocolError, ProtocolResult, TransportError};
pub use message::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Meta, ProgressToken,
    RequestId, ResponseId,
};
pub use types::*;
