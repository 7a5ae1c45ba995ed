//! Error hierarchy for the protocol, transport, and MCP layers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::protocol::constants::error_codes;

/// Errors arising from JSON-RPC framing and MCP message decoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Malformed JSON on the wire (-32700).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Well-formed JSON that is not a valid JSON-RPC 2.0 request/response/notification (-32600).
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// No handler registered for the method (-32601).
    #[error("method not found: {method}")]
    MethodNotFound { method: String },

    /// Params present but malformed for the method (-32602).
    #[error("invalid params: {message}")]
    InvalidParams { message: String },

    /// Handler raised an error with no more specific mapping (-32603).
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ProtocolError {
    pub fn code(&self) -> i64 {
        match self {
            ProtocolError::Parse { .. } => error_codes::PARSE_ERROR,
            ProtocolError::InvalidRequest { .. } => error_codes::INVALID_REQUEST,
            ProtocolError::MethodNotFound { .. } => error_codes::METHOD_NOT_FOUND,
            ProtocolError::InvalidParams { .. } => error_codes::INVALID_PARAMS,
            ProtocolError::Internal { .. } => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn to_error_object(&self) -> Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Parse {
            message: err.to_string(),
        }
    }
}

/// Errors from the underlying bidirectional stream.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,

    #[error("frame exceeded maximum size")]
    FrameTooLarge,
}

/// Top-level error returned to MCP callers (`sendRequest`, module operations).
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum McpError {
    /// The remote peer replied with a JSON-RPC error object.
    #[error("remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// The peer's transport has been shut down; no further requests can complete.
    #[error("transport closed")]
    TransportClosed,

    /// Illegal operation for the peer's current state: used before `ready`,
    /// for duplicate registration, or for updating an unregistered resource/prompt/tool.
    #[error("state error: {0}")]
    StateError(String),

    /// A caller-supplied argument was invalid independent of any wire round-trip
    /// (missing progress token, malformed lazy-log producer).
    #[error("argument error: {0}")]
    ArgumentError(String),

    /// The client shut the connection down because the server's negotiated
    /// protocol version is not one the client supports.
    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),
}

impl McpError {
    pub fn from_error_value(value: &Value) -> Self {
        let code = value.get("code").and_then(Value::as_i64).unwrap_or(error_codes::INTERNAL_ERROR);
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        let data = value.get("data").cloned();
        McpError::Remote { code, message, data }
    }
}

impl From<ProtocolError> for McpError {
    fn from(err: ProtocolError) -> Self {
        McpError::Remote {
            code: err.code(),
            message: err.to_string(),
            data: None,
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;
pub type ProtocolResult<T> = Result<T, ProtocolError>;
