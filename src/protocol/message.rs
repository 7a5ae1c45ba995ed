//! JSON-RPC 2.0 message envelope with an MCP `_meta` extension.
//!
//! One message, one line: §4.1 of spec.md requires the wire encoding to put
//! exactly one JSON object per LF-terminated line, so these types are kept
//! free of anything the line codec would need to special-case.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC request id: either a string or a number, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    pub fn new_string(id: impl Into<String>) -> Self {
        RequestId::String(id.into())
    }

    pub fn new_number(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

/// An opaque progress correlation token (string or integer, per spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    String(String),
    Number(i64),
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressToken::String(s) => write!(f, "{s}"),
            ProgressToken::Number(n) => write!(f, "{n}"),
        }
    }
}

/// The reserved `_meta` member carried by requests (and, by convention, by
/// some notifications). Unknown keys round-trip losslessly via `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "progressToken", skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<ProgressToken>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Meta {
    pub fn with_progress_token(token: ProgressToken) -> Self {
        Self {
            progress_token: Some(token),
            extra: HashMap::new(),
        }
    }
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: RequestId,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Extract `_meta.progressToken` from `params`, if present.
    pub fn progress_token(&self) -> Option<ProgressToken> {
        self.params
            .as_ref()?
            .get("_meta")?
            .get("progressToken")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A response's `id`: the originating request's id, or `null` when it could
/// not be determined (e.g. the inbound line failed to parse before an id
/// could be read). JSON-RPC 2.0 requires this member on every response, so
/// unlike `Option<RequestId>` this type is never silently absent — a
/// missing `id` key fails to deserialize rather than defaulting to `Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseId {
    Known(RequestId),
    Null,
}

impl ResponseId {
    pub fn as_request_id(&self) -> Option<&RequestId> {
        match self {
            ResponseId::Known(id) => Some(id),
            ResponseId::Null => None,
        }
    }
}

impl From<RequestId> for ResponseId {
    fn from(id: RequestId) -> Self {
        ResponseId::Known(id)
    }
}

/// JSON-RPC 2.0 response: exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub id: ResponseId,
}

impl JsonRpcResponse {
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id: ResponseId::Known(id),
        }
    }

    pub fn error(error: Value, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id: id.map(ResponseId::Known).unwrap_or(ResponseId::Null),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC 2.0 notification: no `id`, no reply expected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A decoded line: request, notification, or response. `serde(untagged)`
/// tries variants top-to-bottom and falls through on any missing or
/// mismatched required field, so both the order here and each variant's
/// required fields matter: `Request`/`Notification` require `method`, which
/// `Response` lacks, and `Request` additionally requires `id`, which
/// `Notification` lacks. Trying them before `Response` means a response
/// line only ever reaches `Response`. `Response` requires `jsonrpc` + `id`
/// (see `ResponseId`, not a plain `Option<RequestId>` — serde defaults a
/// missing `Option<T>` field to `None` rather than rejecting the line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
