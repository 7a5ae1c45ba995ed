//! Sampling module (spec.md §4.9): a server-to-client `sampling/createMessage`
//! request, gated by the client's advertised `sampling` capability.
//!
//! This module has two faces, matching the two directions `sampling` can be
//! installed on:
//! - On a `Client`, [`SamplingModule::install`] registers the inbound
//!   handler that forwards to a user-supplied [`SamplingProvider`].
//! - On a `Server`, [`SamplingModule::create_message`] sends the request,
//!   after the caller has checked the negotiated client capabilities.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::peer::Peer;
use crate::protocol::{methods, CreateMessageRequest, CreateMessageResult, McpError, ProtocolError};

pub type SamplingProvider =
    dyn Fn(CreateMessageRequest) -> BoxFuture<'static, Result<CreateMessageResult, String>> + Send + Sync;

pub struct SamplingModule {
    peer: Peer,
    provider: RwLock<Option<Arc<SamplingProvider>>>,
}

impl SamplingModule {
    /// Installs the inbound `sampling/createMessage` handler. A peer with no
    /// provider set yet answers with an internal error rather than silently
    /// dropping the request — the capability was advertised, so the remote
    /// is entitled to expect a handler exists.
    pub fn install(peer: Peer) -> Result<Arc<Self>, McpError> {
        let module = Arc::new(Self { peer, provider: RwLock::new(None) });

        let handler_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::SAMPLING_CREATE_MESSAGE, move |params| {
            let module = Arc::clone(&handler_module);
            async move { module.handle_create_message(params).await }
        })?;

        Ok(module)
    }

    pub async fn set_provider<F, Fut>(&self, provider: F)
    where
        F: Fn(CreateMessageRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CreateMessageResult, String>> + Send + 'static,
    {
        let boxed: Arc<SamplingProvider> = Arc::new(move |request| Box::pin(provider(request)));
        *self.provider.write().await = Some(boxed);
    }

    /// Server-side entry point: send the request over `self.peer`. Callers
    /// are expected to have already checked
    /// `ClientCapabilities::supports_sampling` — a client that never
    /// advertised `sampling` simply has no handler installed, so the
    /// request naturally fails with `MethodNotFound` (spec.md §4.9).
    pub async fn create_message(&self, request: CreateMessageRequest) -> Result<CreateMessageResult, McpError> {
        let params = serde_json::to_value(request)
            .map_err(|e| McpError::ArgumentError(format!("failed to encode sampling request: {e}")))?;
        let value = self.peer.send_request(methods::SAMPLING_CREATE_MESSAGE, Some(params)).await?;
        serde_json::from_value(value).map_err(|e| McpError::StateError(format!("malformed sampling result: {e}")))
    }

    async fn handle_create_message(&self, params: Option<Value>) -> Result<Value, ProtocolError> {
        let request: CreateMessageRequest = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| ProtocolError::InvalidParams { message: e.to_string() })?;

        let provider = self.provider.read().await.clone();
        let provider = provider.ok_or_else(|| ProtocolError::Internal {
            message: "no sampling provider installed".to_string(),
        })?;

        let result = provider(request).await.map_err(|message| ProtocolError::Internal { message })?;
        serde_json::to_value(result).map_err(|e| ProtocolError::Internal { message: e.to_string() })
    }
}
