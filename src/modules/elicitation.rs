//! Elicitation module (spec.md §4.9): a server-to-client `elicitation/create`
//! request for structured user input, gated by the client's `elicitation`
//! capability exactly like [`crate::modules::sampling`].

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::peer::Peer;
use crate::protocol::{methods, ElicitRequest, ElicitResult, McpError, ProtocolError};

pub type ElicitationProvider = dyn Fn(ElicitRequest) -> BoxFuture<'static, ElicitResult> + Send + Sync;

pub struct ElicitationModule {
    peer: Peer,
    provider: RwLock<Option<Arc<ElicitationProvider>>>,
}

impl ElicitationModule {
    pub fn install(peer: Peer) -> Result<Arc<Self>, McpError> {
        let module = Arc::new(Self { peer, provider: RwLock::new(None) });

        let handler_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::ELICITATION_CREATE, move |params| {
            let module = Arc::clone(&handler_module);
            async move { module.handle_create(params).await }
        })?;

        Ok(module)
    }

    /// `provider` returns an `ElicitResult` directly rather than
    /// `Result<_, String>`: reject/cancel are themselves valid, successful
    /// responses in this module (spec.md §7: domain outcome, not an error).
    pub async fn set_provider<F, Fut>(&self, provider: F)
    where
        F: Fn(ElicitRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ElicitResult> + Send + 'static,
    {
        let boxed: Arc<ElicitationProvider> = Arc::new(move |request| Box::pin(provider(request)));
        *self.provider.write().await = Some(boxed);
    }

    pub async fn create(&self, request: ElicitRequest) -> Result<ElicitResult, McpError> {
        let params = serde_json::to_value(request)
            .map_err(|e| McpError::ArgumentError(format!("failed to encode elicitation request: {e}")))?;
        let value = self.peer.send_request(methods::ELICITATION_CREATE, Some(params)).await?;
        serde_json::from_value(value).map_err(|e| McpError::StateError(format!("malformed elicitation result: {e}")))
    }

    async fn handle_create(&self, params: Option<Value>) -> Result<Value, ProtocolError> {
        let request: ElicitRequest = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| ProtocolError::InvalidParams { message: e.to_string() })?;

        let provider = self.provider.read().await.clone();
        let provider = provider.ok_or_else(|| ProtocolError::Internal {
            message: "no elicitation provider installed".to_string(),
        })?;

        let result = provider(request).await;
        serde_json::to_value(result).map_err(|e| ProtocolError::Internal { message: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerConfig;
    use crate::protocol::ElicitAction;
    use crate::transport::duplex_pair;
    use serde_json::json;

    async fn ready_pair() -> (Peer, Peer) {
        let (a, b) = duplex_pair();
        let peer_a = Peer::spawn(a, PeerConfig::default(), None);
        let peer_b = Peer::spawn(b, PeerConfig::default(), None);
        peer_a.mark_ready();
        peer_b.mark_ready();
        (peer_a, peer_b)
    }

    #[tokio::test]
    async fn accept_response_round_trips_with_content() {
        let (client_peer, server_peer) = ready_pair().await;
        let client_elicit = ElicitationModule::install(client_peer).unwrap();
        client_elicit
            .set_provider(|_request| async {
                let mut content = std::collections::HashMap::new();
                content.insert("answer".to_string(), json!("yes"));
                ElicitResult { action: ElicitAction::Accept, content: Some(content) }
            })
            .await;

        let server_elicit = ElicitationModule::install(server_peer).unwrap();
        let result = server_elicit
            .create(ElicitRequest { message: "confirm?".to_string(), requested_schema: json!({"type": "object"}) })
            .await
            .unwrap();
        assert_eq!(result.action, ElicitAction::Accept);
        assert_eq!(result.content.unwrap().get("answer"), Some(&json!("yes")));
    }
}
