//! Prompts module (spec.md §4.5): mirrors [`crate::modules::tools`] with one
//! deliberate difference — an unknown prompt name is a *protocol* error
//! (`InvalidParams`), not a domain-level result, per spec.md §4.5.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::peer::Peer;
use crate::protocol::{methods, GetPromptResult, McpError, ProtocolError, Prompt, PromptsCapability};

pub type PromptHandlerFn = dyn Fn(Value) -> BoxFuture<'static, Result<GetPromptResult, String>> + Send + Sync;

struct PromptEntry {
    name: String,
    prompt: Prompt,
    handler: Arc<PromptHandlerFn>,
}

pub struct PromptsModule {
    peer: Peer,
    prompts: Mutex<Vec<PromptEntry>>,
}

impl PromptsModule {
    pub fn install(peer: Peer) -> Result<Arc<Self>, McpError> {
        let module = Arc::new(Self {
            peer,
            prompts: Mutex::new(Vec::new()),
        });

        let list_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::PROMPTS_LIST, move |_params| {
            let module = Arc::clone(&list_module);
            async move { module.handle_list().await }
        })?;

        let get_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::PROMPTS_GET, move |params| {
            let module = Arc::clone(&get_module);
            async move { module.handle_get(params).await }
        })?;

        Ok(module)
    }

    pub fn capability(&self) -> PromptsCapability {
        PromptsCapability { list_changed: Some(true) }
    }

    pub async fn register_prompt<F, Fut>(&self, prompt: Prompt, handler: F) -> Result<(), McpError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GetPromptResult, String>> + Send + 'static,
    {
        let mut prompts = self.prompts.lock().await;
        if prompts.iter().any(|entry| entry.name == prompt.name) {
            return Err(McpError::StateError(format!("prompt '{}' already registered", prompt.name)));
        }
        let name = prompt.name.clone();
        let handler: Arc<PromptHandlerFn> = Arc::new(move |args| Box::pin(handler(args)));
        prompts.push(PromptEntry { name, prompt, handler });
        drop(prompts);
        self.peer.send_notification(methods::PROMPTS_LIST_CHANGED, None);
        Ok(())
    }

    /// Unlike tools, removal fires a list-change notification (spec.md §9
    /// documents this asymmetry and leaves the policy to the implementer;
    /// this crate pins prompts/resources to notify on removal).
    pub async fn remove_prompt(&self, name: &str) -> Result<(), McpError> {
        let mut prompts = self.prompts.lock().await;
        let before = prompts.len();
        prompts.retain(|entry| entry.name != name);
        if prompts.len() == before {
            return Err(McpError::StateError(format!("prompt '{name}' is not registered")));
        }
        drop(prompts);
        self.peer.send_notification(methods::PROMPTS_LIST_CHANGED, None);
        Ok(())
    }

    pub async fn list(&self) -> Vec<Prompt> {
        self.prompts.lock().await.iter().map(|entry| entry.prompt.clone()).collect()
    }

    async fn handle_list(&self) -> Result<Value, ProtocolError> {
        let prompts = self.list().await;
        serde_json::to_value(serde_json::json!({ "prompts": prompts }))
            .map_err(|e| ProtocolError::Internal { message: e.to_string() })
    }

    async fn handle_get(&self, params: Option<Value>) -> Result<Value, ProtocolError> {
        #[derive(Deserialize)]
        struct GetParams {
            name: String,
            #[serde(default)]
            arguments: Value,
        }
        let params: GetParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| ProtocolError::InvalidParams { message: e.to_string() })?;

        let handler = {
            let prompts = self.prompts.lock().await;
            prompts
                .iter()
                .find(|entry| entry.name == params.name)
                .map(|entry| Arc::clone(&entry.handler))
        };

        let handler = handler.ok_or_else(|| ProtocolError::InvalidParams {
            message: format!("unknown prompt: {}", params.name),
        })?;

        let result = handler(params.arguments)
            .await
            .map_err(|message| ProtocolError::Internal { message })?;

        serde_json::to_value(result).map_err(|e| ProtocolError::Internal { message: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerConfig;
    use crate::protocol::{Content, PromptMessage};
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
    async fn get_known_prompt_round_trips() {
        let (client, server) = ready_pair().await;
        let prompts = PromptsModule::install(server).unwrap();
        prompts
            .register_prompt(
                Prompt { name: "greet".to_string(), description: None, arguments: None },
                |_args| async {
                    Ok(GetPromptResult {
                        description: None,
                        messages: vec![PromptMessage::user(Content::text("hi"))],
                    })
                },
            )
            .await
            .unwrap();

        let result = client
            .send_request(methods::PROMPTS_GET, Some(json!({"name": "greet"})))
            .await
            .unwrap();
        let result: GetPromptResult = serde_json::from_value(result).unwrap();
        assert_eq!(result.messages[0].content[0].as_text(), Some("hi"));
    }

    #[tokio::test]
    async fn unknown_prompt_is_a_protocol_error() {
        let (client, server) = ready_pair().await;
        let _prompts = PromptsModule::install(server).unwrap();

        let err = client
            .send_request(methods::PROMPTS_GET, Some(json!({"name": "nope"})))
            .await
            .unwrap_err();
        match err {
            McpError::Remote { code, .. } => assert_eq!(code, crate::protocol::error_codes::INVALID_PARAMS),
            other => panic!("expected Remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn remove_prompt_notifies_unlike_tools() {
        let (client, server) = ready_pair().await;
        let prompts = PromptsModule::install(server).unwrap();
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        client
            .register_notification_handler(methods::PROMPTS_LIST_CHANGED, {
                let seen = Arc::clone(&seen);
                move |_params| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                }
            })
            .unwrap();

        prompts
            .register_prompt(
                Prompt { name: "a".to_string(), description: None, arguments: None },
                |_| async {
                    Ok(GetPromptResult { description: None, messages: vec![] })
                },
            )
            .await
            .unwrap();
        prompts.remove_prompt("a").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
