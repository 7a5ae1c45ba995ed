//! Completions module (spec.md §4.7): argument-completion requests for
//! prompts/resources, backed by a single user-supplied provider function.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::protocol::constants::MAX_COMPLETION_VALUES;
use crate::peer::Peer;
use crate::protocol::{methods, CompleteResult, Completion, CompletionArgument, CompletionReference, McpError, ProtocolError};

pub type CompletionProvider =
    dyn Fn(CompletionReference, CompletionArgument) -> BoxFuture<'static, Completion> + Send + Sync;

pub struct CompletionsModule {
    provider: RwLock<Option<Arc<CompletionProvider>>>,
}

impl CompletionsModule {
    pub fn install(peer: Peer) -> Result<Arc<Self>, McpError> {
        let module = Arc::new(Self { provider: RwLock::new(None) });

        let complete_module = Arc::clone(&module);
        peer.register_request_handler(methods::COMPLETION_COMPLETE, move |params| {
            let module = Arc::clone(&complete_module);
            async move { module.handle_complete(params).await }
        })?;

        Ok(module)
    }

    /// Set (or replace) the completion provider. Unlike tools/prompts/
    /// resources there is exactly one provider per peer — completions are
    /// not independently registered per reference (spec.md §4.7 treats the
    /// whole method as one endpoint-wide policy).
    pub async fn set_provider<F, Fut>(&self, provider: F)
    where
        F: Fn(CompletionReference, CompletionArgument) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Completion> + Send + 'static,
    {
        let boxed: Arc<CompletionProvider> = Arc::new(move |reference, argument| Box::pin(provider(reference, argument)));
        *self.provider.write().await = Some(boxed);
    }

    async fn handle_complete(&self, params: Option<Value>) -> Result<Value, ProtocolError> {
        #[derive(serde::Deserialize)]
        struct CompleteParams {
            #[serde(rename = "ref")]
            reference: CompletionReference,
            argument: CompletionArgument,
        }
        let params: CompleteParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| ProtocolError::InvalidParams { message: e.to_string() })?;

        let provider = self.provider.read().await.clone();
        let mut completion = match provider {
            Some(provider) => provider(params.reference, params.argument).await,
            None => Completion { values: Vec::new(), has_more: None, total: None },
        };

        // spec.md §4.7: the implementation, not the caller, enforces the cap.
        if completion.values.len() > MAX_COMPLETION_VALUES {
            let total = completion.total.unwrap_or(completion.values.len() as u64);
            completion.values.truncate(MAX_COMPLETION_VALUES);
            completion.has_more = Some(true);
            completion.total = Some(total);
        }

        serde_json::to_value(CompleteResult { completion }).map_err(|e| ProtocolError::Internal { message: e.to_string() })
    }
}
