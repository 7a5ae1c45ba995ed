//! Resources module (spec.md §4.6): static URIs, URI-template fallbacks,
//! subscriptions, and the two notifications that ride on top of them.
//!
//! Template matching is deliberately *not* RFC 6570 parsing — each
//! template's handler decides for itself whether a URI is its own, by
//! returning `Ok(None)` when it isn't (spec.md §4.6: "this keeps template
//! matching user-controlled").

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::peer::Peer;
use crate::protocol::{
    methods, McpError, ProtocolError, ReadResourceResult, Resource, ResourceTemplateDescriptor,
    ResourcesCapability, Uri,
};

pub type ResourceHandlerFn = dyn Fn() -> BoxFuture<'static, Option<ReadResourceResult>> + Send + Sync;
pub type ResourceTemplateHandlerFn =
    dyn Fn(String) -> BoxFuture<'static, Option<ReadResourceResult>> + Send + Sync;

struct StaticEntry {
    resource: Resource,
    handler: Arc<ResourceHandlerFn>,
}

struct TemplateEntry {
    descriptor: ResourceTemplateDescriptor,
    handler: Arc<ResourceTemplateHandlerFn>,
}

struct State {
    statics: Vec<StaticEntry>,
    templates: Vec<TemplateEntry>,
    subscriptions: HashSet<String>,
}

pub struct ResourcesModule {
    peer: Peer,
    state: Mutex<State>,
}

impl ResourcesModule {
    pub fn install(peer: Peer) -> Result<Arc<Self>, McpError> {
        let module = Arc::new(Self {
            peer,
            state: Mutex::new(State {
                statics: Vec::new(),
                templates: Vec::new(),
                subscriptions: HashSet::new(),
            }),
        });

        let list_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::RESOURCES_LIST, move |_params| {
            let module = Arc::clone(&list_module);
            async move { module.handle_list().await }
        })?;

        let templates_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::RESOURCES_TEMPLATES_LIST, move |_params| {
            let module = Arc::clone(&templates_module);
            async move { module.handle_templates_list().await }
        })?;

        let read_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::RESOURCES_READ, move |params| {
            let module = Arc::clone(&read_module);
            async move { module.handle_read(params).await }
        })?;

        let sub_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::RESOURCES_SUBSCRIBE, move |params| {
            let module = Arc::clone(&sub_module);
            async move { module.handle_subscribe(params).await }
        })?;

        let unsub_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::RESOURCES_UNSUBSCRIBE, move |params| {
            let module = Arc::clone(&unsub_module);
            async move { module.handle_unsubscribe(params).await }
        })?;

        Ok(module)
    }

    pub fn capability(&self) -> ResourcesCapability {
        ResourcesCapability { subscribe: Some(true), list_changed: Some(true) }
    }

    pub async fn add_resource<F, Fut>(&self, resource: Resource, handler: F) -> Result<(), McpError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<ReadResourceResult>> + Send + 'static,
    {
        let mut state = self.state.lock().await;
        if state.statics.iter().any(|entry| entry.resource.uri == resource.uri) {
            return Err(McpError::StateError(format!("resource '{}' already registered", resource.uri)));
        }
        let handler: Arc<ResourceHandlerFn> = Arc::new(move || Box::pin(handler()));
        state.statics.push(StaticEntry { resource, handler });
        drop(state);
        self.peer.send_notification(methods::RESOURCES_LIST_CHANGED, None);
        Ok(())
    }

    /// Swap a previously-registered resource's handler. Requires a prior
    /// registration (spec.md §4.6); emits `resources/updated` only if `uri`
    /// is currently subscribed.
    pub async fn update_resource<F, Fut>(&self, resource: Resource, handler: Option<F>) -> Result<(), McpError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<ReadResourceResult>> + Send + 'static,
    {
        let mut state = self.state.lock().await;
        let uri = resource.uri.clone();
        let entry = state
            .statics
            .iter_mut()
            .find(|entry| entry.resource.uri == uri)
            .ok_or_else(|| McpError::StateError(format!("resource '{uri}' is not registered")))?;
        entry.resource = resource;
        if let Some(handler) = handler {
            entry.handler = Arc::new(move || Box::pin(handler()));
        }
        let subscribed = state.subscriptions.contains(uri.as_str());
        drop(state);
        if subscribed {
            self.peer.send_notification(
                methods::RESOURCES_UPDATED,
                Some(serde_json::json!({ "uri": uri })),
            );
        }
        Ok(())
    }

    /// Remove a static resource, implicitly dropping its subscription
    /// (spec.md §3 invariant: subscription set ⊆ registered resources).
    pub async fn remove_resource(&self, uri: &Uri) -> Result<(), McpError> {
        let mut state = self.state.lock().await;
        let before = state.statics.len();
        state.statics.retain(|entry| &entry.resource.uri != uri);
        if state.statics.len() == before {
            return Err(McpError::StateError(format!("resource '{uri}' is not registered")));
        }
        state.subscriptions.remove(uri.as_str());
        drop(state);
        self.peer.send_notification(methods::RESOURCES_LIST_CHANGED, None);
        Ok(())
    }

    pub async fn add_template<F, Fut>(&self, descriptor: ResourceTemplateDescriptor, handler: F) -> Result<(), McpError>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<ReadResourceResult>> + Send + 'static,
    {
        let mut state = self.state.lock().await;
        let handler: Arc<ResourceTemplateHandlerFn> = Arc::new(move |uri| Box::pin(handler(uri)));
        state.templates.push(TemplateEntry { descriptor, handler });
        drop(state);
        self.peer.send_notification(methods::RESOURCES_LIST_CHANGED, None);
        Ok(())
    }

    pub async fn list(&self) -> Vec<Resource> {
        self.state.lock().await.statics.iter().map(|entry| entry.resource.clone()).collect()
    }

    pub async fn list_templates(&self) -> Vec<ResourceTemplateDescriptor> {
        self.state.lock().await.templates.iter().map(|entry| entry.descriptor.clone()).collect()
    }

    pub async fn subscriptions(&self) -> HashSet<String> {
        self.state.lock().await.subscriptions.clone()
    }

    /// spec.md §4.6 read algorithm: exact static handler first; otherwise
    /// the first template (in insertion order) whose handler returns
    /// `Some(..)` wins; `None` from every candidate is `InvalidParams`.
    async fn read(&self, uri: &str) -> Result<ReadResourceResult, ProtocolError> {
        let static_handler = {
            let state = self.state.lock().await;
            state
                .statics
                .iter()
                .find(|entry| entry.resource.uri.as_str() == uri)
                .map(|entry| Arc::clone(&entry.handler))
        };
        if let Some(handler) = static_handler {
            if let Some(result) = handler().await {
                return Ok(result);
            }
        } else {
            let template_handlers: Vec<Arc<ResourceTemplateHandlerFn>> = {
                let state = self.state.lock().await;
                state.templates.iter().map(|entry| Arc::clone(&entry.handler)).collect()
            };
            for handler in template_handlers {
                if let Some(result) = handler(uri.to_string()).await {
                    return Ok(result);
                }
            }
        }
        Err(ProtocolError::InvalidParams { message: "Resource not found".to_string() })
    }

    async fn handle_list(&self) -> Result<Value, ProtocolError> {
        let resources = self.list().await;
        serde_json::to_value(serde_json::json!({ "resources": resources }))
            .map_err(|e| ProtocolError::Internal { message: e.to_string() })
    }

    async fn handle_templates_list(&self) -> Result<Value, ProtocolError> {
        let templates = self.list_templates().await;
        serde_json::to_value(serde_json::json!({ "resourceTemplates": templates }))
            .map_err(|e| ProtocolError::Internal { message: e.to_string() })
    }

    async fn handle_read(&self, params: Option<Value>) -> Result<Value, ProtocolError> {
        #[derive(Deserialize)]
        struct ReadParams {
            uri: String,
        }
        let params: ReadParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| ProtocolError::InvalidParams { message: e.to_string() })?;
        let result = self.read(&params.uri).await?;
        serde_json::to_value(result).map_err(|e| ProtocolError::Internal { message: e.to_string() })
    }

    async fn handle_subscribe(&self, params: Option<Value>) -> Result<Value, ProtocolError> {
        #[derive(Deserialize)]
        struct UriParams {
            uri: String,
        }
        let params: UriParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| ProtocolError::InvalidParams { message: e.to_string() })?;
        self.state.lock().await.subscriptions.insert(params.uri);
        Ok(Value::Object(Default::default()))
    }

    async fn handle_unsubscribe(&self, params: Option<Value>) -> Result<Value, ProtocolError> {
        #[derive(Deserialize)]
        struct UriParams {
            uri: String,
        }
        let params: UriParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| ProtocolError::InvalidParams { message: e.to_string() })?;
        self.state.lock().await.subscriptions.remove(&params.uri);
        Ok(Value::Object(Default::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerConfig;
    use crate::protocol::{TextResourceContents};
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

    fn text_result(uri: &str, text: &str) -> ReadResourceResult {
        ReadResourceResult {
            contents: vec![crate::protocol::ResourceContents::Text(TextResourceContents {
                uri: Uri::new_unchecked(uri),
                mime_type: None,
                text: text.to_string(),
            })],
        }
    }

    #[tokio::test]
    async fn subscribe_then_update_notifies_then_rereads_new_value() {
        let (client, server) = ready_pair().await;
        let resources = ResourcesModule::install(server).unwrap();
        resources
            .add_resource(
                Resource { uri: Uri::new_unchecked("foo://bar"), name: "bar".to_string(), description: None, mime_type: None, size: None },
                || async { Some(text_result("foo://bar", "bar")) },
            )
            .await
            .unwrap();

        client
            .send_request(methods::RESOURCES_SUBSCRIBE, Some(json!({"uri": "foo://bar"})))
            .await
            .unwrap();

        let notified = Arc::new(std::sync::atomic::AtomicBool::new(false));
        client
            .register_notification_handler(methods::RESOURCES_UPDATED, {
                let notified = Arc::clone(&notified);
                move |_params| {
                    let notified = Arc::clone(&notified);
                    async move {
                        notified.store(true, std::sync::atomic::Ordering::SeqCst);
                    }
                }
            })
            .unwrap();

        resources
            .update_resource(
                Resource { uri: Uri::new_unchecked("foo://bar"), name: "bar".to_string(), description: None, mime_type: None, size: None },
                Some(|| async { Some(text_result("foo://bar", "baz")) }),
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(notified.load(std::sync::atomic::Ordering::SeqCst));

        let result = client
            .send_request(methods::RESOURCES_READ, Some(json!({"uri": "foo://bar"})))
            .await
            .unwrap();
        let result: ReadResourceResult = serde_json::from_value(result).unwrap();
        match &result.contents[0] {
            crate::protocol::ResourceContents::Text(t) => assert_eq!(t.text, "baz"),
            _ => panic!("expected text contents"),
        }
    }

    #[tokio::test]
    async fn static_handler_short_circuits_templates() {
        let (client, server) = ready_pair().await;
        let resources = ResourcesModule::install(server).unwrap();
        resources
            .add_resource(
                Resource { uri: Uri::new_unchecked("static://x"), name: "x".to_string(), description: None, mime_type: None, size: None },
                || async { Some(text_result("static://x", "from-static")) },
            )
            .await
            .unwrap();
        resources
            .add_template(
                ResourceTemplateDescriptor {
                    uri_template: "static://{id}".to_string(),
                    name: "fallback".to_string(),
                    description: None,
                    mime_type: None,
                },
                |_uri| async { Some(text_result("static://x", "from-template")) },
            )
            .await
            .unwrap();

        let result = client
            .send_request(methods::RESOURCES_READ, Some(json!({"uri": "static://x"})))
            .await
            .unwrap();
        let result: ReadResourceResult = serde_json::from_value(result).unwrap();
        match &result.contents[0] {
            crate::protocol::ResourceContents::Text(t) => assert_eq!(t.text, "from-static"),
            _ => panic!("expected text contents"),
        }
    }

    #[tokio::test]
    async fn unmatched_uri_is_invalid_params() {
        let (client, server) = ready_pair().await;
        let _resources = ResourcesModule::install(server).unwrap();

        let err = client
            .send_request(methods::RESOURCES_READ, Some(json!({"uri": "nope://x"})))
            .await
            .unwrap_err();
        match err {
            McpError::Remote { code, .. } => assert_eq!(code, crate::protocol::error_codes::INVALID_PARAMS),
            other => panic!("expected Remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn removing_a_resource_drops_its_subscription() {
        let (_client, server) = ready_pair().await;
        let resources = ResourcesModule::install(server).unwrap();
        let uri = Uri::new_unchecked("foo://gone");
        resources
            .add_resource(
                Resource { uri: uri.clone(), name: "gone".to_string(), description: None, mime_type: None, size: None },
                || async { Some(text_result("foo://gone", "x")) },
            )
            .await
            .unwrap();
        resources.state.lock().await.subscriptions.insert(uri.as_str().to_string());
        resources.remove_resource(&uri).await.unwrap();
        assert!(!resources.subscriptions().await.contains(uri.as_str()));
    }
}
