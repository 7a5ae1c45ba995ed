//! `Client`: the client-side MCP endpoint. Owns the roots set (spec.md
//! §4.10) and, symmetric to `Server`, may install the provider-backed
//! modules a server is allowed to call into (`sampling`, `elicitation`).

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::modules::{ElicitationModule, RootsModule, SamplingModule};
use crate::peer::handshake::{run_client_handshake, HandshakeConfig, HandshakeState, PeerState};
use crate::peer::{Peer, PeerConfig};
use crate::protocol::{
    ClientCapabilities, ClientInfo, CreateMessageRequest, CreateMessageResult, ElicitRequest,
    ElicitResult, ElicitationCapability, InitializeResult, McpError, ProtocolVersion,
    RootsCapability, SamplingCapability,
};
use crate::transport::{ProtocolLogSink, Transport};

/// Identity and negotiation policy for a `Client` (SPEC_FULL.md §2.3).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_info: ClientInfo,
    pub requested_version: ProtocolVersion,
    /// Whether this client announces `roots.listChanged` — independent of
    /// whether roots are populated at all (spec.md §4.10).
    pub announce_roots_changes: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: ClientInfo { name: "mcp-runtime".to_string(), version: env!("CARGO_PKG_VERSION").to_string() },
            requested_version: ProtocolVersion::latest(),
            announce_roots_changes: true,
        }
    }
}

/// The client endpoint: a `Peer`, the roots it owns, and whichever
/// server-callable provider modules the application installed.
pub struct Client {
    peer: Peer,
    handshake_state: HandshakeState,
    roots: Arc<RootsModule>,
    sampling: Option<Arc<SamplingModule>>,
    elicitation: Option<Arc<ElicitationModule>>,
    initialize_result: OnceCell<InitializeResult>,
}

impl Client {
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn state(&self) -> PeerState {
        self.handshake_state.get()
    }

    pub fn roots(&self) -> &Arc<RootsModule> {
        &self.roots
    }

    pub fn sampling(&self) -> Option<&Arc<SamplingModule>> {
        self.sampling.as_ref()
    }

    pub fn elicitation(&self) -> Option<&Arc<ElicitationModule>> {
        self.elicitation.as_ref()
    }

    /// The server's negotiated capabilities/info, set once `initialize`
    /// completes. Call `initialize` before relying on this.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.initialize_result.get()
    }

    /// Runs the client side of the handshake (spec.md §4.3) and records the
    /// server's response for later capability checks.
    pub async fn initialize(&self, config: &HandshakeConfig) -> Result<InitializeResult, McpError> {
        let capabilities = ClientCapabilities {
            roots: Some(RootsCapability { list_changed: Some(self.roots.announces_changes()) }),
            sampling: self.sampling.as_ref().map(|_| SamplingCapability::default()),
            elicitation: self.elicitation.as_ref().map(|_| ElicitationCapability::default()),
            experimental: None,
        };
        let result = run_client_handshake(&self.peer, &self.handshake_state, config, capabilities).await?;
        let _ = self.initialize_result.set(result.clone());
        Ok(result)
    }

    pub async fn ping(&self, timeout: std::time::Duration) -> bool {
        self.peer.ping(timeout).await
    }

    pub async fn shutdown(&self) {
        self.peer.shutdown().await;
    }
}

/// Builds a [`Client`] by installing the roots module (always present — a
/// client always owns some root set, even if empty) and any optional
/// provider-backed modules before running the handshake.
type BoxedSamplingProvider = Box<
    dyn Fn(CreateMessageRequest) -> futures::future::BoxFuture<'static, Result<CreateMessageResult, String>>
        + Send
        + Sync,
>;
type BoxedElicitationProvider =
    Box<dyn Fn(ElicitRequest) -> futures::future::BoxFuture<'static, ElicitResult> + Send + Sync>;

pub struct ClientBuilder {
    config: ClientConfig,
    sampling_provider: Option<BoxedSamplingProvider>,
    elicitation_provider: Option<BoxedElicitationProvider>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self { config, sampling_provider: None, elicitation_provider: None }
    }

    /// Installs a handler the server may call via `sampling/createMessage`
    /// (spec.md §4.9).
    pub fn with_sampling<F, Fut>(mut self, provider: F) -> Self
    where
        F: Fn(CreateMessageRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CreateMessageResult, String>> + Send + 'static,
    {
        self.sampling_provider = Some(Box::new(move |request| Box::pin(provider(request))));
        self
    }

    /// Installs a handler the server may call via `elicitation/create`
    /// (spec.md's elicitation module).
    pub fn with_elicitation<F, Fut>(mut self, provider: F) -> Self
    where
        F: Fn(ElicitRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ElicitResult> + Send + 'static,
    {
        self.elicitation_provider = Some(Box::new(move |request| Box::pin(provider(request))));
        self
    }

    /// Spawn `transport`, install the roots module and any requested
    /// provider modules, then run the client handshake to completion before
    /// returning. Unlike `ServerBuilder::build`, this awaits the full
    /// handshake: a `Client` the caller can already use makes more sense
    /// than one still negotiating.
    pub async fn build<T: Transport + 'static>(
        self,
        transport: T,
        log_sink: Option<Arc<dyn ProtocolLogSink>>,
    ) -> Result<Arc<Client>, McpError> {
        let peer = Peer::spawn(transport, PeerConfig::default(), log_sink);

        let roots = RootsModule::install(peer.clone(), self.config.announce_roots_changes)?;
        let sampling = match self.sampling_provider {
            Some(provider) => {
                let module = SamplingModule::install(peer.clone())?;
                module.set_provider(move |request| provider(request)).await;
                Some(module)
            }
            None => None,
        };
        let elicitation = match self.elicitation_provider {
            Some(provider) => {
                let module = ElicitationModule::install(peer.clone())?;
                module.set_provider(move |request| provider(request)).await;
                Some(module)
            }
            None => None,
        };

        let client = Arc::new(Client {
            peer,
            handshake_state: HandshakeState::new(),
            roots,
            sampling,
            elicitation,
            initialize_result: OnceCell::new(),
        });

        let handshake_config = HandshakeConfig {
            client_info: self.config.client_info.clone(),
            requested_version: self.config.requested_version.clone(),
            ..HandshakeConfig::default()
        };
        client.initialize(&handshake_config).await?;

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ServerBuilder, ServerConfig};
    use crate::transport::duplex_pair;

    #[tokio::test]
    async fn client_handshake_negotiates_latest_version() {
        let (server_t, client_t) = duplex_pair();
        let _server = ServerBuilder::new(ServerConfig::default()).with_tools().build(server_t, None).await.unwrap();
        let client = ClientBuilder::new(ClientConfig::default()).build(client_t, None).await.unwrap();

        assert_eq!(client.state(), PeerState::Ready);
        let info = client.server_info().unwrap();
        assert_eq!(info.protocol_version, ProtocolVersion::latest());
        assert!(info.capabilities.tools.is_some());
    }
}
