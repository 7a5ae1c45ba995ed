//! `Server`: the server-side MCP endpoint — a `Peer` plus whichever
//! capability modules the application opts into, composed through a
//! builder (spec.md §2's "symmetric client and server endpoints built on
//! the same transport-agnostic peer abstraction").

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::modules::{
    CompletionsModule, ElicitationModule, LoggingModule, PromptsModule, ResourcesModule,
    RootsFallbackModule, RootsTrackingModule, SamplingModule, ToolsModule,
};
use crate::peer::handshake::{install_server_handshake, HandshakeState, PeerState};
use crate::peer::{Peer, PeerConfig};
use crate::protocol::{
    ClientCapabilities, ClientInfo, McpError, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use crate::transport::{ProtocolLogSink, Transport};

/// Identity and negotiation policy for a `Server` (SPEC_FULL.md §2.3).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_info: ServerInfo,
    pub instructions: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_info: ServerInfo { name: "mcp-runtime".to_string(), version: env!("CARGO_PKG_VERSION").to_string() },
            instructions: None,
        }
    }
}

/// Snapshot of the client's declared identity/capabilities, available once
/// the handshake reaches `ready`.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub client_info: ClientInfo,
    pub client_capabilities: ClientCapabilities,
}

/// The server endpoint. Every module field is `Some` only if the
/// application asked [`ServerBuilder`] to install it; callers check
/// `server.tools()` etc. before using a module the same way they would
/// check `ClientCapabilities` before calling a client-side feature.
pub struct Server {
    peer: Peer,
    handshake_state: Arc<HandshakeState>,
    config: ServerConfig,
    peer_info: OnceCell<PeerInfo>,
    negotiated_version: OnceCell<ProtocolVersion>,
    tools: Option<Arc<ToolsModule>>,
    prompts: Option<Arc<PromptsModule>>,
    resources: Option<Arc<ResourcesModule>>,
    completions: Option<Arc<CompletionsModule>>,
    logging: Option<Arc<LoggingModule>>,
    sampling: Option<Arc<SamplingModule>>,
    elicitation: Option<Arc<ElicitationModule>>,
    roots_tracking: Option<Arc<RootsTrackingModule>>,
    roots_fallback: Option<Arc<RootsFallbackModule>>,
}

impl Server {
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn state(&self) -> PeerState {
        self.handshake_state.get()
    }

    /// The client's identity/capabilities, once known. Resolves as soon as
    /// the server has answered `initialize` — it does not wait for
    /// `notifications/initialized` — since the value is fixed at that point.
    pub fn peer_info(&self) -> Option<&PeerInfo> {
        self.peer_info.get()
    }

    /// The protocol version negotiated during `initialize` (spec.md §4.3:
    /// "the negotiated version is stored on the server"). Resolves at the
    /// same point as `peer_info`.
    pub fn negotiated_version(&self) -> Option<&ProtocolVersion> {
        self.negotiated_version.get()
    }

    pub fn tools(&self) -> Option<&Arc<ToolsModule>> {
        self.tools.as_ref()
    }

    pub fn prompts(&self) -> Option<&Arc<PromptsModule>> {
        self.prompts.as_ref()
    }

    pub fn resources(&self) -> Option<&Arc<ResourcesModule>> {
        self.resources.as_ref()
    }

    pub fn completions(&self) -> Option<&Arc<CompletionsModule>> {
        self.completions.as_ref()
    }

    pub fn logging(&self) -> Option<&Arc<LoggingModule>> {
        self.logging.as_ref()
    }

    /// Sampling guard: spec.md §4.9 requires the caller to check the
    /// client's advertised capability before issuing `sampling/createMessage`.
    pub fn sampling(&self) -> Result<&Arc<SamplingModule>, McpError> {
        match (&self.sampling, self.peer_info()) {
            (Some(module), Some(info)) if info.client_capabilities.supports_sampling() => Ok(module),
            (Some(_), Some(_)) => Err(McpError::StateError("client did not advertise sampling".to_string())),
            _ => Err(McpError::StateError("sampling module not installed or handshake incomplete".to_string())),
        }
    }

    pub fn elicitation(&self) -> Result<&Arc<ElicitationModule>, McpError> {
        match (&self.elicitation, self.peer_info()) {
            (Some(module), Some(info)) if info.client_capabilities.supports_elicitation() => Ok(module),
            (Some(_), Some(_)) => Err(McpError::StateError("client did not advertise elicitation".to_string())),
            _ => Err(McpError::StateError("elicitation module not installed or handshake incomplete".to_string())),
        }
    }

    pub fn roots_tracking(&self) -> Option<&Arc<RootsTrackingModule>> {
        self.roots_tracking.as_ref()
    }

    pub fn roots_fallback(&self) -> Option<&Arc<RootsFallbackModule>> {
        self.roots_fallback.as_ref()
    }

    pub async fn ping(&self, timeout: std::time::Duration) -> bool {
        self.peer.ping(timeout).await
    }

    pub async fn shutdown(&self) {
        self.peer.shutdown().await;
    }
}

/// Builds a [`Server`] by installing zero or more capability modules
/// (spec.md §2) before running the handshake on a freshly-spawned `Peer`.
pub struct ServerBuilder {
    config: ServerConfig,
    with_tools: bool,
    with_prompts: bool,
    with_resources: bool,
    with_completions: bool,
    with_logging: bool,
    with_sampling: bool,
    with_elicitation: bool,
    with_roots_tracking: bool,
    with_roots_fallback: bool,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            with_tools: false,
            with_prompts: false,
            with_resources: false,
            with_completions: false,
            with_logging: false,
            with_sampling: false,
            with_elicitation: false,
            with_roots_tracking: false,
            with_roots_fallback: false,
        }
    }

    pub fn with_tools(mut self) -> Self {
        self.with_tools = true;
        self
    }

    pub fn with_prompts(mut self) -> Self {
        self.with_prompts = true;
        self
    }

    pub fn with_resources(mut self) -> Self {
        self.with_resources = true;
        self
    }

    pub fn with_completions(mut self) -> Self {
        self.with_completions = true;
        self
    }

    pub fn with_logging(mut self) -> Self {
        self.with_logging = true;
        self
    }

    pub fn with_sampling(mut self) -> Self {
        self.with_sampling = true;
        self
    }

    pub fn with_elicitation(mut self) -> Self {
        self.with_elicitation = true;
        self
    }

    /// Tracks the client's real root set (requires the client to advertise
    /// `roots`; spec.md §4.11).
    pub fn with_roots_tracking(mut self) -> Self {
        self.with_roots_tracking = true;
        self
    }

    /// Registers `add_roots`/`remove_roots` tools for clients that don't
    /// advertise `roots` (spec.md §4.12). Implies `with_tools`.
    pub fn with_roots_fallback(mut self) -> Self {
        self.with_roots_fallback = true;
        self.with_tools = true;
        self
    }

    /// Spawn `transport`, install the requested modules, and run the
    /// server side of the handshake. Returns once the modules are
    /// installed; the handshake itself completes asynchronously as the
    /// client sends `initialize`/`notifications/initialized`.
    pub async fn build<T: Transport + 'static>(
        self,
        transport: T,
        log_sink: Option<Arc<dyn ProtocolLogSink>>,
    ) -> Result<Arc<Server>, McpError> {
        let peer = Peer::spawn(transport, PeerConfig::default(), log_sink);

        let tools = if self.with_tools { Some(ToolsModule::install(peer.clone())?) } else { None };
        let prompts = if self.with_prompts { Some(PromptsModule::install(peer.clone())?) } else { None };
        let resources = if self.with_resources { Some(ResourcesModule::install(peer.clone())?) } else { None };
        let completions = if self.with_completions { Some(CompletionsModule::install(peer.clone())?) } else { None };
        let logging = if self.with_logging { Some(LoggingModule::install(peer.clone())?) } else { None };
        let sampling = if self.with_sampling { Some(SamplingModule::install(peer.clone())?) } else { None };
        let elicitation = if self.with_elicitation { Some(ElicitationModule::install(peer.clone())?) } else { None };
        // Constructed but not yet activated: the spec forbids subscribing to
        // roots-list-changed notifications until the client's capabilities
        // (known only once `initialize` arrives) confirm it advertised
        // `roots.listChanged` — see the `build_result` closure below.
        let roots_tracking = if self.with_roots_tracking {
            Some(RootsTrackingModule::new(peer.clone()))
        } else {
            None
        };
        let roots_fallback = if self.with_roots_fallback {
            #[allow(clippy::unwrap_used)]
            let tools_ref = tools.as_ref().unwrap();
            Some(RootsFallbackModule::install(tools_ref).await?)
        } else {
            None
        };

        let server = Arc::new(Server {
            peer: peer.clone(),
            handshake_state: Arc::new(HandshakeState::new()),
            config: self.config,
            peer_info: OnceCell::new(),
            negotiated_version: OnceCell::new(),
            tools,
            prompts,
            resources,
            completions,
            logging,
            sampling,
            elicitation,
            roots_tracking,
            roots_fallback,
        });

        let handshake_server = Arc::clone(&server);
        install_server_handshake(
            &peer,
            Arc::clone(&server.handshake_state),
            |requested| if requested.is_supported() { requested.clone() } else { ProtocolVersion::latest() },
            move |negotiated, client_capabilities, client_info| {
                let capabilities = build_server_capabilities(&handshake_server);
                if let Some(tracker) = &handshake_server.roots_tracking {
                    if client_capabilities.supports_roots_list_changed() {
                        let _ = tracker.activate();
                    }
                }
                let _ = handshake_server.peer_info.set(PeerInfo { client_info, client_capabilities });
                let _ = handshake_server.negotiated_version.set(negotiated);
                (
                    capabilities,
                    handshake_server.config.server_info.clone(),
                    handshake_server.config.instructions.clone(),
                )
            },
        )?;

        Ok(server)
    }
}

fn build_server_capabilities(server: &Server) -> ServerCapabilities {
    ServerCapabilities {
        tools: server.tools.as_ref().map(|m| m.capability()),
        prompts: server.prompts.as_ref().map(|m| m.capability()),
        resources: server.resources.as_ref().map(|m| m.capability()),
        logging: server.logging.as_ref().map(|m| m.capability()),
        completions: server.completions.as_ref().map(|_| Default::default()),
        experimental: None,
    }
}
