//! Initialization handshake and protocol-version negotiation (spec.md §4.3).
//!
//! The handshake is a small state machine layered on top of `Peer` rather
//! than baked into it, so the same `Peer` engine serves both roles:
//!
//! ```text
//! created -> awaiting-peer (role-specific) -> ready -> shut-down
//! ```
//!
//! A client drives the handshake by sending `initialize` and then
//! `notifications/initialized`; a server drives it by answering an inbound
//! `initialize` request and waiting for the matching notification. Either
//! side reaching `ready` is what flips `Peer::mark_ready`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::peer::Peer;
use crate::protocol::{
    methods, ClientCapabilities, ClientInfo, InitializeRequestParams, InitializeResult,
    McpError, ProtocolError, ProtocolVersion, ServerCapabilities, ServerInfo,
};

/// Which side of the handshake a `Peer` is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

/// Lifecycle state of a peer's handshake (spec.md §4.3's state diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerState {
    Created = 0,
    AwaitingPeer = 1,
    Ready = 2,
    ShutDown = 3,
}

impl PeerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PeerState::Created,
            1 => PeerState::AwaitingPeer,
            2 => PeerState::Ready,
            _ => PeerState::ShutDown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub client_info: ClientInfo,
    pub server_info: ServerInfo,
    pub requested_version: ProtocolVersion,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            client_info: ClientInfo { name: "mcp-runtime".to_string(), version: env!("CARGO_PKG_VERSION").to_string() },
            server_info: ServerInfo { name: "mcp-runtime".to_string(), version: env!("CARGO_PKG_VERSION").to_string() },
            requested_version: ProtocolVersion::latest(),
        }
    }
}

/// Tracks a peer's lifecycle state across the handshake, independent of
/// `Peer`'s own ready flag (which this module flips once state reaches
/// `Ready`).
pub struct HandshakeState {
    state: AtomicU8,
}

impl HandshakeState {
    pub fn new() -> Self {
        Self { state: AtomicU8::new(PeerState::Created as u8) }
    }

    pub fn get(&self) -> PeerState {
        PeerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: PeerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Default for HandshakeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Client side: send `initialize`, validate the server's negotiated
/// version, then send `notifications/initialized` and mark the peer ready.
///
/// Returns the server's advertised capabilities/info so `Client` can record
/// them (spec.md's "capability negotiation" requirement: a client must not
/// call an operation the server did not advertise).
pub async fn run_client_handshake(
    peer: &Peer,
    state: &HandshakeState,
    config: &HandshakeConfig,
    capabilities: ClientCapabilities,
) -> Result<InitializeResult, McpError> {
    state.set(PeerState::AwaitingPeer);

    let params = InitializeRequestParams {
        protocol_version: config.requested_version.clone(),
        capabilities,
        client_info: config.client_info.clone(),
    };
    let params_value = serde_json::to_value(params)
        .map_err(|e| McpError::ArgumentError(format!("failed to encode initialize params: {e}")))?;

    let response = peer.send_request_unchecked(methods::INITIALIZE, Some(params_value)).await?;
    let result: InitializeResult = serde_json::from_value(response)
        .map_err(|e| McpError::StateError(format!("malformed initialize result: {e}")))?;

    if !result.protocol_version.is_supported() {
        state.set(PeerState::ShutDown);
        peer.shutdown().await;
        return Err(McpError::UnsupportedProtocolVersion(result.protocol_version.as_str().to_string()));
    }

    peer.send_notification_unchecked(methods::INITIALIZED, None);
    state.set(PeerState::Ready);
    peer.mark_ready();
    Ok(result)
}

/// Server side: install the `initialize` request handler and the
/// `notifications/initialized` handler that flips the peer to `Ready`.
///
/// `negotiate` picks the protocol version to report back for a given
/// client-requested version (spec.md §4.3: "the server MUST respond with a
/// version it supports, ideally the one requested"). `build_result` builds
/// the rest of the response (capabilities/server info/instructions) from
/// the negotiated version and the client's declared capabilities.
pub fn install_server_handshake<N, B>(
    peer: &Peer,
    state: Arc<HandshakeState>,
    negotiate: N,
    build_result: B,
) -> Result<(), McpError>
where
    N: Fn(&ProtocolVersion) -> ProtocolVersion + Send + Sync + 'static,
    B: Fn(ProtocolVersion, ClientCapabilities, ClientInfo) -> (ServerCapabilities, ServerInfo, Option<String>)
        + Send
        + Sync
        + 'static,
{
    state.set(PeerState::AwaitingPeer);

    let init_state = Arc::clone(&state);
    peer.register_request_handler(methods::INITIALIZE, move |params| {
        let negotiate = &negotiate;
        let build_result = &build_result;
        let result = (|| {
            let params: InitializeRequestParams = serde_json::from_value(params.unwrap_or(Value::Null))
                .map_err(|e| ProtocolError::InvalidParams { message: e.to_string() })?;
            let negotiated = negotiate(&params.protocol_version);
            let (capabilities, server_info, instructions) =
                build_result(negotiated.clone(), params.capabilities, params.client_info);
            let result = InitializeResult {
                protocol_version: negotiated,
                capabilities,
                server_info,
                instructions,
            };
            serde_json::to_value(result).map_err(|e| ProtocolError::Internal { message: e.to_string() })
        })();
        async move { result }
    })?;

    let ready_peer = peer.clone();
    peer.register_notification_handler(methods::INITIALIZED, move |_params| {
        init_state.set(PeerState::Ready);
        ready_peer.mark_ready();
        async move {}
    })?;

    Ok(())
}
