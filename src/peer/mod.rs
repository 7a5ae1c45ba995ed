//! The symmetric request/response/notification engine (spec.md §4.2,
//! component C2) that `Client` and `Server` are built on top of.

pub mod handshake;
#[allow(clippy::module_inception)]
pub mod peer;

pub use handshake::{HandshakeConfig, HandshakeRole, PeerState};
pub use peer::{NotificationHandlerFn, Peer, PeerConfig, RequestHandlerFn};
