//! Request/response correlation: the pending-response table behind
//! `Peer::send_request` (spec.md §4.2, component C2).

pub mod manager;

pub use manager::{CorrelationConfig, CorrelationManager};
