//! Capability modules (spec.md §4.4–§4.12).
//!
//! Each module owns its own state, registers its handlers directly on a
//! [`crate::peer::Peer`] at construction time, and exposes a `capability()`
//! method the owning `Client`/`Server` calls while building its half of the
//! `initialize` exchange. This is the concrete form of the "ordered list of
//! module installers" re-architecture note in spec.md §9: there is no
//! `initialize` override chain, just a plain function call per module before
//! the handshake runs.

pub mod completions;
pub mod elicitation;
pub mod logging;
pub mod prompts;
pub mod resources;
pub mod roots;
pub mod roots_fallback;
pub mod roots_tracking;
pub mod sampling;
pub mod tools;

pub use completions::{CompletionProvider, CompletionsModule};
pub use elicitation::{ElicitationModule, ElicitationProvider};
pub use logging::LoggingModule;
pub use prompts::{PromptHandlerFn, PromptsModule};
pub use resources::{ResourceHandlerFn, ResourceTemplateHandlerFn, ResourcesModule};
pub use roots::RootsModule;
pub use roots_fallback::{RootsFallbackModule, RootsView};
pub use roots_tracking::RootsTrackingModule;
pub use sampling::{SamplingModule, SamplingProvider};
pub use tools::{ToolHandlerFn, ToolsModule};
