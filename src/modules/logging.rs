//! Logging module (spec.md §4.8): level-gated `notifications/message`
//! emission with lazy message evaluation.
//!
//! This is the MCP-level logging capability the *client* observes over the
//! wire — distinct from this crate's own `tracing` diagnostics (SPEC_FULL.md
//! §2.2), which never cross the peer boundary.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::peer::Peer;
use crate::protocol::{methods, LogLevel, LoggingCapability, McpError, ProtocolError};

pub struct LoggingModule {
    peer: Peer,
    level: AtomicU8,
}

impl LoggingModule {
    pub fn install(peer: Peer) -> Result<Arc<Self>, McpError> {
        let module = Arc::new(Self { peer, level: AtomicU8::new(LogLevel::Warning as u8) });

        let set_level_module = Arc::clone(&module);
        module.peer.register_request_handler(methods::LOGGING_SET_LEVEL, move |params| {
            let module = Arc::clone(&set_level_module);
            async move { module.handle_set_level(params).await }
        })?;

        Ok(module)
    }

    pub fn capability(&self) -> LoggingCapability {
        LoggingCapability {}
    }

    pub fn level(&self) -> LogLevel {
        level_from_u8(self.level.load(Ordering::Acquire))
    }

    /// Eagerly-evaluated log: `data` is serialized and sent iff `level >=`
    /// the current minimum (spec.md §4.8). `logger` names the source
    /// component; it rides in the notification params, not a separate field.
    pub fn log(&self, level: LogLevel, data: Value, logger: Option<&str>) {
        if level < self.level() {
            return;
        }
        self.emit(level, data, logger);
    }

    /// Lazily-evaluated log: `producer` runs only if `level` clears the
    /// gate, matching spec.md §4.8/§9's "evaluate only if the notification
    /// will be sent". The producer must be infallible and zero-argument by
    /// construction (the closure signature enforces this statically, unlike
    /// the source's runtime rejection of the wrong shape).
    pub fn log_lazy<F>(&self, level: LogLevel, logger: Option<&str>, producer: F)
    where
        F: FnOnce() -> Value,
    {
        if level < self.level() {
            return;
        }
        self.emit(level, producer(), logger);
    }

    fn emit(&self, level: LogLevel, data: Value, logger: Option<&str>) {
        let mut params = serde_json::json!({ "level": level, "data": data });
        if let Some(logger) = logger {
            params["logger"] = Value::String(logger.to_string());
        }
        self.peer.send_notification(methods::LOGGING_MESSAGE, Some(params));
    }

    async fn handle_set_level(&self, params: Option<Value>) -> Result<Value, ProtocolError> {
        #[derive(Deserialize)]
        struct SetLevelParams {
            level: LogLevel,
        }
        let params: SetLevelParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| ProtocolError::InvalidParams { message: e.to_string() })?;
        self.level.store(params.level as u8, Ordering::Release);
        Ok(Value::Object(Default::default()))
    }
}

fn level_from_u8(v: u8) -> LogLevel {
    match v {
        0 => LogLevel::Debug,
        1 => LogLevel::Info,
        2 => LogLevel::Notice,
        3 => LogLevel::Warning,
        4 => LogLevel::Error,
        5 => LogLevel::Critical,
        6 => LogLevel::Alert,
        _ => LogLevel::Emergency,
    }
}
