//! `Peer`: the transport-agnostic request/response/notification engine.
//!
//! One `Peer` owns one `Transport` for its whole lifetime, via a background
//! task that both reads inbound lines and serializes outbound writes. Public
//! methods talk to that task only through channels and shared state — never
//! by touching the transport directly — so `Peer` itself is `Clone` and may
//! be handed to every capability module that needs to send or receive.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::correlation::{CorrelationConfig, CorrelationManager};
use crate::progress::{ProgressEvent, ProgressRegistry, ProgressStream};
use crate::protocol::{
    methods, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpError,
    ProgressToken, ProtocolError, RequestId,
};
use crate::transport::{LineDirection, ProtocolLogSink, Transport};

pub type RequestHandlerFn =
    dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, ProtocolError>> + Send + Sync;
pub type NotificationHandlerFn = dyn Fn(Option<Value>) -> BoxFuture<'static, ()> + Send + Sync;

/// Tuning knobs for a `Peer`. Currently just the correlation table's
/// capacity; grows as other per-peer limits (max frame size, etc.) are
/// wired up.
#[derive(Debug, Clone, Default)]
pub struct PeerConfig {
    pub correlation: CorrelationConfig,
}

struct PeerInner {
    outbound_tx: mpsc::UnboundedSender<String>,
    correlation: CorrelationManager,
    progress: ProgressRegistry,
    request_handlers: DashMap<String, Arc<RequestHandlerFn>>,
    notification_handlers: DashMap<String, Arc<NotificationHandlerFn>>,
    ready: AtomicBool,
    shutting_down: AtomicBool,
    shutdown_notify: Notify,
    log_sink: Option<Arc<dyn ProtocolLogSink>>,
    io_task: Mutex<Option<JoinHandle<()>>>,
    /// Inbound request ids the remote has cancelled via
    /// `notifications/cancelled` (spec.md §5). Checked right before a
    /// completed handler's response would be sent; a cancelled id's
    /// response is dropped instead, since recipients "MUST NOT reply after
    /// cancellation".
    cancelled_inbound: DashMap<RequestId, ()>,
}

/// A handle to one end of a live JSON-RPC connection.
///
/// Cheap to clone: every clone shares the same pending-request table,
/// handler registries, and background I/O task.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    /// Take ownership of `transport` and start its background read/write loop.
    pub fn spawn<T: Transport + 'static>(
        transport: T,
        config: PeerConfig,
        log_sink: Option<Arc<dyn ProtocolLogSink>>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PeerInner {
            outbound_tx,
            correlation: CorrelationManager::new(config.correlation),
            progress: ProgressRegistry::new(),
            request_handlers: DashMap::new(),
            notification_handlers: DashMap::new(),
            ready: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            log_sink,
            io_task: Mutex::new(None),
            cancelled_inbound: DashMap::new(),
        });

        let loop_inner = Arc::clone(&inner);
        let task = tokio::spawn(async move { run_io_loop(transport, outbound_rx, loop_inner).await });
        if let Ok(mut slot) = inner.io_task.try_lock() {
            *slot = Some(task);
        }

        Self { inner }
    }

    /// Whether `initialize`/`initialized` has completed for this peer.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Called by the handshake once the initialize/initialized exchange
    /// completes, unblocking ordinary `send_request`/`send_notification`.
    pub(crate) fn mark_ready(&self) {
        self.inner.ready.store(true, Ordering::Release);
    }

    /// Register a handler for an inbound request method. Re-registering the
    /// same method is a programming error, reported as `McpError::StateError`
    /// rather than a panic.
    pub fn register_request_handler<F, Fut>(&self, method: impl Into<String>, handler: F) -> Result<(), McpError>
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ProtocolError>> + Send + 'static,
    {
        let method = method.into();
        let boxed: Arc<RequestHandlerFn> = Arc::new(move |params| Box::pin(handler(params)));
        if self.inner.request_handlers.insert(method.clone(), boxed).is_some() {
            return Err(McpError::StateError(format!(
                "request handler already registered for {method}"
            )));
        }
        Ok(())
    }

    /// Register a handler for an inbound notification method.
    pub fn register_notification_handler<F, Fut>(&self, method: impl Into<String>, handler: F) -> Result<(), McpError>
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let method = method.into();
        let boxed: Arc<NotificationHandlerFn> = Arc::new(move |params| Box::pin(handler(params)));
        if self.inner.notification_handlers.insert(method.clone(), boxed).is_some() {
            return Err(McpError::StateError(format!(
                "notification handler already registered for {method}"
            )));
        }
        Ok(())
    }

    /// Send a request and await its matching response. Fails immediately
    /// (without touching the transport) if the peer is shut down, or if the
    /// handshake has not completed yet.
    pub async fn send_request(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value, McpError> {
        self.send_request_inner(method, params, true).await
    }

    /// Bypasses the readiness gate. Used only by the handshake to send its
    /// own `initialize` request before the peer is marked ready.
    pub(crate) async fn send_request_unchecked(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value, McpError> {
        self.send_request_inner(method, params, false).await
    }

    async fn send_request_inner(&self, method: impl Into<String>, params: Option<Value>, require_ready: bool) -> Result<Value, McpError> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(McpError::TransportClosed);
        }
        if require_ready && !self.inner.ready.load(Ordering::Acquire) {
            return Err(McpError::StateError(
                "peer is not ready: handshake has not completed".to_string(),
            ));
        }
        let method = method.into();
        let id = self.inner.correlation.next_request_id();
        let request = JsonRpcRequest::new(method, params, id.clone());
        let progress_token = request.progress_token();
        let rx = self.inner.correlation.register(id.clone())?;
        let line = JsonRpcMessage::Request(request)
            .to_line()
            .map_err(|e| McpError::ArgumentError(format!("failed to encode request: {e}")))?;
        self.inner
            .outbound_tx
            .send(line)
            .map_err(|_| McpError::TransportClosed)?;

        let outcome = match rx.await {
            Ok(Ok(response)) => Ok(response.result.unwrap_or(Value::Null)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(McpError::TransportClosed),
        };
        if let Some(token) = progress_token {
            self.inner.progress.close(&token);
        }
        outcome
    }

    /// Send a notification. Best-effort: silently does nothing if the peer
    /// is shut down or not yet ready.
    pub fn send_notification(&self, method: impl Into<String>, params: Option<Value>) {
        self.send_notification_inner(method, params, true);
    }

    /// Bypasses the readiness gate. Used by the handshake to send
    /// `notifications/initialized`.
    pub(crate) fn send_notification_unchecked(&self, method: impl Into<String>, params: Option<Value>) {
        self.send_notification_inner(method, params, false);
    }

    fn send_notification_inner(&self, method: impl Into<String>, params: Option<Value>, require_ready: bool) {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return;
        }
        if require_ready && !self.inner.ready.load(Ordering::Acquire) {
            return;
        }
        let note = JsonRpcNotification::new(method, params);
        if let Ok(line) = JsonRpcMessage::Notification(note).to_line() {
            let _ = self.inner.outbound_tx.send(line);
        }
    }

    /// Emit a `notifications/progress` update for `token`. Any number of
    /// progress notifications may be sent while the originating request is
    /// in flight; the receiving side drops them if it never subscribed.
    pub fn send_progress(&self, token: ProgressToken, progress: f64, total: Option<f64>, message: Option<String>) {
        let params = serde_json::json!({
            "progressToken": token,
            "progress": progress,
            "total": total,
            "message": message,
        });
        self.send_notification(methods::PROGRESS, Some(params));
    }

    /// Open the progress stream for `request`, which must carry
    /// `_meta.progressToken`. The stream closes when `request`'s response
    /// arrives (or immediately, if it already has).
    pub fn on_progress(&self, request: &JsonRpcRequest) -> Result<ProgressStream, McpError> {
        let token = request
            .progress_token()
            .ok_or_else(|| McpError::ArgumentError("request has no _meta.progressToken".to_string()))?;
        Ok(self.inner.progress.open(token))
    }

    /// Cancel an outbound request in flight: sends `notifications/cancelled`
    /// to the remote (best-effort) and locally forgets the pending entry, so
    /// a response that arrives afterward is dropped as unmatched rather than
    /// resolving the caller's already-abandoned future. Per spec.md §5,
    /// callers MUST NOT use this for `initialize`.
    pub fn cancel_request(&self, id: RequestId, reason: Option<String>) {
        self.inner.correlation.forget(&id);
        let params = serde_json::json!({ "requestId": id, "reason": reason });
        self.send_notification(methods::CANCELLED, Some(params));
    }

    /// Send `ping` and wait up to `timeout` for a reply. A reply that
    /// arrives after the timeout is discarded like any other late response.
    pub async fn ping(&self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.send_request(methods::PING, None)).await,
            Ok(Ok(_))
        )
    }

    /// Fail every pending request, close every progress stream, and close
    /// the underlying transport. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.correlation.fail_all();
        self.inner.progress.close_all();
        self.inner.shutdown_notify.notify_one();
        let task = self.inner.io_task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn run_io_loop<T: Transport>(
    mut transport: T,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inner: Arc<PeerInner>,
) {
    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown_notify.notified() => {
                let _ = transport.close().await;
                break;
            }
            maybe_line = transport.receive_line() => {
                match maybe_line {
                    Ok(Some(line)) => {
                        if let Some(sink) = &inner.log_sink {
                            sink.on_line(LineDirection::Inbound, &line);
                        }
                        let dispatch_inner = Arc::clone(&inner);
                        tokio::spawn(async move { dispatch_line(dispatch_inner, line).await });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "transport read failed, shutting down peer");
                        break;
                    }
                }
            }
            Some(line) = outbound_rx.recv() => {
                if let Some(sink) = &inner.log_sink {
                    sink.on_line(LineDirection::Outbound, &line);
                }
                if let Err(e) = transport.send_line(&line).await {
                    warn!(error = %e, "transport write failed, shutting down peer");
                    break;
                }
            }
        }
    }
    inner.shutting_down.store(true, Ordering::Release);
    inner.correlation.fail_all();
    inner.progress.close_all();
    // Handlers commonly close over an `Arc` back to the module that installed
    // them, which itself holds this `Peer` — drop the registries so that
    // cycle unwinds once the last `Peer` clone goes out of scope.
    inner.request_handlers.clear();
    inner.notification_handlers.clear();
    inner.cancelled_inbound.clear();
}

async fn dispatch_line(inner: Arc<PeerInner>, line: String) {
    let message = match JsonRpcMessage::from_line(&line) {
        Ok(message) => message,
        Err(e) => {
            let err = ProtocolError::from(e);
            send_response(&inner, JsonRpcResponse::error(err.to_error_object(), None));
            return;
        }
    };
    match message {
        JsonRpcMessage::Request(req) => handle_request(&inner, req).await,
        JsonRpcMessage::Notification(note) => handle_notification(&inner, note).await,
        JsonRpcMessage::Response(resp) => handle_response(&inner, resp),
    }
}

fn send_response(inner: &Arc<PeerInner>, response: JsonRpcResponse) {
    if let Ok(line) = JsonRpcMessage::Response(response).to_line() {
        let _ = inner.outbound_tx.send(line);
    }
}

async fn handle_request(inner: &Arc<PeerInner>, req: JsonRpcRequest) {
    let handler = inner.request_handlers.get(&req.method).map(|h| Arc::clone(h.value()));
    let response = match handler {
        Some(handler) => match handler(req.params.clone()).await {
            Ok(value) => JsonRpcResponse::success(value, req.id.clone()),
            Err(e) => JsonRpcResponse::error(e.to_error_object(), Some(req.id.clone())),
        },
        // Every peer answers `ping` itself (spec.md §4.2/§6) unless a
        // handler was explicitly registered for it above.
        None if req.method == methods::PING => JsonRpcResponse::success(Value::Object(Default::default()), req.id.clone()),
        None => {
            let err = ProtocolError::MethodNotFound { method: req.method.clone() };
            JsonRpcResponse::error(err.to_error_object(), Some(req.id.clone()))
        }
    };
    // spec.md §5: recipients MUST NOT reply to a request the caller
    // cancelled while the handler was running.
    if inner.cancelled_inbound.remove(&req.id).is_some() {
        return;
    }
    send_response(inner, response);
}

async fn handle_notification(inner: &Arc<PeerInner>, note: JsonRpcNotification) {
    if note.method == methods::PROGRESS {
        handle_progress_notification(inner, note.params);
        return;
    }
    if note.method == methods::CANCELLED {
        handle_cancellation_notification(inner, note.params);
        return;
    }
    let handler = inner.notification_handlers.get(&note.method).map(|h| Arc::clone(h.value()));
    match handler {
        Some(handler) => handler(note.params).await,
        None => trace!(method = %note.method, "no handler registered for notification, ignoring"),
    }
}

fn handle_cancellation_notification(inner: &Arc<PeerInner>, params: Option<Value>) {
    let Some(params) = params else { return };
    let Some(id) = params.get("requestId").and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok()) else {
        return;
    };
    inner.cancelled_inbound.insert(id, ());
}

fn handle_progress_notification(inner: &Arc<PeerInner>, params: Option<Value>) {
    let Some(params) = params else { return };
    let Some(token) = params
        .get("progressToken")
        .and_then(|v| serde_json::from_value::<ProgressToken>(v.clone()).ok())
    else {
        return;
    };
    let progress = params.get("progress").and_then(Value::as_f64).unwrap_or(0.0);
    let total = params.get("total").and_then(Value::as_f64);
    let message = params.get("message").and_then(Value::as_str).map(str::to_string);
    inner.progress.publish(&token, ProgressEvent { progress, total, message });
}

fn handle_response(inner: &Arc<PeerInner>, resp: JsonRpcResponse) {
    let Some(id) = resp.id.as_request_id().cloned() else {
        trace!("response with no id, cannot correlate");
        return;
    };
    let result = match &resp.error {
        Some(err) => Err(McpError::from_error_value(err)),
        None => Ok(resp),
    };
    inner.correlation.resolve(&id, result);
}
