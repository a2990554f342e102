// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Typed JSON-RPC connection over one duplex byte stream.
//!
//! Wraps any `AsyncRead`/`AsyncWrite` pair (a child process's stdio, a
//! socket) and exposes the LSP message model: correlated requests,
//! fire-and-forget notifications, and per-method inbound handlers. One
//! connection is bound 1:1 to one server process for its whole life;
//! when the transport closes the connection enters a terminal
//! disconnected state and emits a single close event.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::protocol::{
    self, METHOD_NOT_FOUND, NotificationMessage, REQUEST_CANCELLED, RequestId, RequestMessage,
    ResponseError, ResponseMessage,
};
use crate::error::{Error, Result};

/// Default timeout for outbound requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler for an inbound notification.
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Handler for an inbound server-to-client request.
pub type RequestHandler =
    Arc<dyn Fn(Value) -> std::result::Result<Value, ResponseError> + Send + Sync>;

type Writer = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;
type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseMessage>>>>;

/// Per-method handler registries. Exactly one handler per method name;
/// the last registration wins.
#[derive(Default)]
struct HandlerTable {
    notifications: std::sync::Mutex<HashMap<String, NotificationHandler>>,
    requests: std::sync::Mutex<HashMap<String, RequestHandler>>,
}

impl HandlerTable {
    fn notification(&self, method: &str) -> Option<NotificationHandler> {
        self.notifications
            .lock()
            .ok()
            .and_then(|map| map.get(method).cloned())
    }

    fn request(&self, method: &str) -> Option<RequestHandler> {
        self.requests
            .lock()
            .ok()
            .and_then(|map| map.get(method).cloned())
    }
}

/// A JSON-RPC connection to one language server process.
pub struct RpcConnection {
    next_id: AtomicI64,
    writer: Writer,
    pending: PendingMap,
    handlers: Arc<HandlerTable>,
    connected: Arc<AtomicBool>,
    closed_rx: watch::Receiver<bool>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl RpcConnection {
    /// Creates a connection over the given byte streams and starts the
    /// background reader task.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        let writer: Writer = Arc::new(Mutex::new(Box::new(writer)));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let handlers = Arc::new(HandlerTable::default());
        let connected = Arc::new(AtomicBool::new(true));
        let (closed_tx, closed_rx) = watch::channel(false);

        let reader_handle = tokio::spawn(Self::reader_task(
            reader,
            writer.clone(),
            pending.clone(),
            handlers.clone(),
            connected.clone(),
            closed_tx,
        ));

        Self {
            next_id: AtomicI64::new(1),
            writer,
            pending,
            handlers,
            connected,
            closed_rx,
            _reader_handle: reader_handle,
        }
    }

    /// True until the transport reports EOF or a read error.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns a receiver that flips to `true` exactly once, when the
    /// transport closes.
    #[must_use]
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    /// Waits until the transport has closed.
    pub async fn wait_closed(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Registers the handler for an inbound notification method,
    /// replacing any previous handler for that method.
    pub fn on_notification(&self, method: &str, handler: impl Fn(Value) + Send + Sync + 'static) {
        if let Ok(mut map) = self.handlers.notifications.lock() {
            map.insert(method.to_string(), Arc::new(handler));
        }
    }

    /// Registers the handler for an inbound server-to-client request
    /// method, replacing any previous handler for that method.
    pub fn on_request(
        &self,
        method: &str,
        handler: impl Fn(Value) -> std::result::Result<Value, ResponseError> + Send + Sync + 'static,
    ) {
        if let Ok(mut map) = self.handlers.requests.lock() {
            map.insert(method.to_string(), Arc::new(handler));
        }
    }

    /// Sends a request and awaits its response.
    ///
    /// # Errors
    ///
    /// [`Error::RequestFailed`] when the server answers with an error
    /// object, [`Error::Timeout`] after [`REQUEST_TIMEOUT`], and
    /// [`Error::Disconnected`] if the transport closes first or was
    /// already closed.
    pub async fn request<P: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R> {
        self.call(method, params, None).await
    }

    /// Sends a request that can be cancelled through `token`.
    ///
    /// If the token fires before the response arrives, the pending
    /// entry is dropped, a `$/cancelRequest` notification is sent, and
    /// the call resolves with [`Error::Cancelled`].
    ///
    /// # Errors
    ///
    /// As [`RpcConnection::request`], plus [`Error::Cancelled`].
    pub async fn request_with_token<P: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: P,
        token: &CancellationToken,
    ) -> Result<R> {
        self.call(method, params, Some(token)).await
    }

    /// Sends a notification. Fire and forget: no acknowledgement.
    ///
    /// # Errors
    ///
    /// [`Error::Disconnected`] if the connection already closed or the
    /// write fails.
    pub async fn notify<P: serde::Serialize>(&self, method: &str, params: P) -> Result<()> {
        if !self.is_connected() {
            warn!(method, "notify on closed connection");
            return Err(Error::Disconnected);
        }

        let params = serde_json::to_value(params).map_err(|e| Error::payload(method, &e))?;
        let message = NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };
        trace!(method, "sending notification");
        Self::write_message(&self.writer, &message)
            .await
            .map_err(|_| Error::Disconnected)
    }

    async fn call<P: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: P,
        token: Option<&CancellationToken>,
    ) -> Result<R> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let params = serde_json::to_value(params).map_err(|e| Error::payload(method, &e))?;
        let request = RequestMessage {
            jsonrpc: "2.0".to_string(),
            id: id.clone(),
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let started = Instant::now();
        if Self::write_message(&self.writer, &request).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::Disconnected);
        }

        let response = tokio::select! {
            () = cancelled_signal(token) => {
                self.pending.lock().await.remove(&id);
                let _ = self
                    .notify("$/cancelRequest", serde_json::json!({ "id": id }))
                    .await;
                debug!(method, elapsed_ms = started.elapsed().as_millis() as u64,
                    "request cancelled");
                return Err(Error::Cancelled { method: method.to_string() });
            }
            outcome = tokio::time::timeout(REQUEST_TIMEOUT, rx) => match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(_)) => {
                    // Sender dropped: the reader task drained pending on close.
                    return Err(Error::Disconnected);
                }
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    return Err(Error::Timeout {
                        method: method.to_string(),
                        timeout_secs: REQUEST_TIMEOUT.as_secs(),
                    });
                }
            },
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let Some(err) = response.error {
            if err.code == REQUEST_CANCELLED {
                debug!(method, elapsed_ms, "request cancelled by server");
                return Err(Error::Cancelled {
                    method: method.to_string(),
                });
            }
            debug!(method, elapsed_ms, code = err.code, "request failed");
            return Err(Error::RequestFailed {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }

        debug!(method, elapsed_ms, "request completed");

        // Missing result is treated as JSON null, matching servers that
        // omit the field for void responses.
        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| Error::payload(method, &e))
    }

    async fn write_message<T: serde::Serialize>(writer: &Writer, message: &T) -> Result<()> {
        let body =
            serde_json::to_string(message).map_err(|e| Error::payload("<serialize>", &e))?;
        let framed = protocol::frame_message(&body);
        trace!(bytes = framed.len(), "writing message");

        let mut guard = writer.lock().await;
        guard
            .write_all(framed.as_bytes())
            .await
            .map_err(|_| Error::Disconnected)?;
        guard.flush().await.map_err(|_| Error::Disconnected)
    }

    /// Background task: reads framed messages and routes them to
    /// pending requests and registered handlers until the transport
    /// closes.
    async fn reader_task(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: Writer,
        pending: PendingMap,
        handlers: Arc<HandlerTable>,
        connected: Arc<AtomicBool>,
        closed_tx: watch::Sender<bool>,
    ) {
        let mut reader = BufReader::new(reader);
        let mut buffer = BytesMut::with_capacity(8192);
        let mut chunk = [0u8; 4096];

        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    debug!("server transport closed");
                    break;
                }
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    error!("error reading from server transport: {e}");
                    break;
                }
            }

            while let Ok(Some(raw)) = protocol::try_parse_message(&mut buffer) {
                trace!(message = %raw, "received message");
                let value: Value = match serde_json::from_str(&raw) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("discarding unparseable message: {e}");
                        continue;
                    }
                };

                Self::dispatch(value, &writer, &pending, &handlers).await;
            }
        }

        connected.store(false, Ordering::SeqCst);
        // Fail every outstanding request by dropping its sender.
        pending.lock().await.clear();
        let _ = closed_tx.send(true);
    }

    async fn dispatch(
        value: Value,
        writer: &Writer,
        pending: &PendingMap,
        handlers: &Arc<HandlerTable>,
    ) {
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some();

        match (has_method, has_id) {
            // Server-to-client request.
            (true, true) => {
                if let Ok(request) = serde_json::from_value::<RequestMessage>(value) {
                    Self::answer_server_request(request, writer, handlers).await;
                }
            }
            // Notification.
            (true, false) => {
                if let Ok(notification) = serde_json::from_value::<NotificationMessage>(value) {
                    if let Some(handler) = handlers.notification(&notification.method) {
                        handler(notification.params);
                    } else {
                        // The only soft-failure surface for protocol
                        // drift between client and server.
                        warn!(method = %notification.method, "unhandled notification");
                    }
                }
            }
            // Response to one of our requests.
            (false, true) => {
                if let Ok(response) = serde_json::from_value::<ResponseMessage>(value)
                    && let Some(id) = &response.id
                {
                    if let Some(sender) = pending.lock().await.remove(id) {
                        let _ = sender.send(response);
                    } else {
                        warn!(?id, "response for unknown or cancelled request");
                    }
                }
            }
            (false, false) => {
                warn!("message with neither method nor id");
            }
        }
    }

    async fn answer_server_request(
        request: RequestMessage,
        writer: &Writer,
        handlers: &Arc<HandlerTable>,
    ) {
        debug!(method = %request.method, id = ?request.id, "server request");

        let outcome = handlers.request(&request.method).map_or_else(
            || {
                Err(ResponseError {
                    code: METHOD_NOT_FOUND,
                    message: format!("method '{}' not supported by client", request.method),
                    data: None,
                })
            },
            |handler| handler(request.params),
        );

        let response = match outcome {
            Ok(result) => ResponseMessage {
                jsonrpc: "2.0".to_string(),
                id: Some(request.id),
                result: Some(result),
                error: None,
            },
            Err(err) => ResponseMessage {
                jsonrpc: "2.0".to_string(),
                id: Some(request.id),
                result: None,
                error: Some(err),
            },
        };

        if let Err(e) = Self::write_message(writer, &response).await {
            warn!(method = %request.method, "failed to answer server request: {e}");
        }
    }
}

async fn cancelled_signal(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
