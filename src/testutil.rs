// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! In-process fakes shared by the unit tests: a scripted server end of
//! a duplex pipe and ready-made sessions wired to an auto-responder.

use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use lsp_types::ServerCapabilities;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::rpc::{RpcConnection, protocol};
use crate::session::ActiveServer;

/// The server side of an in-process connection pipe.
pub struct ServerEnd {
    stream: DuplexStream,
    buffer: BytesMut,
}

impl ServerEnd {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Reads the next framed message, or `None` once the client closed.
    pub async fn try_recv(&mut self) -> Option<Value> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Ok(Some(raw)) = protocol::try_parse_message(&mut self.buffer) {
                return serde_json::from_str(&raw).ok();
            }
            match self.stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Reads the next framed message, panicking if the pipe closed.
    pub async fn recv(&mut self) -> Value {
        match self.try_recv().await {
            Some(value) => value,
            None => panic!("server end closed before a message arrived"),
        }
    }

    /// Writes one framed message to the client.
    pub async fn send(&mut self, value: &Value) {
        let body = value.to_string();
        let framed = protocol::frame_message(&body);
        self.stream
            .write_all(framed.as_bytes())
            .await
            .unwrap_or_else(|e| panic!("server end write failed: {e}"));
        let _ = self.stream.flush().await;
    }
}

/// Log of traffic the auto-responder observed, plus its task handle.
pub struct Responder {
    /// `(method, params)` of every notification received.
    pub notifications: Arc<Mutex<Vec<(String, Value)>>>,
    /// Methods of every request received.
    pub requests: Arc<Mutex<Vec<String>>>,
    _task: tokio::task::JoinHandle<()>,
}

impl Responder {
    /// Notifications received so far for `method`.
    pub fn notifications_for(&self, method: &str) -> Vec<Value> {
        self.notifications
            .lock()
            .map(|log| {
                log.iter()
                    .filter(|(m, _)| m == method)
                    .map(|(_, params)| params.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Drives a [`ServerEnd`]: answers every request with `null` (an empty
/// capability set for `initialize`) and records all traffic.
pub fn spawn_responder(mut server: ServerEnd) -> Responder {
    let notifications = Arc::new(Mutex::new(Vec::new()));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let notifications_log = notifications.clone();
    let requests_log = requests.clone();
    let task = tokio::spawn(async move {
        while let Some(message) = server.try_recv().await {
            let method = message
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            if let Some(id) = message.get("id") {
                if let Ok(mut log) = requests_log.lock() {
                    log.push(method.clone());
                }
                let result = if method == "initialize" {
                    serde_json::json!({ "capabilities": {} })
                } else {
                    Value::Null
                };
                server
                    .send(&serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": result
                    }))
                    .await;
            } else if let Ok(mut log) = notifications_log.lock() {
                log.push((method, message.get("params").cloned().unwrap_or(Value::Null)));
            }
        }
    });

    Responder {
        notifications,
        requests,
        _task: task,
    }
}

/// Builds a connection whose server side is an auto-responder.
pub fn responder_connection() -> (RpcConnection, Responder) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let connection = RpcConnection::new(client_read, client_write);
    let responder = spawn_responder(ServerEnd::new(server_io));
    (connection, responder)
}

/// A ready-made session for `root`, backed by an auto-responder.
pub async fn fake_session(root: &Path) -> (Arc<ActiveServer>, Responder) {
    let (connection, responder) = responder_connection();
    let session = ActiveServer::new(
        root,
        None,
        Arc::new(connection),
        ServerCapabilities::default(),
    );
    (Arc::new(session), responder)
}
