// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Process launch and the LSP initialize handshake.
//!
//! [`launch_stdio`] is the standard spawn callback: it starts the
//! configured binary with piped stdio, wires an [`RpcConnection`] over
//! the child's pipes, performs `initialize`/`initialized`, and hands
//! back an [`ActiveServer`] carrying the capability snapshot.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use lsp_types::{
    ClientCapabilities, InitializeParams, InitializeResult, InitializedParams,
    PositionEncodingKind, WorkspaceFolder,
};
use tokio::process::Command;
use tracing::{debug, info};

use crate::rpc::RpcConnection;
use crate::session::ActiveServer;
use crate::watch::path_to_uri;

/// How to start a language server for a project root.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Binary to execute.
    pub command: String,
    /// Arguments passed to the binary.
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    pub env: HashMap<String, String>,
    /// Server-specific `initializationOptions` payload.
    pub initialization_options: Option<serde_json::Value>,
}

/// Spawns the server over stdio and runs the initialize handshake.
///
/// The child's working directory is the project root, stderr is
/// inherited so server logs land in the host's stream, and the
/// returned session owns the child handle for teardown.
///
/// # Errors
///
/// Fails when the binary cannot be spawned, the root has no file URI,
/// or the `initialize` exchange fails or times out.
pub async fn launch_stdio(root: &Path, options: &ServerOptions) -> Result<ActiveServer> {
    info!(command = %options.command, root = %root.display(), "spawning language server");

    let mut child = Command::new(&options.command)
        .args(&options.args)
        .envs(&options.env)
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn language server: {}", options.command))?;

    let stdin = child
        .stdin
        .take()
        .context("language server stdin not captured")?;
    let stdout = child
        .stdout
        .take()
        .context("language server stdout not captured")?;

    let connection = Arc::new(RpcConnection::new(stdout, stdin));
    let capabilities = initialize(&connection, root, options.initialization_options.clone())
        .await
        .with_context(|| format!("initialize handshake failed for {}", options.command))?;

    Ok(ActiveServer::new(root, Some(child), connection, capabilities))
}

/// Performs the `initialize` request and `initialized` notification,
/// returning the server's advertised capabilities.
async fn initialize(
    connection: &RpcConnection,
    root: &Path,
    initialization_options: Option<serde_json::Value>,
) -> Result<lsp_types::ServerCapabilities> {
    let root_uri = path_to_uri(root).context("project root has no file URI")?;

    let params = InitializeParams {
        process_id: Some(std::process::id()),
        initialization_options,
        capabilities: ClientCapabilities {
            general: Some(lsp_types::GeneralClientCapabilities {
                position_encodings: Some(vec![
                    PositionEncodingKind::UTF8,
                    PositionEncodingKind::UTF16,
                ]),
                ..Default::default()
            }),
            workspace: Some(lsp_types::WorkspaceClientCapabilities {
                did_change_watched_files: Some(
                    lsp_types::DidChangeWatchedFilesClientCapabilities {
                        dynamic_registration: Some(false),
                        relative_pattern_support: Some(false),
                    },
                ),
                ..Default::default()
            }),
            ..Default::default()
        },
        workspace_folders: Some(vec![WorkspaceFolder {
            uri: root_uri,
            name: root
                .file_name()
                .map_or_else(|| "workspace".to_string(), |s| s.to_string_lossy().to_string()),
        }]),
        ..Default::default()
    };

    let result: InitializeResult = connection.request("initialize", params).await?;
    debug!(
        encoding = ?result.capabilities.position_encoding,
        "language server initialized"
    );

    connection.notify("initialized", InitializedParams {}).await?;

    Ok(result.capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[tokio::test]
    async fn test_initialize_handshake_order_and_payload() {
        let (connection, responder) = testutil::responder_connection();

        let capabilities = initialize(&connection, Path::new("/proj/demo"), None)
            .await
            .unwrap();
        assert_eq!(capabilities, lsp_types::ServerCapabilities::default());

        // Let the responder task drain the pipe before inspecting logs.
        tokio::task::yield_now().await;

        // Request then notification, in that order.
        let requests = responder.requests.lock().unwrap().clone();
        assert_eq!(requests, vec!["initialize".to_string()]);
        let initialized = responder.notifications_for("initialized");
        assert_eq!(initialized.len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_advertises_workspace_folder() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let connection = RpcConnection::new(client_read, client_write);
        let mut server = testutil::ServerEnd::new(server_io);

        let handshake = tokio::spawn(async move {
            initialize(&connection, Path::new("/proj/demo"), None).await
        });

        let request = server.recv().await;
        assert_eq!(request["method"], "initialize");
        let folders = request["params"]["workspaceFolders"].as_array().unwrap();
        assert_eq!(folders[0]["uri"], "file:///proj/demo");
        assert_eq!(folders[0]["name"], "demo");
        let encodings = request["params"]["capabilities"]["general"]["positionEncodings"]
            .as_array()
            .unwrap();
        assert_eq!(encodings.len(), 2);

        server
            .send(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": { "capabilities": { "hoverProvider": true } }
            }))
            .await;

        let capabilities = handshake.await.unwrap().unwrap();
        assert_eq!(
            capabilities.hover_provider,
            Some(lsp_types::HoverProviderCapability::Simple(true))
        );
    }
}
