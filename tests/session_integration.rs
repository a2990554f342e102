// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Integration tests against the bundled mock language server.
//!
//! Every test spawns the real `mockls` binary over stdio, so the full
//! path is exercised: process launch, framing, the initialize
//! handshake, request correlation, and teardown.

#![allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use trestle::capabilities::{ServerFeature, supports};
use trestle::document::{DocumentHandle, DocumentId};
use trestle::error::Error;
use trestle::launch::{ServerOptions, launch_stdio};
use trestle::manager::{DocumentFilter, PathFilter, ServerManager, SpawnFn, SpawnFuture};
use trestle::session::ActiveServer;

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn mockls_options(args: &[&str]) -> ServerOptions {
    ServerOptions {
        command: env!("CARGO_BIN_EXE_mockls").to_string(),
        args: args.iter().map(ToString::to_string).collect(),
        ..ServerOptions::default()
    }
}

async fn launch_mockls(root: &Path, args: &[&str]) -> ActiveServer {
    launch_stdio(root, &mockls_options(args)).await.unwrap()
}

async fn teardown(session: &ActiveServer) {
    let _: Result<serde_json::Value, _> = session
        .connection()
        .request("shutdown", serde_json::Value::Null)
        .await;
    let _ = session.connection().notify("exit", serde_json::Value::Null).await;
    session.kill_process().await;
}

#[tokio::test]
async fn test_handshake_captures_capability_snapshot() {
    init_tracing();
    let dir = tempdir().unwrap();
    let session = launch_mockls(dir.path(), &[]).await;

    assert!(supports(session.capabilities(), ServerFeature::Hover));
    assert!(supports(session.capabilities(), ServerFeature::Definition));
    assert!(supports(session.capabilities(), ServerFeature::References));
    assert!(!supports(session.capabilities(), ServerFeature::Rename));

    teardown(&session).await;
}

#[tokio::test]
async fn test_minimal_capabilities_gate_everything_off() {
    init_tracing();
    let dir = tempdir().unwrap();
    let session = launch_mockls(dir.path(), &["--minimal-capabilities"]).await;

    assert!(!supports(session.capabilities(), ServerFeature::Hover));
    assert!(!supports(session.capabilities(), ServerFeature::Definition));

    teardown(&session).await;
}

#[tokio::test]
async fn test_server_error_surfaces_as_request_failed() {
    init_tracing();
    let dir = tempdir().unwrap();
    let session = launch_mockls(dir.path(), &["--fail-on", "textDocument/hover"]).await;

    let outcome: Result<serde_json::Value, _> = session
        .connection()
        .request("textDocument/hover", serde_json::json!({}))
        .await;

    match outcome {
        Err(Error::RequestFailed { method, code, .. }) => {
            assert_eq!(method, "textDocument/hover");
            assert_eq!(code, -32603);
        }
        other => panic!("expected RequestFailed, got {other:?}"),
    }

    teardown(&session).await;
}

#[tokio::test]
async fn test_cancellation_token_aborts_hung_request() {
    init_tracing();
    let dir = tempdir().unwrap();
    let session = launch_mockls(dir.path(), &["--hang-on", "textDocument/hover"]).await;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let outcome: Result<serde_json::Value, _> = session
        .connection()
        .request_with_token("textDocument/hover", serde_json::json!({}), &token)
        .await;

    match outcome {
        Err(e) => assert!(e.is_cancelled(), "expected cancellation, got {e:?}"),
        Ok(v) => panic!("hung request unexpectedly resolved: {v:?}"),
    }

    teardown(&session).await;
}

#[tokio::test]
async fn test_server_crash_emits_close_event() {
    init_tracing();
    let dir = tempdir().unwrap();
    // Response 1 is the initialize reply, response 2 triggers the exit.
    let session = launch_mockls(dir.path(), &["--drop-after", "2"]).await;

    let _: Result<serde_json::Value, _> = session
        .connection()
        .request("textDocument/hover", serde_json::json!({}))
        .await;

    tokio::time::timeout(Duration::from_secs(5), session.connection().wait_closed())
        .await
        .unwrap();
    assert!(!session.connection().is_connected());

    let late: Result<serde_json::Value, _> = session
        .connection()
        .request("textDocument/hover", serde_json::json!({}))
        .await;
    assert!(matches!(late, Err(Error::Disconnected)));

    session.kill_process().await;
}

#[tokio::test]
async fn test_manager_end_to_end_lifecycle() {
    init_tracing();
    let dir = tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let spawn: SpawnFn = Arc::new(move |root: PathBuf| {
        Box::pin(async move { Ok(launch_stdio(&root, &mockls_options(&[])).await?) })
            as SpawnFuture
    });
    let docs: DocumentFilter = Arc::new(|_: &DocumentHandle| true);
    let paths: PathFilter = Arc::new(|_: &Path| true);
    let manager = ServerManager::new(spawn, docs, paths);
    manager.set_project_roots(std::slice::from_ref(&root)).await;

    let file = root.join("demo.txt");
    let document = DocumentHandle::new(DocumentId(1), &file, "plain");
    let session = manager.get_session(&document, true).await.unwrap().unwrap();
    assert!(supports(session.capabilities(), ServerFeature::Hover));

    // Stop goes through the real shutdown/exit exchange; the child's
    // exit closes its stdout and the connection observes it.
    manager.stop_server(&session).await;
    tokio::time::timeout(Duration::from_secs(5), session.connection().wait_closed())
        .await
        .unwrap();
    assert!(manager.get_active_servers().await.is_empty());
}
