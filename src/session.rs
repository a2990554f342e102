// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! One running language server: process, connection, capabilities.
//!
//! An [`ActiveServer`] bundles everything the manager tracks per
//! project root. It is created by the spawn callback after the
//! `initialize` handshake resolved, so its capabilities snapshot is
//! populated and immutable before any adapter can see the session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use lsp_types::ServerCapabilities;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::rpc::RpcConnection;

/// Cleanup action registered on a session.
///
/// The disposables set is a scoped-resource registry, not a stack: at
/// teardown every entry runs exactly once, and order carries no
/// rollback meaning.
pub type Disposable = Box<dyn FnOnce() + Send>;

/// A live language-server session bound to one project root.
pub struct ActiveServer {
    project_root: PathBuf,
    process: Mutex<Option<Child>>,
    connection: Arc<RpcConnection>,
    capabilities: ServerCapabilities,
    disposables: StdMutex<Vec<Disposable>>,
}

impl ActiveServer {
    /// Builds a session from an already-initialized connection.
    ///
    /// `process` is `None` for transports that do not own a child
    /// process (sockets, in-process test pipes).
    #[must_use]
    pub fn new(
        project_root: &Path,
        process: Option<Child>,
        connection: Arc<RpcConnection>,
        capabilities: ServerCapabilities,
    ) -> Self {
        Self {
            project_root: normalize_root(project_root),
            process: Mutex::new(process),
            connection,
            capabilities,
            disposables: StdMutex::new(Vec::new()),
        }
    }

    /// The normalized project root this session is scoped to.
    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// The RPC connection bound 1:1 to this session's process.
    #[must_use]
    pub fn connection(&self) -> &Arc<RpcConnection> {
        &self.connection
    }

    /// The capability snapshot from the `initialize` handshake.
    /// Recorded once at construction; never mutated.
    #[must_use]
    pub const fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// True if `path` lives under this session's project root.
    #[must_use]
    pub fn owns_path(&self, path: &Path) -> bool {
        path.starts_with(&self.project_root)
    }

    /// Registers a cleanup action to run at teardown.
    pub fn add_disposable(&self, disposable: Disposable) {
        if let Ok(mut set) = self.disposables.lock() {
            set.push(disposable);
        }
    }

    /// Runs and clears every registered disposable.
    pub fn dispose_all(&self) {
        let drained = match self.disposables.lock() {
            Ok(mut set) => set.drain(..).collect::<Vec<_>>(),
            Err(_) => return,
        };
        debug!(root = %self.project_root.display(), count = drained.len(),
            "disposing session resources");
        for disposable in drained {
            disposable();
        }
    }

    /// Kills the server process, if this session owns one. Best effort:
    /// failures are logged, never propagated.
    pub async fn kill_process(&self) {
        let mut guard = self.process.lock().await;
        if let Some(mut child) = guard.take()
            && let Err(e) = child.kill().await
        {
            warn!(root = %self.project_root.display(), "failed to kill server process: {e}");
        }
    }
}

impl std::fmt::Debug for ActiveServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveServer")
            .field("project_root", &self.project_root)
            .field("connected", &self.connection.is_connected())
            .finish_non_exhaustive()
    }
}

/// Normalizes a project root to a trailing-separator form, the
/// canonical partition key for session routing.
#[must_use]
pub fn normalize_root(root: &Path) -> PathBuf {
    let text = root.to_string_lossy();
    if text.ends_with(std::path::MAIN_SEPARATOR) {
        root.to_path_buf()
    } else {
        PathBuf::from(format!("{text}{}", std::path::MAIN_SEPARATOR))
    }
}
