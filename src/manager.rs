// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Session lifecycle management and document routing.
//!
//! The [`ServerManager`] is the sole authority over which sessions
//! exist. It maps documents to sessions by project root, deduplicates
//! concurrent starts so at most one session per root is ever starting
//! or active, tears down sessions no document references, and rate
//! limits automatic restarts.
//!
//! All internal collections live behind one mutex and are only mutated
//! between suspension points, so correctness hinges on the ordering of
//! awaited steps: a session is always unpublished from the active map
//! before its asynchronous teardown begins.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use lsp_types::DidChangeWatchedFilesParams;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::document::{DocumentHandle, DocumentId};
use crate::error::{Error, Result};
use crate::restart::RestartTracker;
use crate::session::{ActiveServer, normalize_root};
use crate::watch::FileChange;

/// Bounded wait for the protocol `shutdown` request during teardown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Future produced by a spawn callback.
pub type SpawnFuture = Pin<Box<dyn Future<Output = anyhow::Result<ActiveServer>> + Send>>;

/// External spawn callback: given a project root, produce a live
/// process with an initialized connection and negotiated capabilities.
pub type SpawnFn = Arc<dyn Fn(PathBuf) -> SpawnFuture + Send + Sync>;

/// Decides whether a document belongs to this language integration.
pub type DocumentFilter = Arc<dyn Fn(&DocumentHandle) -> bool + Send + Sync>;

/// Decides whether a changed path is worth forwarding to a session.
pub type PathFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Outcome published to every waiter that joined a pending start.
type StartOutcome = std::result::Result<Arc<ActiveServer>, Error>;

#[derive(Default)]
struct ManagerState {
    /// Active sessions keyed by normalized project root.
    active: HashMap<PathBuf, Arc<ActiveServer>>,
    /// In-flight starts; waiters subscribe to the leader's channel.
    starting: HashMap<PathBuf, watch::Receiver<Option<StartOutcome>>>,
    /// Which session (by root) currently serves each open document.
    routes: HashMap<DocumentId, PathBuf>,
    /// Host-supplied project roots, normalized.
    project_roots: Vec<PathBuf>,
    /// False while `restart_all_servers` is quiescing.
    listening: bool,
}

/// Owns the session collection and all routing decisions.
pub struct ServerManager {
    state: Arc<Mutex<ManagerState>>,
    restarts: RestartTracker,
    spawn: SpawnFn,
    document_filter: DocumentFilter,
    change_filter: PathFilter,
}

impl ServerManager {
    /// Creates a manager around its three collaborator seams.
    #[must_use]
    pub fn new(spawn: SpawnFn, document_filter: DocumentFilter, change_filter: PathFilter) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManagerState {
                listening: true,
                ..ManagerState::default()
            })),
            restarts: RestartTracker::new(),
            spawn,
            document_filter,
            change_filter,
        }
    }

    /// Replaces the set of known project roots used for routing.
    pub async fn set_project_roots(&self, roots: &[PathBuf]) {
        let mut state = self.state.lock().await;
        state.project_roots = roots.iter().map(|r| normalize_root(r)).collect();
    }

    /// Snapshot of all currently active sessions.
    pub async fn get_active_servers(&self) -> Vec<Arc<ActiveServer>> {
        self.state.lock().await.active.values().cloned().collect()
    }

    /// Resolves the session serving `document`, optionally starting one.
    ///
    /// Routing: the document's path is matched against the known
    /// project roots by longest prefix. Pathless documents and
    /// documents outside every root resolve to `None`. An active
    /// session is returned directly; an in-flight start is joined (all
    /// joiners observe the same session or the same failure); otherwise
    /// a start happens only when `should_start` is set, the manager is
    /// listening, and the document-interest predicate accepts.
    ///
    /// # Errors
    ///
    /// [`Error::Spawn`] when a started or joined spawn fails.
    pub async fn get_session(
        &self,
        document: &DocumentHandle,
        should_start: bool,
    ) -> Result<Option<Arc<ActiveServer>>> {
        let Some(path) = document.path() else {
            return Ok(None);
        };

        let (root, pending) = {
            let mut state = self.state.lock().await;
            let Some(root) = resolve_root(path, &state.project_roots) else {
                return Ok(None);
            };

            if let Some(session) = state.active.get(&root) {
                let session = session.clone();
                state.routes.insert(document.id(), root);
                return Ok(Some(session));
            }

            if let Some(rx) = state.starting.get(&root) {
                (root, Some(rx.clone()))
            } else {
                if !(should_start && state.listening && (self.document_filter)(document)) {
                    return Ok(None);
                }
                (root, None)
            }
        };

        let session = match pending {
            Some(rx) => join_start(rx, &root).await?,
            None => self.start_server(&root).await?,
        };

        self.state.lock().await.routes.insert(document.id(), root);
        Ok(Some(session))
    }

    /// Starts (or joins the in-flight start of) a session for `root`.
    ///
    /// At most one spawn callback invocation is ever in flight per
    /// root; concurrent callers share its outcome. On failure the
    /// pending record is cleared and the error propagates to every
    /// caller that joined; no partial state is left registered.
    ///
    /// # Errors
    ///
    /// [`Error::Spawn`] when the spawn callback fails.
    pub async fn start_server(&self, root: &Path) -> Result<Arc<ActiveServer>> {
        let root = normalize_root(root);

        let leader_tx = {
            let mut state = self.state.lock().await;
            if let Some(session) = state.active.get(&root) {
                return Ok(session.clone());
            }
            if let Some(rx) = state.starting.get(&root) {
                let rx = rx.clone();
                drop(state);
                return join_start(rx, &root).await;
            }
            let (tx, rx) = watch::channel(None);
            state.starting.insert(root.clone(), rx);
            tx
        };

        info!(root = %root.display(), "starting language server");
        let mut guard = StartGuard::new(root.clone(), self.state.clone());

        let outcome: StartOutcome = match (self.spawn)(root.clone()).await {
            Ok(session) => Ok(Arc::new(session)),
            Err(e) => Err(Error::Spawn {
                root: root.clone(),
                message: format!("{e:#}"),
            }),
        };

        {
            let mut state = self.state.lock().await;
            state.starting.remove(&root);
            if let Ok(session) = &outcome {
                state.active.insert(root.clone(), session.clone());
            }
        }
        guard.disarm();

        if let Err(e) = &outcome {
            warn!(root = %root.display(), "language server start failed: {e}");
        }
        let _ = leader_tx.send(Some(outcome.clone()));
        outcome
    }

    /// Stops `session`: unpublishes it synchronously, then runs the
    /// best-effort asynchronous teardown.
    ///
    /// The session is removed from the active collection and the
    /// routing table before the first await, so no `get_session` call
    /// can observe a session that is mid-teardown. Unpublishing is
    /// identity-checked: a stale handle whose root is now served by a
    /// newer session must not displace that session, so a handle that
    /// is no longer the published entry is a no-op.
    pub async fn stop_server(&self, session: &Arc<ActiveServer>) {
        let published = {
            let mut state = self.state.lock().await;
            let root = session.project_root().to_path_buf();
            let is_current = state
                .active
                .get(&root)
                .is_some_and(|current| Arc::ptr_eq(current, session));
            if is_current {
                state.active.remove(&root);
                state.routes.retain(|_, mapped| *mapped != root);
            }
            is_current
        };

        if published {
            teardown(session).await;
        } else {
            debug!(root = %session.project_root().display(),
                "ignoring stop for a session that is no longer published");
        }
    }

    /// Drops the routing entry for a closed document, then stops any
    /// session no remaining document references.
    pub async fn document_closed(&self, id: DocumentId) {
        self.state.lock().await.routes.remove(&id);
        self.stop_unused_servers().await;
    }

    /// Stops every active session the routing table no longer
    /// references. The routing table itself is the reference set; no
    /// separate counter exists.
    pub async fn stop_unused_servers(&self) {
        let victims = {
            let mut state = self.state.lock().await;
            let referenced: HashSet<PathBuf> = state.routes.values().cloned().collect();
            let unused: Vec<PathBuf> = state
                .active
                .keys()
                .filter(|root| !referenced.contains(*root))
                .cloned()
                .collect();
            unused
                .iter()
                .filter_map(|root| state.active.remove(root))
                .collect::<Vec<_>>()
        };

        for session in victims {
            debug!(root = %session.project_root().display(), "stopping unused session");
            teardown(&session).await;
        }
    }

    /// Quiesces the whole manager: stops accepting new starts, tears
    /// down every session (including any still starting) to completion,
    /// clears the routing table, then resumes listening.
    pub async fn restart_all_servers(&self) {
        let (victims, in_flight) = {
            let mut state = self.state.lock().await;
            state.listening = false;
            state.routes.clear();
            let victims: Vec<Arc<ActiveServer>> =
                state.active.drain().map(|(_, session)| session).collect();
            let in_flight: Vec<(PathBuf, watch::Receiver<Option<StartOutcome>>)> = state
                .starting
                .iter()
                .map(|(root, rx)| (root.clone(), rx.clone()))
                .collect();
            (victims, in_flight)
        };

        info!(count = victims.len(), "restarting all language servers");
        for session in &victims {
            teardown(session).await;
        }

        // Starts that were already in flight publish into the active
        // map when they land; await them and tear those down too so no
        // pre-restart session survives.
        for (root, rx) in in_flight {
            if let Ok(session) = join_start(rx, &root).await {
                self.state.lock().await.active.remove(&root);
                teardown(&session).await;
            }
        }

        self.state.lock().await.listening = true;
    }

    /// Records a restart attempt for the session's root and reports
    /// whether the automatic-restart limit is now exceeded. The
    /// orchestrating layer consults this on unexpected process exit and
    /// must not restart once it returns `true`.
    #[must_use]
    pub fn has_reached_restart_limit(&self, session: &ActiveServer) -> bool {
        self.restarts.record_attempt(session.project_root())
    }

    /// Fans a batch of file-change events out to the active sessions.
    ///
    /// For each session the batch is filtered to paths under its root
    /// that pass the change filter; if any survive, exactly one
    /// `workspace/didChangeWatchedFiles` notification carries them all.
    pub async fn dispatch_watched_files(&self, batch: &[FileChange]) {
        for session in self.get_active_servers().await {
            let changes: Vec<lsp_types::FileEvent> = batch
                .iter()
                .filter(|change| {
                    session.owns_path(&change.path) && (self.change_filter)(&change.path)
                })
                .filter_map(|change| match change.to_file_event() {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!(path = %change.path.display(), "dropping watched-file event: {e}");
                        None
                    }
                })
                .collect();

            if changes.is_empty() {
                continue;
            }

            debug!(root = %session.project_root().display(), count = changes.len(),
                "forwarding watched-file changes");
            if let Err(e) = session
                .connection()
                .notify(
                    "workspace/didChangeWatchedFiles",
                    DidChangeWatchedFilesParams { changes },
                )
                .await
            {
                warn!(root = %session.project_root().display(),
                    "failed to forward watched-file changes: {e}");
            }
        }
    }
}

/// Best-effort session teardown. Sends `shutdown` only while the
/// connection still reports itself connected, then always proceeds to
/// disposables and process kill. Faults are logged, never propagated,
/// and never leave the session half-torn-down.
async fn teardown(session: &Arc<ActiveServer>) {
    let root = session.project_root().to_path_buf();
    info!(root = %root.display(), "stopping language server");

    if session.connection().is_connected() {
        let shutdown = session
            .connection()
            .request::<_, Value>("shutdown", Value::Null);
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await {
            Ok(Ok(_)) => {
                let _ = session.connection().notify("exit", Value::Null).await;
            }
            Ok(Err(e)) => warn!(root = %root.display(), "shutdown request failed: {e}"),
            Err(_) => warn!(root = %root.display(), "shutdown request timed out"),
        }
    }

    session.dispose_all();
    session.kill_process().await;
}

/// Waits on a pending start and shares its outcome.
async fn join_start(
    mut rx: watch::Receiver<Option<StartOutcome>>,
    root: &Path,
) -> Result<Arc<ActiveServer>> {
    loop {
        let outcome = rx.borrow().clone();
        if let Some(outcome) = outcome {
            return outcome;
        }
        if rx.changed().await.is_err() {
            // Leader dropped without publishing.
            return Err(Error::Spawn {
                root: root.to_path_buf(),
                message: "start aborted before completion".to_string(),
            });
        }
    }
}

/// Longest-prefix match of `path` against the known project roots.
fn resolve_root(path: &Path, roots: &[PathBuf]) -> Option<PathBuf> {
    roots
        .iter()
        .filter(|root| path.starts_with(root))
        .max_by_key(|root| root.components().count())
        .cloned()
}

/// Clears a wedged pending-start record if the leader's future is
/// dropped mid-spawn; waiters then observe the closed channel.
struct StartGuard {
    root: PathBuf,
    state: Arc<Mutex<ManagerState>>,
    armed: bool,
}

impl StartGuard {
    fn new(root: PathBuf, state: Arc<Mutex<ManagerState>>) -> Self {
        Self {
            root,
            state,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let root = std::mem::take(&mut self.root);
        let state = self.state.clone();
        tokio::spawn(async move {
            state.lock().await.starting.remove(&root);
        });
    }
}
