// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Trestle manages the lifecycle of language server sessions for an
//! editor host: one session per project root, started on demand,
//! shared between documents, and torn down when nothing uses it.
//!
//! The [`manager::ServerManager`] owns all sessions and routing; the
//! [`rpc::RpcConnection`] speaks framed JSON-RPC over any byte stream
//! and correlates requests, responses, and cancellation.

/// Capability probing for adapter attachment.
pub mod capabilities;
/// Layered configuration for server definitions.
pub mod config;
/// Document identity used for routing.
pub mod document;
/// Error types shared across the crate.
pub mod error;
/// Process launch and the initialize handshake.
pub mod launch;
/// Session lifecycle management and document routing.
pub mod manager;
/// Restart rate limiting per project root.
pub mod restart;
/// JSON-RPC connection and wire protocol.
pub mod rpc;
/// The per-root session handle.
pub mod session;
/// File-change events and URI translation.
pub mod watch;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};
pub use manager::ServerManager;
pub use rpc::RpcConnection;
pub use session::ActiveServer;
