// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error types surfaced by the bridge core.
//!
//! The enum is `Clone` on purpose: a failed server start must propagate
//! the same error to every caller that joined the pending start, so the
//! manager clones the outcome into each waiter.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the RPC connection and the session manager.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The external spawn callback failed to produce a live session.
    #[error("failed to start language server for {root}: {message}")]
    Spawn {
        /// Project root the start was attempted for.
        root: PathBuf,
        /// Human-readable cause reported by the spawn callback.
        message: String,
    },

    /// The server answered a request with a protocol error object.
    #[error("request '{method}' failed with code {code}: {message}")]
    RequestFailed {
        /// LSP method of the failed request.
        method: String,
        /// JSON-RPC error code from the response.
        code: i64,
        /// Error message from the response.
        message: String,
    },

    /// A request was cancelled through its cancellation token.
    ///
    /// Distinct from [`Error::RequestFailed`]: cancellation is an
    /// expected outcome and is logged at debug level only.
    #[error("request '{method}' was cancelled")]
    Cancelled {
        /// LSP method of the cancelled request.
        method: String,
    },

    /// No response arrived within the request timeout.
    #[error("request '{method}' timed out after {timeout_secs}s")]
    Timeout {
        /// LSP method of the timed-out request.
        method: String,
        /// Timeout that elapsed, in seconds.
        timeout_secs: u64,
    },

    /// The transport closed while the request was outstanding, or a
    /// call was made on a connection that already closed.
    #[error("connection to language server is closed")]
    Disconnected,

    /// Request params or a response body could not be (de)serialized.
    #[error("invalid payload for '{method}': {message}")]
    Payload {
        /// LSP method whose payload was rejected.
        method: String,
        /// Serialization error description.
        message: String,
    },
}

impl Error {
    /// Builds a [`Error::Payload`] from a serde error.
    pub(crate) fn payload(method: &str, err: &serde_json::Error) -> Self {
        Self::Payload {
            method: method.to_string(),
            message: err.to_string(),
        }
    }

    /// True if this error is a cancellation outcome.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_not_request_failed() {
        let cancelled = Error::Cancelled {
            method: "textDocument/hover".to_string(),
        };
        assert!(cancelled.is_cancelled());

        let failed = Error::RequestFailed {
            method: "textDocument/hover".to_string(),
            code: -32603,
            message: "boom".to_string(),
        };
        assert!(!failed.is_cancelled());
    }

    #[test]
    fn test_spawn_error_clones_for_waiters() {
        let err = Error::Spawn {
            root: PathBuf::from("/p/"),
            message: "command not found".to_string(),
        };
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
