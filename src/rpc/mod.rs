// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Typed request/notification connection over a duplex transport.
pub mod connection;
/// JSON-RPC message shapes and Content-Length framing.
pub mod protocol;

pub use connection::{REQUEST_TIMEOUT, RpcConnection};
pub use protocol::{RequestId, ResponseError};
