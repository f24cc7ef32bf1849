// SPDX-License-Identifier: MIT
//! Error taxonomy for the public control surface (spec §7).
//!
//! Every public operation is a total function: it returns `Result<T,
//! ServerError>` and never panics or throws across the API boundary.
//! Per-connection errors never reach this type — they are logged and
//! degrade only the owning slot (see `worker` and `acceptor`).

use std::fmt;
use std::io;

use thiserror::Error;

/// Kinds of failure a public [`crate::Server`] operation can report.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Operation attempted outside its legal state set (spec §4.5).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Bad location, oversized payload, bad port, bad address family, or a
    /// missing certificate path.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server (or a single accept) could not allocate a slot.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// Certificate/key load or match failure at `open`. Fatal to `open`.
    #[error("tls configuration error: {0}")]
    TlsConfig(String),

    /// Underlying OS error surfaced from a bind/listen/accept call.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Reasons a single connection was dropped; never surfaced through the
/// public API, only to the `on_client_disconnect` callback and the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer performed an orderly TCP close or a TLS `close_notify`.
    PeerClosed,
    /// The TLS handshake failed.
    TlsHandshakeFailed,
    /// Any other I/O error on the socket.
    PeerProtocol,
    /// The idle timeout elapsed.
    TimedOut,
    /// `disconnect` was called explicitly through the control surface.
    Requested,
    /// The server is shutting down.
    ServerStopping,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::PeerClosed => "peer closed",
            DisconnectReason::TlsHandshakeFailed => "tls handshake failed",
            DisconnectReason::PeerProtocol => "peer protocol error",
            DisconnectReason::TimedOut => "idle timeout",
            DisconnectReason::Requested => "disconnect requested",
            DisconnectReason::ServerStopping => "server stopping",
        };
        f.write_str(s)
    }
}
