//! Error kinds for launch, transport and command failures.
//!
//! The enum is `Clone` because a single connection-level failure fans out to
//! every command queued behind it.

/// Errors surfaced by database handles and the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The worker process could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// Socket mode: no inbound connection within the handshake bound.
    #[error("worker did not connect within the handshake timeout")]
    HandshakeTimeout,

    /// The worker exited before the transport was established.
    #[error("worker exited before handshake{}", fmt_code(.code))]
    WorkerExited { code: Option<i32> },

    /// The transport closed while a request was pending, or the channel was
    /// already failed when the request arrived.
    #[error("connection to worker closed")]
    ConnectionClosed,

    /// The engine reported an error for one specific command. The connection
    /// itself is still healthy.
    #[error("{message}")]
    Command { code: String, message: String },

    /// An in-flight launch was abandoned before it resolved.
    #[error("worker launch cancelled")]
    Cancelled,

    /// The handle was closed; no further launches will be attempted.
    #[error("database is closed")]
    Closed,
}

impl Error {
    /// True for failures that invalidate the whole connection, as opposed to
    /// `Command`, which only concerns the request that caused it.
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, Error::Command { .. })
    }

    pub(crate) fn spawn(err: impl std::fmt::Display) -> Self {
        Error::Spawn(err.to_string())
    }
}

fn fmt_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!(" (exit code {c})"),
        None => String::new(),
    }
}
