//! Error types for the stream engine.

use std::net::SocketAddr;

/// Errors that can occur while configuring or driving the engine.
///
/// Per-session runtime faults (read/write errors, overflow, quota) are not
/// represented here — they are absorbed into [`crate::session::SessionState`]
/// transitions rather than propagated to a caller. ACL rejection likewise
/// never reaches this type: a rejected peer is dropped inside the accept
/// loop before a session exists to report an error through. This enum only
/// covers setup and lookup failures: binding, registration, and handle
/// resolution.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Underlying I/O error from a socket or reactor operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The given listener handle does not refer to a live listener.
    #[error("listener not found")]
    ListenerNotFound,

    /// Binding the given local address failed.
    #[error("bind failed for {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for `Result<T, EngineError>`.
pub type Result<T> = std::result::Result<T, EngineError>;
