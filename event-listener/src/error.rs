use std::net::SocketAddr;

use thiserror::Error;

/// Errors that can occur in the event listener
#[derive(Error, Debug)]
pub enum ListenerError {
    /// The UDP socket could not be bound
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A socket operation failed after binding
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// The listener is already running
    #[error("listener already started")]
    AlreadyStarted,

    /// The listener has been stopped and its socket released
    #[error("listener stopped")]
    Stopped,
}

/// Result type for listener operations
pub type Result<T> = std::result::Result<T, ListenerError>;
