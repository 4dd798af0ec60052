use pairwire_peer::PeerError;

/// Error returned by a handler. Logged by the router, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in router operations.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The underlying connection failed.
    #[error("connection error: {0}")]
    Peer(#[from] PeerError),

    /// The dispatch thread is already running.
    #[error("router already started")]
    AlreadyStarted,

    /// The dispatch thread could not be spawned.
    #[error("failed to spawn router thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RouterError>;
