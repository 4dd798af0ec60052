use std::time::Duration;

/// Errors that can occur in connection operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] pairwire_transport::TransportError),

    /// Frame or message encoding error.
    #[error("frame error: {0}")]
    Frame(#[from] pairwire_frame::FrameError),

    /// The peer sent the wrong marker byte (or closed) during the handshake.
    #[error(
        "handshake failed: peer marker {} != {}",
        marker_label(.observed),
        char::from(*.expected)
    )]
    HandshakeFailed { observed: Option<u8>, expected: u8 },

    /// An operation was called in a state that does not allow it.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// The connection is already closed.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// `take_timeout` elapsed with nothing queued.
    #[error("no message available after {0:?}")]
    QueueEmpty(Duration),

    /// A blocking wait was abandoned because the connection shut down.
    #[error("wait cancelled: connection shut down")]
    Cancelled,

    /// No live session has this id.
    #[error("no session with id {0}")]
    NotFound(u64),

    /// A blocking operation timed out.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

fn marker_label(observed: &Option<u8>) -> String {
    match observed {
        Some(byte) if byte.is_ascii_graphic() => format!("'{}'", char::from(*byte)),
        Some(byte) => format!("0x{byte:02x}"),
        None => "<eof>".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_error_names_both_markers() {
        let err = PeerError::HandshakeFailed {
            observed: Some(b'X'),
            expected: b'S',
        };
        assert_eq!(err.to_string(), "handshake failed: peer marker 'X' != S");

        let err = PeerError::HandshakeFailed {
            observed: None,
            expected: b'C',
        };
        assert_eq!(err.to_string(), "handshake failed: peer marker <eof> != C");
    }
}
