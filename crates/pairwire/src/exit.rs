use std::fmt;
use std::io;

use pairwire_frame::FrameError;
use pairwire_peer::PeerError;
use pairwire_router::RouterError;
use pairwire_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotFound
        | io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidEndpoint(_) | TransportError::PathTooLong { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::Encode(_) | FrameError::Decode(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed | FrameError::Truncated => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::HandshakeFailed { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        PeerError::Timeout(_) | PeerError::QueueEmpty(_) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        PeerError::Disconnected(_) | PeerError::Cancelled | PeerError::NotFound(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn router_error(context: &str, err: RouterError) -> CliError {
    match err {
        RouterError::Peer(err) => peer_error(context, err),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn handshake_failure_is_transport_error() {
        let err = peer_error(
            "connect failed",
            PeerError::HandshakeFailed {
                observed: Some(b'C'),
                expected: b'S',
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("connect failed: handshake failed"));
    }

    #[test]
    fn waits_map_to_timeout() {
        assert_eq!(
            peer_error("x", PeerError::QueueEmpty(Duration::from_secs(1))).code,
            TIMEOUT
        );
        assert_eq!(
            peer_error("x", PeerError::Timeout(Duration::from_secs(1))).code,
            TIMEOUT
        );
    }

    #[test]
    fn refused_connect_is_transport_error() {
        let err = transport_error(
            "connect failed",
            TransportError::Connect {
                endpoint: "tcp://127.0.0.1:1".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn oversize_payload_is_invalid_data() {
        let err = frame_error("send failed", FrameError::PayloadTooLarge { size: 10, max: 1 });
        assert_eq!(err.code, DATA_INVALID);
    }
}
