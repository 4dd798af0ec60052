use std::fmt;
use std::io::{ErrorKind, Read, Write};

use pairwire_transport::TransportError;

use crate::error::{PeerError, Result};

/// Marker byte written by the initiating (client) side.
pub const INITIATOR_MARKER: u8 = b'C';
/// Marker byte written by the accepting (server) side.
pub const ACCEPTOR_MARKER: u8 = b'S';

/// Which end of the pair a connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the connection.
    Initiator,
    /// Accepted it from a listener.
    Acceptor,
}

impl Role {
    /// The byte this side writes.
    pub fn marker(self) -> u8 {
        match self {
            Role::Initiator => INITIATOR_MARKER,
            Role::Acceptor => ACCEPTOR_MARKER,
        }
    }

    /// The byte this side requires from the other end.
    pub fn expected_peer_marker(self) -> u8 {
        match self {
            Role::Initiator => ACCEPTOR_MARKER,
            Role::Acceptor => INITIATOR_MARKER,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Acceptor => f.write_str("acceptor"),
        }
    }
}

/// Client side of the marker exchange: write `C`, require `S`.
pub fn handshake_client<S: Read + Write>(stream: &mut S) -> Result<()> {
    exchange_markers(stream, Role::Initiator)
}

/// Server side of the marker exchange: write `S`, require `C`.
pub fn handshake_server<S: Read + Write>(stream: &mut S) -> Result<()> {
    exchange_markers(stream, Role::Acceptor)
}

/// Write this side's marker, flush, then read exactly one byte back.
///
/// Blocks until the peer's byte arrives or the stream's read timeout fires.
/// End-of-stream in place of the marker is a handshake failure with no
/// observed byte.
pub fn exchange_markers<S: Read + Write>(stream: &mut S, role: Role) -> Result<()> {
    stream.write_all(&[role.marker()]).map_err(io_error)?;
    stream.flush().map_err(io_error)?;

    let expected = role.expected_peer_marker();
    let observed = read_marker(stream)?;
    match observed {
        Some(byte) if byte == expected => {
            tracing::trace!(%role, "handshake markers exchanged");
            Ok(())
        }
        observed => Err(PeerError::HandshakeFailed { observed, expected }),
    }
}

fn read_marker<S: Read>(stream: &mut S) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error(err)),
        }
    }
}

fn io_error(err: std::io::Error) -> PeerError {
    PeerError::Transport(TransportError::Io(err))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Reads from a fixed script, records writes.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Scripted {
        fn new(input: &[u8]) -> Self {
            Self {
                input: Cursor::new(input.to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn client_writes_c_and_accepts_s() {
        let mut stream = Scripted::new(b"S");
        handshake_client(&mut stream).unwrap();
        assert_eq!(stream.output, b"C");
    }

    #[test]
    fn server_writes_s_and_accepts_c() {
        let mut stream = Scripted::new(b"C");
        handshake_server(&mut stream).unwrap();
        assert_eq!(stream.output, b"S");
    }

    #[test]
    fn server_rejects_foreign_marker() {
        let mut stream = Scripted::new(b"X");
        let err = handshake_server(&mut stream).unwrap_err();
        assert!(matches!(
            err,
            PeerError::HandshakeFailed {
                observed: Some(b'X'),
                expected: b'C'
            }
        ));
    }

    #[test]
    fn client_rejects_mirrored_marker() {
        // Two clients talking to each other both see 'C'.
        let mut stream = Scripted::new(b"C");
        let err = handshake_client(&mut stream).unwrap_err();
        assert!(matches!(
            err,
            PeerError::HandshakeFailed {
                observed: Some(b'C'),
                expected: b'S'
            }
        ));
    }

    #[test]
    fn eof_before_marker_fails() {
        let mut stream = Scripted::new(b"");
        let err = handshake_client(&mut stream).unwrap_err();
        assert!(matches!(
            err,
            PeerError::HandshakeFailed {
                observed: None,
                expected: b'S'
            }
        ));
    }

    #[test]
    fn only_one_byte_is_consumed() {
        let mut stream = Scripted::new(b"SPW");
        handshake_client(&mut stream).unwrap();
        assert_eq!(stream.input.position(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn paired_sockets_complete_handshake() {
        let (mut left, mut right) = std::os::unix::net::UnixStream::pair().unwrap();
        let server = std::thread::spawn(move || handshake_server(&mut right));
        handshake_client(&mut left).unwrap();
        server.join().unwrap().unwrap();
    }
}
