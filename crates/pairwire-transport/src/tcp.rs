use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::Stream;

/// TCP transport.
///
/// Provides bind/accept/connect over TCP sockets.
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpAcceptor {
    /// Bind and listen on a TCP address (`host:port`, port 0 picks a free port).
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            endpoint: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            endpoint: addr.to_string(),
            source: e,
        })?;

        info!(%local_addr, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection.
    ///
    /// Blocks unless the acceptor was switched to non-blocking mode, in which
    /// case a pending-free call fails with `WouldBlock`.
    pub fn accept(&self) -> Result<Stream> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        // Accepted sockets must block regardless of the listener's mode.
        stream.set_nonblocking(false)?;
        debug!(%addr, "accepted tcp connection");
        Ok(Stream::from(stream))
    }

    /// Switch the listening socket between blocking and non-blocking accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(Into::into)
    }

    /// Connect to a listening TCP socket (blocking).
    pub fn connect(addr: &str) -> Result<Stream> {
        let addrs: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect {
                endpoint: addr.to_string(),
                source: e,
            })?
            .collect();
        let stream = TcpStream::connect(&addrs[..]).map_err(|e| TransportError::Connect {
            endpoint: addr.to_string(),
            source: e,
        })?;
        let stream = Stream::from(stream);
        stream.set_nodelay(true)?;
        debug!(addr, "connected to tcp socket");
        Ok(stream)
    }

    /// The address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use std::io::{ErrorKind, Read, Write};

    use super::*;

    #[test]
    fn test_bind_accept_connect() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let addr = acceptor.local_addr().to_string();
        assert_ne!(acceptor.local_addr().port(), 0);

        let handle = std::thread::spawn(move || {
            let mut client = TcpAcceptor::connect(&addr).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = acceptor.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_nonblocking_accept_would_block() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        acceptor.set_nonblocking(true).unwrap();

        match acceptor.accept() {
            Err(TransportError::Accept(err)) => assert_eq!(err.kind(), ErrorKind::WouldBlock),
            other => panic!("expected WouldBlock, got {other:?}"),
        }
    }

    #[test]
    fn test_connect_refused() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let addr = acceptor.local_addr().to_string();
        drop(acceptor);

        let result = TcpAcceptor::connect(&addr);
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_bind_rejects_garbage_address() {
        let result = TcpAcceptor::bind("not-an-address");
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }
}
