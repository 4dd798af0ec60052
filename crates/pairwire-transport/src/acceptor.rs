use std::io::ErrorKind;

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::Stream;
use crate::tcp::TcpAcceptor;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// A listening socket on any supported transport.
pub struct Acceptor {
    inner: AcceptorInner,
}

enum AcceptorInner {
    Tcp(TcpAcceptor),
    #[cfg(unix)]
    Unix(UnixDomainSocket),
}

impl Acceptor {
    /// Bind to `endpoint`. Unix sockets get the default 0600 mode.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        Self::bind_with_mode(endpoint, 0o600)
    }

    /// Bind to `endpoint`, using `mode` as the Unix socket file mode.
    ///
    /// `mode` is ignored for TCP endpoints.
    #[cfg_attr(not(unix), allow(unused_variables))]
    pub fn bind_with_mode(endpoint: &Endpoint, mode: u32) -> Result<Self> {
        let inner = match endpoint {
            Endpoint::Tcp(addr) => AcceptorInner::Tcp(TcpAcceptor::bind(addr)?),
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                AcceptorInner::Unix(UnixDomainSocket::bind_with_mode(path, mode)?)
            }
        };
        Ok(Self { inner })
    }

    /// Accept the next connection (blocking unless non-blocking mode is set).
    pub fn accept(&self) -> Result<Stream> {
        match &self.inner {
            AcceptorInner::Tcp(acceptor) => acceptor.accept(),
            #[cfg(unix)]
            AcceptorInner::Unix(acceptor) => acceptor.accept(),
        }
    }

    /// Non-blocking accept: `Ok(None)` when no connection is pending.
    ///
    /// Requires [`Acceptor::set_nonblocking`] with `true`.
    pub fn try_accept(&self) -> Result<Option<Stream>> {
        match self.accept() {
            Ok(stream) => Ok(Some(stream)),
            Err(TransportError::Accept(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::Interrupted =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Switch the listening socket between blocking and non-blocking accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match &self.inner {
            AcceptorInner::Tcp(acceptor) => acceptor.set_nonblocking(nonblocking),
            #[cfg(unix)]
            AcceptorInner::Unix(acceptor) => acceptor.set_nonblocking(nonblocking),
        }
    }

    /// The endpoint actually bound (resolves TCP port 0).
    pub fn local_endpoint(&self) -> Endpoint {
        match &self.inner {
            AcceptorInner::Tcp(acceptor) => Endpoint::Tcp(acceptor.local_addr().to_string()),
            #[cfg(unix)]
            AcceptorInner::Unix(acceptor) => Endpoint::Unix(acceptor.path().to_path_buf()),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            AcceptorInner::Tcp(acceptor) => acceptor.transport_name(),
            #[cfg(unix)]
            AcceptorInner::Unix(acceptor) => acceptor.transport_name(),
        }
    }
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("type", &self.transport_name())
            .field("endpoint", &self.local_endpoint())
            .finish()
    }
}
