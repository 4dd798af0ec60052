use std::fmt;
use std::str::FromStr;

#[cfg(unix)]
use std::path::PathBuf;

use crate::acceptor::Acceptor;
use crate::error::{Result, TransportError};
use crate::stream::Stream;
use crate::tcp::TcpAcceptor;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// Address of a pairwire listener.
///
/// Textual forms:
/// - `tcp://host:port` or bare `host:port`
/// - `unix:/path/to/socket` (Unix only)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Tcp(String),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    /// Open a blocking stream to this endpoint.
    pub fn connect(&self) -> Result<Stream> {
        match self {
            Endpoint::Tcp(addr) => TcpAcceptor::connect(addr),
            #[cfg(unix)]
            Endpoint::Unix(path) => UnixDomainSocket::connect(path),
        }
    }

    /// Bind a listening socket on this endpoint.
    pub fn bind(&self) -> Result<Acceptor> {
        Acceptor::bind(self)
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        #[cfg(unix)]
        if let Some(path) = s.strip_prefix("unix:") {
            let path = path.strip_prefix("//").unwrap_or(path);
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Endpoint::Tcp(addr.to_string()))
            }
            _ => Err(TransportError::InvalidEndpoint(s.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}
