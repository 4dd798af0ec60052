//! Stream socket transport for pairwire.
//!
//! Provides one connected [`Stream`] type and one listening [`Acceptor`]
//! type over:
//! - TCP sockets
//! - Unix domain sockets (Linux/macOS)
//!
//! This is the lowest layer of pairwire. Everything else builds on top of
//! the [`Stream`] type provided here.

pub mod acceptor;
pub mod endpoint;
pub mod error;
pub mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod uds;

pub use acceptor::Acceptor;
pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use stream::Stream;
pub use tcp::TcpAcceptor;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
