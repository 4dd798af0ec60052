//! Connection management for pairwire.
//!
//! A [`Connection`] owns one stream socket, a background receive thread and
//! a [`PacketQueue`] of inbound messages. [`connect`] opens the initiating
//! side; [`Listener`] accepts sessions and tracks the live ones.

pub mod connection;
pub mod connector;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod queue;
pub mod sync;

pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use connector::{connect, connect_with_config};
pub use error::{PeerError, Result};
pub use handshake::{handshake_client, handshake_server, Role, ACCEPTOR_MARKER, INITIATOR_MARKER};
pub use listener::{Listener, ListenerConfig};
pub use queue::PacketQueue;

pub use pairwire_frame::{DisconnectSignal, Message, RoutedMessage};
pub use pairwire_transport::Endpoint;
