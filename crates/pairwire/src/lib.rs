//! Paired stream connections with framed messages and label routing.
//!
//! pairwire connects two processes over TCP or a Unix domain socket, runs a
//! one-byte handshake, and then exchanges self-contained JSON messages in
//! length-prefixed frames. Each side buffers inbound messages in a queue;
//! a router can drain that queue and fan routed messages out by label.
//!
//! # Crate Structure
//!
//! - [`transport`]: Stream sockets and endpoints (TCP, Unix domain sockets)
//! - [`frame`]: Framing and per-message encoding
//! - [`peer`]: Connections, handshake, listener (behind `peer` feature)
//! - [`router`]: Label dispatch to handlers (behind `router` feature)

/// Re-export transport types.
pub mod transport {
    pub use pairwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pairwire_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use pairwire_peer::*;
}

/// Re-export router types (requires `router` feature).
#[cfg(feature = "router")]
pub mod router {
    pub use pairwire_router::*;
}
