//! Length-prefixed framing and message encoding for pairwire.
//!
//! Every message travels as one frame:
//! - A 2-byte magic number ("PW") for stream synchronization
//! - A 4-byte little-endian payload length
//! - The payload: one JSON-encoded [`Packet`]
//!
//! Each frame decodes on its own. The [`channel`] layer builds a fresh
//! encoder for every outbound message and a fresh decoder for every inbound
//! one, so no message can observe state left behind by another.

pub mod channel;
pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use channel::{ChannelReceiver, ChannelSender, MessageChannel};
pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use message::{DisconnectSignal, Message, Packet, RoutedMessage};
pub use reader::FrameReader;
pub use writer::FrameWriter;
