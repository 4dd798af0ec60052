/// Errors that can occur during frame and message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x5057 \"PW\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended cleanly between frames.
    #[error("connection closed")]
    ConnectionClosed,

    /// The stream ended in the middle of a frame.
    #[error("connection closed (incomplete frame)")]
    Truncated,

    /// A message could not be encoded.
    #[error("message encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// A frame payload could not be reconstructed into a known packet.
    #[error("message decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

impl FrameError {
    /// True for a clean end-of-stream between frames.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, FrameError::ConnectionClosed)
    }

    /// True when a read timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FrameError::Io(err)
            if err.kind() == std::io::ErrorKind::WouldBlock
                || err.kind() == std::io::ErrorKind::TimedOut)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
