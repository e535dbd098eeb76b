//! Error types for the wire protocol.

/// Errors that can occur while encoding, decoding or transferring messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// Underlying socket I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An incoming frame announced a payload beyond the accepted ceiling.
    #[error("message too large: {0} bytes (max {max})", max = crate::MAX_MESSAGE_SIZE)]
    TooLarge(usize),

    /// A consume primitive ran past the end of the payload.
    #[error("message truncated while reading {0}")]
    Truncated(&'static str),

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// The `type` byte does not name a known message kind.
    #[error("unknown message type {0}")]
    UnknownType(u8),

    /// A reply's id does not match the request it answers.
    #[error("reply id mismatch: expected {expected}, got {got}")]
    IdMismatch { expected: u32, got: u32 },

    /// A message expected to be a reply lacked the reply flag.
    #[error("received message is not a reply")]
    NotAReply,

    /// Reply operations exceeded what the request asked for.
    #[error("reply operation count mismatch: expected {expected}, got {got}")]
    CountMismatch { expected: u32, got: u32 },
}
