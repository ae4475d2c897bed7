//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding, reading or writing frames.
///
/// Every variant except [`ProtocolError::StringTooLong`] is fatal to the
/// connection it happened on: the stream is never resynchronized.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A field needed more bytes than the frame had left.
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    TruncatedFrame { needed: usize, available: usize },

    /// The frame carried a command key this protocol does not define.
    #[error("unknown command key: {0:#06x}")]
    UnknownCommandKey(u16),

    /// The frame length prefix disagreed with the bytes the command consumed.
    #[error("frame length mismatch: declared {declared} bytes, command used {consumed}")]
    LengthMismatch { declared: usize, consumed: usize },

    /// Fewer bytes were produced or written than the command declared.
    #[error("short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: usize, written: usize },

    /// A string field does not fit its u16 length prefix.
    #[error("string too long for the wire: {len} bytes (max: {max})", max = u16::MAX)]
    StringTooLong { len: usize },

    /// The frame length prefix exceeds [`crate::MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: u32, max: u32 },

    /// A string field did not contain valid UTF-8.
    #[error("invalid UTF-8 in string field: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The frame carried a protocol version this implementation does not speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true if the error leaves the connection in an unusable state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::StringTooLong { .. })
    }
}
