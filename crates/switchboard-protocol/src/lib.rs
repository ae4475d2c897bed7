//! Binary wire codec and command types for the switchboard chat protocol.
//!
//! # Protocol Overview
//!
//! Every unit on the wire is a frame, big-endian throughout:
//!
//! ```text
//! +---------------+----------------+-------------------+--------------+
//! | length (u32)  | version (u16)  | commandKey (u16)  | body         |
//! +---------------+----------------+-------------------+--------------+
//! ```
//!
//! `length` counts version + commandKey + body. A reader takes 4 bytes,
//! then exactly `length` more, and parses the command from that buffer, so
//! the stream is self-delimiting regardless of how TCP segments it.
//!
//! A frame whose declared length disagrees with what its command consumes
//! is a fatal decode error; there is no resynchronization.
//!
//! # Example
//!
//! ```rust
//! use switchboard_protocol::{Command, Login, decode_frame, encode_frame};
//!
//! let command = Command::Login(Login::new("gabriele"));
//! let bytes = encode_frame(&command).unwrap();
//! let (decoded, consumed) = decode_frame(&bytes).unwrap();
//! assert_eq!(decoded, command);
//! assert_eq!(consumed, bytes.len());
//! ```

mod codec;
mod error;
mod framing;
mod types;

pub use codec::{STRING_LEN_SIZE, string_size};
pub use error::{ProtocolError, ProtocolResult};
pub use framing::{FrameReader, FrameWriter, SharedWriter, decode_frame, encode_frame};
pub use types::{
    ChatMessage, Command, CommandKey, GenericResponse, Header, Login, ResponseCode, WireCommand,
};

/// Protocol version written in every frame header.
pub const PROTOCOL_VERSION: u16 = 1;

/// Size of the outer length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of version + command key, the part of the header counted by `length`.
pub const COMMAND_HEADER_SIZE: usize = 4;

/// Maximum accepted value of the frame length prefix (1 MiB).
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;
