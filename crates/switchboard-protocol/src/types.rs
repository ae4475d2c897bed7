//! Command types carried inside frames.
//!
//! Every command commits to a stable [`CommandKey`], a protocol version, and
//! an exact serialized size. Field order on the wire is fixed per type:
//!
//! ```text
//! Login          := correlationId:u32 | username:String
//! ChatMessage    := correlationId:u32 | sentAtNanos:u64 | text:String | from:String | to:String
//! GenericResponse:= correlationId:u32 | responseCode:u16
//! ```

use std::fmt;

use bytes::{Buf, BufMut};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::codec::{get_string, get_u16, get_u32, get_u64, put_string, string_size};
use crate::error::{ProtocolError, ProtocolResult};
use crate::{COMMAND_HEADER_SIZE, LENGTH_PREFIX_SIZE, PROTOCOL_VERSION};

const CORRELATION_ID_SIZE: usize = 4;

/// Numeric discriminator of a command on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandKey {
    Login = 0x01,
    ChatMessage = 0x02,
    GenericResponse = 0x03,
}

impl CommandKey {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for CommandKey {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Login),
            0x02 => Ok(Self::ChatMessage),
            0x03 => Ok(Self::GenericResponse),
            other => Err(ProtocolError::UnknownCommandKey(other)),
        }
    }
}

/// Outcome carried by a [`GenericResponse`].
///
/// Application-level failures travel as response codes; the connection stays
/// usable after any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ok,
    UserNotFound,
    UserAlreadyLoggedIn,
    /// Only sent by a broker running with login enforcement.
    NotAuthenticated,
    /// A code this implementation does not know; kept so decoding never fails on it.
    Unknown(u16),
}

impl ResponseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Ok => 0x01,
            Self::UserNotFound => 0x03,
            Self::UserAlreadyLoggedIn => 0x04,
            Self::NotAuthenticated => 0x05,
            Self::Unknown(code) => code,
        }
    }

    /// Human readable name, as shown by the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "Success",
            Self::UserNotFound => "ErrorUserNotFound",
            Self::UserAlreadyLoggedIn => "ErrorUserAlreadyLogged",
            Self::NotAuthenticated => "ErrorNotAuthenticated",
            Self::Unknown(_) => "ErrorUnknown",
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl From<u16> for ResponseCode {
    fn from(value: u16) -> Self {
        match value {
            0x01 => Self::Ok,
            0x03 => Self::UserNotFound,
            0x04 => Self::UserAlreadyLoggedIn,
            0x05 => Self::NotAuthenticated,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#06x})", self.as_str(), self.as_u16())
    }
}

/// Shared contract of every command type.
pub trait WireCommand: Sized {
    /// Stable numeric discriminator.
    const KEY: CommandKey;

    fn key(&self) -> CommandKey {
        Self::KEY
    }

    /// Protocol version tag written in the frame header.
    fn version(&self) -> u16 {
        PROTOCOL_VERSION
    }

    fn correlation_id(&self) -> u32;

    fn set_correlation_id(&mut self, id: u32);

    /// Exact serialized size of the body alone.
    fn body_size(&self) -> usize;

    /// Exact serialized size of version + key + body, i.e. the value of the
    /// frame length prefix.
    fn size_needed(&self) -> usize {
        COMMAND_HEADER_SIZE + self.body_size()
    }

    /// Writes the body fields in wire order.
    fn encode_body<B: BufMut>(&self, buf: &mut B) -> ProtocolResult<()>;

    /// Reads the body fields in wire order.
    fn decode_body<B: Buf>(buf: &mut B) -> ProtocolResult<Self>;
}

/// Request to bind a username to the sending connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub correlation_id: u32,
    pub username: String,
}

impl Login {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            correlation_id: 0,
            username: username.into(),
        }
    }
}

impl WireCommand for Login {
    const KEY: CommandKey = CommandKey::Login;

    fn correlation_id(&self) -> u32 {
        self.correlation_id
    }

    fn set_correlation_id(&mut self, id: u32) {
        self.correlation_id = id;
    }

    fn body_size(&self) -> usize {
        CORRELATION_ID_SIZE + string_size(&self.username)
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> ProtocolResult<()> {
        buf.put_u32(self.correlation_id);
        put_string(buf, &self.username)
    }

    fn decode_body<B: Buf>(buf: &mut B) -> ProtocolResult<Self> {
        Ok(Self {
            correlation_id: get_u32(buf)?,
            username: get_string(buf)?,
        })
    }
}

/// A chat message, sent by clients and pushed by the broker to recipients.
///
/// Pushes from the broker carry correlation id 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub correlation_id: u32,
    /// Unix time in nanoseconds at which the sender created the message.
    pub sent_at_nanos: u64,
    pub text: String,
    pub from: String,
    pub to: String,
}

impl ChatMessage {
    /// Creates a message stamped with the current time.
    pub fn new(text: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            correlation_id: 0,
            sent_at_nanos: nanos_since_epoch(Utc::now()),
            text: text.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Builder: set the send timestamp.
    #[must_use]
    pub fn with_sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at_nanos = nanos_since_epoch(sent_at);
        self
    }

    /// Returns the send timestamp.
    pub fn sent_at(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(i64::try_from(self.sent_at_nanos).unwrap_or(i64::MAX))
    }
}

impl WireCommand for ChatMessage {
    const KEY: CommandKey = CommandKey::ChatMessage;

    fn correlation_id(&self) -> u32 {
        self.correlation_id
    }

    fn set_correlation_id(&mut self, id: u32) {
        self.correlation_id = id;
    }

    fn body_size(&self) -> usize {
        CORRELATION_ID_SIZE
            + 8
            + string_size(&self.text)
            + string_size(&self.from)
            + string_size(&self.to)
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> ProtocolResult<()> {
        buf.put_u32(self.correlation_id);
        buf.put_u64(self.sent_at_nanos);
        put_string(buf, &self.text)?;
        put_string(buf, &self.from)?;
        put_string(buf, &self.to)
    }

    fn decode_body<B: Buf>(buf: &mut B) -> ProtocolResult<Self> {
        Ok(Self {
            correlation_id: get_u32(buf)?,
            sent_at_nanos: get_u64(buf)?,
            text: get_string(buf)?,
            from: get_string(buf)?,
            to: get_string(buf)?,
        })
    }
}

/// Reply to an RPC-style command, matched to its request by correlation id only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericResponse {
    pub correlation_id: u32,
    pub response_code: ResponseCode,
}

impl GenericResponse {
    pub fn new(correlation_id: u32, response_code: ResponseCode) -> Self {
        Self {
            correlation_id,
            response_code,
        }
    }
}

impl WireCommand for GenericResponse {
    const KEY: CommandKey = CommandKey::GenericResponse;

    fn correlation_id(&self) -> u32 {
        self.correlation_id
    }

    fn set_correlation_id(&mut self, id: u32) {
        self.correlation_id = id;
    }

    fn body_size(&self) -> usize {
        CORRELATION_ID_SIZE + 2
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> ProtocolResult<()> {
        buf.put_u32(self.correlation_id);
        buf.put_u16(self.response_code.as_u16());
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B) -> ProtocolResult<Self> {
        Ok(Self {
            correlation_id: get_u32(buf)?,
            response_code: ResponseCode::from(get_u16(buf)?),
        })
    }
}

/// Any command that can appear in a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login(Login),
    ChatMessage(ChatMessage),
    GenericResponse(GenericResponse),
}

impl Command {
    pub fn key(&self) -> CommandKey {
        match self {
            Self::Login(c) => c.key(),
            Self::ChatMessage(c) => c.key(),
            Self::GenericResponse(c) => c.key(),
        }
    }

    pub fn version(&self) -> u16 {
        match self {
            Self::Login(c) => c.version(),
            Self::ChatMessage(c) => c.version(),
            Self::GenericResponse(c) => c.version(),
        }
    }

    pub fn correlation_id(&self) -> u32 {
        match self {
            Self::Login(c) => c.correlation_id(),
            Self::ChatMessage(c) => c.correlation_id(),
            Self::GenericResponse(c) => c.correlation_id(),
        }
    }

    pub fn set_correlation_id(&mut self, id: u32) {
        match self {
            Self::Login(c) => c.set_correlation_id(id),
            Self::ChatMessage(c) => c.set_correlation_id(id),
            Self::GenericResponse(c) => c.set_correlation_id(id),
        }
    }

    /// Size of version + key + body; the frame length prefix.
    pub fn size_needed(&self) -> usize {
        match self {
            Self::Login(c) => c.size_needed(),
            Self::ChatMessage(c) => c.size_needed(),
            Self::GenericResponse(c) => c.size_needed(),
        }
    }

    /// Size of the whole frame including the length prefix.
    pub fn frame_size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.size_needed()
    }

    pub fn encode_body<B: BufMut>(&self, buf: &mut B) -> ProtocolResult<()> {
        match self {
            Self::Login(c) => c.encode_body(buf),
            Self::ChatMessage(c) => c.encode_body(buf),
            Self::GenericResponse(c) => c.encode_body(buf),
        }
    }

    /// Decodes the body of the command identified by `key`.
    pub fn decode<B: Buf>(key: u16, buf: &mut B) -> ProtocolResult<Self> {
        Ok(match CommandKey::try_from(key)? {
            CommandKey::Login => Self::Login(Login::decode_body(buf)?),
            CommandKey::ChatMessage => Self::ChatMessage(ChatMessage::decode_body(buf)?),
            CommandKey::GenericResponse => {
                Self::GenericResponse(GenericResponse::decode_body(buf)?)
            }
        })
    }
}

impl From<Login> for Command {
    fn from(value: Login) -> Self {
        Self::Login(value)
    }
}

impl From<ChatMessage> for Command {
    fn from(value: ChatMessage) -> Self {
        Self::ChatMessage(value)
    }
}

impl From<GenericResponse> for Command {
    fn from(value: GenericResponse) -> Self {
        Self::GenericResponse(value)
    }
}

/// Frame header: `length:u32 | version:u16 | commandKey:u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Byte count of version + key + body.
    pub length: u32,
    pub version: u16,
    pub key: u16,
}

impl Header {
    /// Builds the header that precedes `command` on the wire.
    pub fn for_command(command: &Command) -> ProtocolResult<Self> {
        let length = command.size_needed();
        let length = u32::try_from(length).map_err(|_| ProtocolError::FrameTooLarge {
            size: u32::MAX,
            max: crate::MAX_FRAME_SIZE,
        })?;
        Ok(Self {
            length,
            version: command.version(),
            key: command.key().as_u16(),
        })
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.length);
        buf.put_u16(self.version);
        buf.put_u16(self.key);
    }

    /// Reads version and key from the start of an already length-delimited payload.
    pub fn decode_after_length<B: Buf>(length: u32, buf: &mut B) -> ProtocolResult<Self> {
        Ok(Self {
            length,
            version: get_u16(buf)?,
            key: get_u16(buf)?,
        })
    }

    /// Length of the body alone.
    pub fn body_len(&self) -> usize {
        (self.length as usize).saturating_sub(COMMAND_HEADER_SIZE)
    }
}

fn nanos_since_epoch(at: DateTime<Utc>) -> u64 {
    at.timestamp_nanos_opt()
        .and_then(|nanos| u64::try_from(nanos).ok())
        .unwrap_or(0)
}
