//! Length-prefixed frame encoding and async frame I/O.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Command, Header};
use crate::{COMMAND_HEADER_SIZE, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE, PROTOCOL_VERSION};

/// Encodes a command into a complete frame, length prefix included.
///
/// Fails with [`ProtocolError::ShortWrite`] if the command produced a
/// different number of bytes than its `size_needed()` declared.
pub fn encode_frame(command: &Command) -> ProtocolResult<Bytes> {
    let header = Header::for_command(command)?;
    if header.length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: header.length,
            max: MAX_FRAME_SIZE,
        });
    }

    let expected = LENGTH_PREFIX_SIZE + header.length as usize;
    let mut buf = BytesMut::with_capacity(expected);
    header.encode(&mut buf);
    command.encode_body(&mut buf)?;

    if buf.len() != expected {
        return Err(ProtocolError::ShortWrite {
            expected,
            written: buf.len(),
        });
    }
    Ok(buf.freeze())
}

/// Decodes the first frame in `data`.
///
/// Returns the command and the number of bytes the frame occupied, so that
/// callers holding several concatenated frames can advance past it.
pub fn decode_frame(data: &[u8]) -> ProtocolResult<(Command, usize)> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::TruncatedFrame {
            needed: LENGTH_PREFIX_SIZE,
            available: data.len(),
        });
    }

    let mut len_bytes = [0u8; LENGTH_PREFIX_SIZE];
    len_bytes.copy_from_slice(&data[..LENGTH_PREFIX_SIZE]);
    let len = u32::from_be_bytes(len_bytes);
    check_length(len)?;

    let end = LENGTH_PREFIX_SIZE + len as usize;
    if data.len() < end {
        return Err(ProtocolError::TruncatedFrame {
            needed: end,
            available: data.len(),
        });
    }

    let command = parse_payload(&data[LENGTH_PREFIX_SIZE..end])?;
    Ok((command, end))
}

fn check_length(len: u32) -> ProtocolResult<()> {
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    if (len as usize) < COMMAND_HEADER_SIZE {
        return Err(ProtocolError::TruncatedFrame {
            needed: COMMAND_HEADER_SIZE,
            available: len as usize,
        });
    }
    Ok(())
}

/// Parses version, key and body from a fully buffered payload.
fn parse_payload(mut payload: &[u8]) -> ProtocolResult<Command> {
    let declared = payload.len();
    let header = Header::decode_after_length(declared as u32, &mut payload)?;
    if header.version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(header.version));
    }

    let command = Command::decode(header.key, &mut payload)?;
    if !payload.is_empty() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            consumed: declared - payload.len(),
        });
    }
    Ok(command)
}

/// Reads frames from an async byte stream.
pub struct FrameReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a new FrameReader wrapping the given reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads a single frame.
    ///
    /// Returns `Ok(None)` if the stream ended cleanly between frames. A stream
    /// that ends inside the length prefix is a [`ProtocolError::TruncatedFrame`].
    /// Any failure is fatal for the stream.
    pub async fn read_command(&mut self) -> ProtocolResult<Option<Command>> {
        let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
        let mut filled = 0;
        while filled < LENGTH_PREFIX_SIZE {
            match self.reader.read(&mut len_buf[filled..]).await? {
                0 if filled == 0 => return Ok(None),
                0 => {
                    return Err(ProtocolError::TruncatedFrame {
                        needed: LENGTH_PREFIX_SIZE,
                        available: filled,
                    });
                }
                n => filled += n,
            }
        }

        let len = u32::from_be_bytes(len_buf);
        check_length(len)?;

        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload).await?;

        parse_payload(&payload).map(Some)
    }

    /// Unwraps this FrameReader, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes frames to an async byte stream.
///
/// After any failed write the stream may hold a partial frame, so the
/// writer refuses every later frame.
pub struct FrameWriter<W> {
    writer: W,
    poisoned: bool,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Creates a new FrameWriter wrapping the given writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            poisoned: false,
        }
    }

    /// Writes one complete frame and flushes it.
    pub async fn write_command(&mut self, command: &Command) -> ProtocolResult<()> {
        if self.poisoned {
            return Err(ProtocolError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "frame stream unusable after an earlier write failure",
            )));
        }

        let frame = encode_frame(command)?;
        let result = self.write_frame(&frame).await;
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    async fn write_frame(&mut self, frame: &[u8]) -> ProtocolResult<()> {
        let mut written = 0;
        while written < frame.len() {
            match self.writer.write(&frame[written..]).await? {
                0 => {
                    return Err(ProtocolError::ShortWrite {
                        expected: frame.len(),
                        written,
                    });
                }
                n => written += n,
            }
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Shuts down the write side of the underlying stream.
    pub async fn shutdown(&mut self) -> ProtocolResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Returns true once a write has failed.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Clonable handle to the write half of one connection.
///
/// All frames written through clones of the same handle are serialized by a
/// per-connection lock, so a frame is never interleaved with another.
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<FrameWriter<BoxedWrite>>>,
}

impl SharedWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(FrameWriter::new(Box::new(writer)))),
        }
    }

    /// Writes one frame atomically with respect to other writers of this connection.
    pub async fn send(&self, command: &Command) -> ProtocolResult<()> {
        self.inner.lock().await.write_command(command).await
    }

    /// Shuts down the write side of the connection.
    pub async fn shutdown(&self) -> ProtocolResult<()> {
        self.inner.lock().await.shutdown().await
    }

    /// Returns true if both handles write to the same connection.
    pub fn same_connection(&self, other: &SharedWriter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWriter")
            .field("connection", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::ReadBuf;

    use super::*;
    use crate::{ChatMessage, GenericResponse, Login, ResponseCode};

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Yields the wrapped bytes at most `chunk` bytes per read.
    struct ChunkedReader {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl ChunkedReader {
        fn new(data: Vec<u8>, chunk: usize) -> Self {
            Self {
                data,
                pos: 0,
                chunk,
            }
        }
    }

    impl AsyncRead for ChunkedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let remaining = self.data.len() - self.pos;
            let n = remaining.min(self.chunk).min(buf.remaining());
            let start = self.pos;
            buf.put_slice(&self.data[start..start + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    /// Accepts nothing, like a peer whose receive window never opens.
    struct ZeroWriter;

    impl AsyncWrite for ZeroWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn login(id: u32, name: &str) -> Command {
        Command::Login(Login {
            correlation_id: id,
            username: name.into(),
        })
    }

    #[test]
    fn login_frame_layout() {
        let frame = encode_frame(&login(7, "bob")).unwrap();
        insta::assert_snapshot!(hex(&frame), @"0000000d00010001000000070003626f62");
    }

    #[test]
    fn generic_response_frame_layout() {
        let command = Command::GenericResponse(GenericResponse::new(
            42,
            ResponseCode::UserAlreadyLoggedIn,
        ));
        let frame = encode_frame(&command).unwrap();
        insta::assert_snapshot!(hex(&frame), @"0000000a000100030000002a0004");
    }

    #[test]
    fn chat_message_frame_layout() {
        let command = Command::ChatMessage(ChatMessage {
            correlation_id: 0,
            sent_at_nanos: 1,
            text: "hi".into(),
            from: "a".into(),
            to: "b".into(),
        });
        let frame = encode_frame(&command).unwrap();
        insta::assert_snapshot!(hex(&frame), @"0000001a0001000200000000000000000000000100026869000161000162");
    }

    #[test]
    fn length_prefix_counts_version_key_and_body() {
        let command = login(1, "gabriele");
        let frame = encode_frame(&command).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        assert_eq!(len as usize, frame.len() - 4);
        assert_eq!(len as usize, command.size_needed());
    }

    #[test]
    fn decode_two_concatenated_frames() {
        let first = login(1, "alice");
        let second = Command::ChatMessage(ChatMessage::new("hello", "alice", "bob"));
        let mut buffer = encode_frame(&first).unwrap().to_vec();
        buffer.extend_from_slice(&encode_frame(&second).unwrap());

        let (decoded, used) = decode_frame(&buffer).unwrap();
        assert_eq!(decoded, first);
        let (decoded, rest) = decode_frame(&buffer[used..]).unwrap();
        assert_eq!(decoded, second);
        assert_eq!(used + rest, buffer.len());
    }

    #[test]
    fn decode_incomplete_length() {
        assert!(matches!(
            decode_frame(&[0, 0]),
            Err(ProtocolError::TruncatedFrame { needed: 4, .. })
        ));
    }

    #[test]
    fn decode_incomplete_payload() {
        let frame = encode_frame(&login(1, "alice")).unwrap();
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(ProtocolError::TruncatedFrame { .. })
        ));
    }

    #[test]
    fn declared_length_larger_than_command_is_fatal() {
        let mut frame = encode_frame(&login(1, "alice")).unwrap().to_vec();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) + 2;
        frame[..4].copy_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&[0xaa, 0xbb]);

        let err = decode_frame(&frame).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::LengthMismatch { declared, consumed } if declared == consumed + 2
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn declared_length_smaller_than_command_is_truncated() {
        let mut frame = encode_frame(&login(1, "alice")).unwrap().to_vec();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) - 2;
        frame[..4].copy_from_slice(&len.to_be_bytes());
        frame.truncate(frame.len() - 2);

        assert!(matches!(
            decode_frame(&frame),
            Err(ProtocolError::TruncatedFrame { .. })
        ));
    }

    #[test]
    fn frame_too_large() {
        let data = (MAX_FRAME_SIZE + 1).to_be_bytes();
        assert!(matches!(
            decode_frame(&data),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn unsupported_version() {
        let mut frame = encode_frame(&login(1, "alice")).unwrap().to_vec();
        frame[4..6].copy_from_slice(&9u16.to_be_bytes());
        assert!(matches!(
            decode_frame(&frame),
            Err(ProtocolError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn unknown_command_key() {
        let mut frame = encode_frame(&login(1, "alice")).unwrap().to_vec();
        frame[6..8].copy_from_slice(&0x0077u16.to_be_bytes());
        assert!(matches!(
            decode_frame(&frame),
            Err(ProtocolError::UnknownCommandKey(0x77))
        ));
    }

    #[test]
    fn encode_rejects_oversized_string() {
        let command = login(1, &"x".repeat(70_000));
        assert!(matches!(
            encode_frame(&command),
            Err(ProtocolError::StringTooLong { len: 70_000 })
        ));
    }

    #[tokio::test]
    async fn reader_is_independent_of_split_points() {
        let first = login(11, "alice");
        let second = Command::ChatMessage(ChatMessage {
            correlation_id: 12,
            sent_at_nanos: 1_700_000_000_000_000_000,
            text: "split me anywhere".into(),
            from: "alice".into(),
            to: "bob".into(),
        });
        let mut stream = encode_frame(&first).unwrap().to_vec();
        stream.extend_from_slice(&encode_frame(&second).unwrap());

        for chunk in 1..=stream.len() {
            let mut reader = FrameReader::new(ChunkedReader::new(stream.clone(), chunk));
            assert_eq!(reader.read_command().await.unwrap(), Some(first.clone()));
            assert_eq!(reader.read_command().await.unwrap(), Some(second.clone()));
            assert_eq!(reader.read_command().await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn reader_reports_eof_mid_frame_as_error() {
        let frame = encode_frame(&login(1, "alice")).unwrap();
        let cut = frame[..frame.len() - 2].to_vec();
        let mut reader = FrameReader::new(ChunkedReader::new(cut, 3));
        let err = reader.read_command().await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn reader_reports_eof_inside_length_prefix() {
        for cut in 1..LENGTH_PREFIX_SIZE {
            for chunk in 1..=cut {
                let mut reader = FrameReader::new(ChunkedReader::new(vec![0; cut], chunk));
                match reader.read_command().await {
                    Err(ProtocolError::TruncatedFrame { needed, available }) => {
                        assert_eq!((needed, available), (LENGTH_PREFIX_SIZE, cut));
                    }
                    other => panic!("cut at {cut}: expected TruncatedFrame, got {other:?}"),
                }
            }
        }

        let mut reader = FrameReader::new(ChunkedReader::new(Vec::new(), 1));
        assert!(reader.read_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reader_rejects_empty_frame() {
        let mut reader = FrameReader::new(ChunkedReader::new(vec![0, 0, 0, 0], 4));
        assert!(matches!(
            reader.read_command().await,
            Err(ProtocolError::TruncatedFrame { needed: 4, available: 0 })
        ));
    }

    #[tokio::test]
    async fn writer_reader_roundtrip() {
        let commands = vec![
            login(1, "alice"),
            Command::ChatMessage(ChatMessage::new("", "alice", "bob")),
            Command::GenericResponse(GenericResponse::new(1, ResponseCode::Ok)),
        ];

        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            for command in &commands {
                writer.write_command(command).await.unwrap();
            }
        }

        let mut reader = FrameReader::new(&buffer[..]);
        for expected in &commands {
            assert_eq!(reader.read_command().await.unwrap().as_ref(), Some(expected));
        }
        assert!(reader.read_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn short_write_poisons_writer() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.write_command(&login(1, "alice")).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ShortWrite { written: 0, .. }
        ));
        assert!(writer.is_poisoned());

        let err = writer.write_command(&login(2, "alice")).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[tokio::test]
    async fn shared_writer_never_interleaves_frames() {
        let (client, server) = tokio::io::duplex(64);
        let writer = SharedWriter::new(client);

        let mut tasks = Vec::new();
        for id in 0..32u32 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                let text = "z".repeat(100 + id as usize);
                let command = Command::ChatMessage(ChatMessage {
                    correlation_id: id,
                    sent_at_nanos: 0,
                    text,
                    from: "f".into(),
                    to: "t".into(),
                });
                writer.send(&command).await.unwrap();
            }));
        }

        let reader_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(server);
            let mut seen = Vec::new();
            for _ in 0..32 {
                match reader.read_command().await.unwrap() {
                    Some(Command::ChatMessage(m)) => {
                        assert_eq!(m.text.len(), 100 + m.correlation_id as usize);
                        seen.push(m.correlation_id);
                    }
                    other => panic!("unexpected frame: {other:?}"),
                }
            }
            seen.sort_unstable();
            seen
        });

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(reader_task.await.unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn shared_writer_identity() {
        let (a, _a_peer) = tokio::io::duplex(8);
        let (b, _b_peer) = tokio::io::duplex(8);
        let first = SharedWriter::new(a);
        let second = SharedWriter::new(b);
        assert!(first.same_connection(&first.clone()));
        assert!(!first.same_connection(&second));
    }
}
