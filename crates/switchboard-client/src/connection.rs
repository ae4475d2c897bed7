//! Multiplexed client connection.
//!
//! Many calls can be in flight on one connection at once. Each call gets a
//! fresh correlation id and parks on a one-shot slot keyed by that id; a
//! single background reader routes every `GenericResponse` to its slot and
//! forwards every pushed `ChatMessage` to an unbounded feed, in arrival
//! order.
//!
//! ```text
//!   call() ──► register(id) ──► SharedWriter ──────────► server
//!     ▲                                                    │
//!     │ oneshot                                            │
//!     └──── pending[id] ◄── reader task ◄──────────────────┘
//!                                │
//!                                └──► IncomingMessages (pushes)
//! ```
//!
//! A response for an id nobody waits on any more (the call already timed
//! out) is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use switchboard_protocol::{
    ChatMessage, Command, FrameReader, GenericResponse, Login, ResponseCode, SharedWriter,
};

use crate::error::{ClientError, ClientResult};

/// Default time a call waits for its response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Chat messages pushed by the server, in arrival order.
pub type IncomingMessages = mpsc::UnboundedReceiver<ChatMessage>;

/// Calls waiting for a response, keyed by correlation id.
#[derive(Default)]
struct PendingCalls {
    state: Mutex<PendingState>,
}

#[derive(Default)]
struct PendingState {
    calls: HashMap<u32, oneshot::Sender<GenericResponse>>,
    closed: bool,
}

impl PendingCalls {
    fn register(&self, id: u32) -> ClientResult<oneshot::Receiver<GenericResponse>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ClientError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        state.calls.insert(id, tx);
        Ok(rx)
    }

    /// Hands `response` to its waiter. Returns false if nobody waits for it.
    fn complete(&self, response: GenericResponse) -> bool {
        let waiter = self.state.lock().calls.remove(&response.correlation_id);
        match waiter {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    fn remove(&self, id: u32) {
        self.state.lock().calls.remove(&id);
    }

    /// Fails every waiting call and refuses new ones.
    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.calls.clear();
    }

    fn len(&self) -> usize {
        self.state.lock().calls.len()
    }
}

/// Removes the pending entry when a call finishes, whichever way it ends.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// Client connection to a switchboard server.
pub struct ChatClient {
    writer: SharedWriter,
    pending: Arc<PendingCalls>,
    next_id: AtomicU32,
    call_timeout: Duration,
    username: Mutex<Option<String>>,
    incoming: Mutex<Option<IncomingMessages>>,
    reader: JoinHandle<()>,
}

impl ChatClient {
    /// Connects to a server over TCP.
    pub async fn connect(addr: impl ToSocketAddrs) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ClientError::Connection(format!("failed to connect: {}", e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        Ok(Self::from_parts(reader, writer))
    }

    /// Connects, giving up after `timeout`.
    pub async fn connect_timeout(addr: impl ToSocketAddrs, timeout: Duration) -> ClientResult<Self> {
        tokio::time::timeout(timeout, Self::connect(addr))
            .await
            .map_err(|_| {
                ClientError::Connection(format!(
                    "connection timed out after {}s",
                    timeout.as_secs()
                ))
            })?
    }

    /// Runs the client over any bidirectional byte stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_parts(reader, writer)
    }

    fn from_parts<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending = Arc::new(PendingCalls::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(
            FrameReader::new(BufReader::new(reader)),
            pending.clone(),
            tx,
        ));

        Self {
            writer: SharedWriter::new(writer),
            pending,
            next_id: AtomicU32::new(0),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            username: Mutex::new(None),
            incoming: Mutex::new(Some(rx)),
            reader,
        }
    }

    /// Builder: set how long a call waits for its response.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Takes the feed of pushed chat messages. Returns `None` after the first call.
    pub fn messages(&self) -> Option<IncomingMessages> {
        self.incoming.lock().take()
    }

    /// Username of the last successful login on this connection.
    pub fn username(&self) -> Option<String> {
        self.username.lock().clone()
    }

    /// Number of calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    fn next_correlation_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Sends `command` under a fresh correlation id and waits for its response.
    pub async fn call(&self, command: impl Into<Command>) -> ClientResult<GenericResponse> {
        let mut command = command.into();
        if let Command::GenericResponse(_) = command {
            return Err(ClientError::UnexpectedFrame(
                "a response cannot be sent as a call".into(),
            ));
        }
        let id = self.next_correlation_id();
        command.set_correlation_id(id);

        let rx = self.pending.register(id)?;
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        self.writer.send(&command).await?;
        debug!(correlation_id = id, key = ?command.key(), "Call sent");

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => Err(ClientError::CallTimedOut {
                correlation_id: id,
                timeout: self.call_timeout,
            }),
        }
    }

    /// Logs in as `username`, remembering it for [`ChatClient::send_message`].
    ///
    /// Application-level refusals come back as the response code.
    pub async fn login(&self, username: impl Into<String>) -> ClientResult<ResponseCode> {
        let username = username.into();
        let response = self.call(Login::new(username.clone())).await?;
        if response.response_code.is_ok() {
            *self.username.lock() = Some(username);
        }
        Ok(response.response_code)
    }

    /// Sends `text` to `to`, from the logged-in user, stamped with the current time.
    ///
    /// `Ok` means the server accepted the message into the recipient's mailbox.
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        to: impl Into<String>,
    ) -> ClientResult<ResponseCode> {
        let from = self.username().unwrap_or_default();
        let response = self.call(ChatMessage::new(text, from, to)).await?;
        Ok(response.response_code)
    }

    /// Shuts down the write half; the reader stops once the server hangs up.
    pub async fn close(&self) -> ClientResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(
    mut frames: FrameReader<R>,
    pending: Arc<PendingCalls>,
    incoming: mpsc::UnboundedSender<ChatMessage>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match frames.read_command().await {
            Ok(Some(Command::GenericResponse(response))) => {
                let id = response.correlation_id;
                if !pending.complete(response) {
                    debug!(correlation_id = id, "No pending call, dropping response");
                }
            }
            Ok(Some(Command::ChatMessage(message))) => {
                if incoming.send(message).is_err() {
                    debug!("Message feed dropped, discarding push");
                }
            }
            Ok(Some(other)) => {
                warn!(key = ?other.key(), "Ignoring unexpected frame from server");
            }
            Ok(None) => {
                debug!("Server closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read from server");
                break;
            }
        }
    }
    pending.close();
}
