//! Per-connection session handler.
//!
//! Reads one frame at a time, dispatches it, and writes the `GenericResponse`
//! for request commands before reading the next frame. Responses and mailbox
//! pushes share the connection's [`SharedWriter`], so they never interleave.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use switchboard_core::EventFeed;
use switchboard_protocol::{
    ChatMessage, Command, FrameReader, GenericResponse, Login, ResponseCode, SharedWriter,
};

use crate::error::ServerResult;
use crate::registry::{LoginOutcome, Session, UserRegistry};

/// Connection state machine.
#[derive(Debug)]
enum SessionState {
    Unauthenticated,
    Authenticated(Arc<Session>),
    Closed,
}

impl SessionState {
    fn session(&self) -> Option<&Arc<Session>> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

/// Response to write back, plus the session to wake once it is on the wire.
struct Reply {
    response: GenericResponse,
    wake: Option<Arc<Session>>,
}

impl Reply {
    fn new(correlation_id: u32, code: ResponseCode) -> Self {
        Self {
            response: GenericResponse::new(correlation_id, code),
            wake: None,
        }
    }
}

/// Serves connections against a shared [`UserRegistry`].
#[derive(Clone)]
pub struct SessionHandler {
    registry: Arc<UserRegistry>,
    feed: EventFeed,
    require_login: bool,
}

impl SessionHandler {
    pub fn new(registry: Arc<UserRegistry>, feed: EventFeed) -> Self {
        Self {
            registry,
            feed,
            require_login: false,
        }
    }

    /// Builder: answer `NotAuthenticated` to chat messages sent before login.
    pub fn with_require_login(mut self, require: bool) -> Self {
        self.require_login = require;
        self
    }

    /// Serves one accepted TCP connection until it closes.
    pub async fn serve(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        if let Err(e) = self.handle_connection(reader, writer, peer).await {
            warn!(%peer, error = %e, "Connection handler error");
        }
    }

    /// Runs the dispatch loop over an arbitrary byte stream.
    ///
    /// Returns an error only when writing a response failed; read-side
    /// failures end the session normally after emitting an event.
    pub async fn handle_connection<R, W>(
        &self,
        reader: R,
        writer: W,
        peer: SocketAddr,
    ) -> ServerResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut frames = FrameReader::new(BufReader::new(reader));
        let writer = SharedWriter::new(writer);
        let mut state = SessionState::Unauthenticated;
        debug!(%peer, "Connection opened");

        let result: ServerResult<()> = loop {
            let command = match frames.read_command().await {
                Ok(Some(command)) => command,
                Ok(None) => {
                    self.feed.notice(format!("Connection from {peer} closed (EOF)"));
                    break Ok(());
                }
                Err(e) => {
                    self.feed.error(format!("Error reading from {peer}: {e}"));
                    break Ok(());
                }
            };

            let Some(reply) = self.dispatch(command, &mut state, &writer).await else {
                continue;
            };

            let correlation_id = reply.response.correlation_id;
            if let Err(e) = writer.send(&Command::GenericResponse(reply.response)).await {
                self.feed.error(format!("Error sending response: {e}"));
                break Err(e.into());
            }
            if let Some(session) = state.session() {
                debug!(
                    username = %session.username(),
                    correlation_id,
                    "Response sent"
                );
            }
            if let Some(session) = reply.wake {
                session.wake();
            }
        };

        if let SessionState::Authenticated(session) =
            std::mem::replace(&mut state, SessionState::Closed)
            && session.release(&writer)
        {
            self.feed.notice(format!("User {} logged out", session.username()));
        }
        if let Err(e) = writer.shutdown().await {
            debug!(%peer, error = %e, "Write half already closed");
        }
        debug!(%peer, ?state, "Connection closed");
        result
    }

    async fn dispatch(
        &self,
        command: Command,
        state: &mut SessionState,
        writer: &SharedWriter,
    ) -> Option<Reply> {
        match command {
            Command::Login(login) => Some(self.login(login, state, writer).await),
            Command::ChatMessage(message) => Some(self.chat_message(message, state).await),
            Command::GenericResponse(response) => {
                warn!(
                    correlation_id = response.correlation_id,
                    code = %response.response_code,
                    "Ignoring response frame sent by a client"
                );
                None
            }
        }
    }

    async fn login(&self, login: Login, state: &mut SessionState, writer: &SharedWriter) -> Reply {
        let username = login.username;
        self.feed.info(format!("Login request for user {username}"));

        let session = match self.registry.login(&username, writer.clone()).await {
            LoginOutcome::AlreadyOnline => {
                self.feed.warning(format!("User {username} already logged"));
                return Reply::new(login.correlation_id, ResponseCode::UserAlreadyLoggedIn);
            }
            LoginOutcome::New(session) => {
                self.feed.info(format!("New User {username} logged in"));
                session
            }
            LoginOutcome::Reconnected(session) => {
                self.feed.info(format!("User {username} reconnected"));
                session
            }
        };

        // Switching identity on one connection gives up the previous one.
        if let Some(previous) = state.session()
            && !Arc::ptr_eq(previous, &session)
            && previous.release(writer)
        {
            self.feed.notice(format!("User {} logged out", previous.username()));
        }
        *state = SessionState::Authenticated(session.clone());

        Reply {
            response: GenericResponse::new(login.correlation_id, ResponseCode::Ok),
            wake: Some(session),
        }
    }

    async fn chat_message(&self, message: ChatMessage, state: &SessionState) -> Reply {
        let correlation_id = message.correlation_id;
        if self.require_login && state.session().is_none() {
            self.feed.warning(format!(
                "Message from {} to {} rejected: not logged in",
                message.from, message.to
            ));
            return Reply::new(correlation_id, ResponseCode::NotAuthenticated);
        }

        let summary = format!(
            "Message from {} to {}: {}",
            message.from, message.to, message.text
        );
        let to = message.to.clone();
        let code = self.registry.route(message).await;
        match code {
            ResponseCode::Ok => self.feed.notice(summary),
            _ => self.feed.error(format!("User {to} not found")),
        }
        Reply::new(correlation_id, code)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    use switchboard_protocol::encode_frame;

    use super::*;

    struct Peer {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
        task: JoinHandle<ServerResult<()>>,
    }

    impl Peer {
        async fn send(&mut self, command: Command) {
            let frame = encode_frame(&command).unwrap();
            self.writer.write_all(&frame).await.unwrap();
        }

        async fn recv(&mut self) -> Command {
            timeout(Duration::from_secs(2), self.reader.read_command())
                .await
                .expect("frame expected")
                .unwrap()
                .expect("stream open")
        }

        async fn call(&mut self, command: Command) -> GenericResponse {
            self.send(command).await;
            match self.recv().await {
                Command::GenericResponse(response) => response,
                other => panic!("expected a response, got {other:?}"),
            }
        }
    }

    fn connect(handler: &SessionHandler) -> Peer {
        let (server_side, client_side) = tokio::io::duplex(16 * 1024);
        let (server_read, server_write) = tokio::io::split(server_side);
        let (client_read, client_write) = tokio::io::split(client_side);
        let handler = handler.clone();
        let task = tokio::spawn(async move {
            handler
                .handle_connection(server_read, server_write, "127.0.0.1:1".parse().unwrap())
                .await
        });
        Peer {
            reader: FrameReader::new(client_read),
            writer: client_write,
            task,
        }
    }

    fn login(id: u32, name: &str) -> Command {
        let mut login = Login::new(name);
        login.correlation_id = id;
        Command::Login(login)
    }

    fn message(id: u32, text: &str, from: &str, to: &str) -> Command {
        let mut message = ChatMessage::new(text, from, to);
        message.correlation_id = id;
        Command::ChatMessage(message)
    }

    fn handler() -> (SessionHandler, Arc<UserRegistry>) {
        let registry = Arc::new(UserRegistry::new(EventFeed::disabled()));
        (
            SessionHandler::new(registry.clone(), EventFeed::disabled()),
            registry,
        )
    }

    #[tokio::test]
    async fn login_echoes_correlation_id() {
        let (handler, registry) = handler();
        let mut alice = connect(&handler);

        let response = alice.call(login(17, "alice")).await;
        assert_eq!(response, GenericResponse::new(17, ResponseCode::Ok));
        assert!(registry.is_online("alice").await);
    }

    #[tokio::test]
    async fn duplicate_login_keeps_connection_usable() {
        let (handler, _registry) = handler();
        let mut first = connect(&handler);
        let mut second = connect(&handler);

        assert!(first.call(login(1, "alice")).await.response_code.is_ok());
        assert_eq!(
            second.call(login(2, "alice")).await.response_code,
            ResponseCode::UserAlreadyLoggedIn
        );
        assert!(second.call(login(3, "bob")).await.response_code.is_ok());
    }

    #[tokio::test]
    async fn disconnect_marks_user_offline() {
        let (handler, registry) = handler();
        let mut alice = connect(&handler);
        alice.call(login(1, "alice")).await;

        alice.writer.shutdown().await.unwrap();
        alice.task.await.unwrap().unwrap();
        assert!(!registry.is_online("alice").await);

        let mut again = connect(&handler);
        assert!(again.call(login(2, "alice")).await.response_code.is_ok());
    }

    #[tokio::test]
    async fn message_to_unknown_user() {
        let (handler, _registry) = handler();
        let mut alice = connect(&handler);
        alice.call(login(1, "alice")).await;

        let response = alice.call(message(5, "hi", "alice", "nobody")).await;
        assert_eq!(response, GenericResponse::new(5, ResponseCode::UserNotFound));
    }

    #[tokio::test]
    async fn message_is_pushed_to_recipient() {
        let (handler, _registry) = handler();
        let mut alice = connect(&handler);
        let mut bob = connect(&handler);
        alice.call(login(1, "alice")).await;
        bob.call(login(1, "bob")).await;

        let response = alice.call(message(2, "hello bob", "alice", "bob")).await;
        assert!(response.response_code.is_ok());

        match bob.recv().await {
            Command::ChatMessage(pushed) => {
                assert_eq!(pushed.correlation_id, 0);
                assert_eq!(pushed.text, "hello bob");
                assert_eq!(pushed.from, "alice");
            }
            other => panic!("expected a push, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unauthenticated_message_is_routed_by_default() {
        let (handler, _registry) = handler();
        let mut bob = connect(&handler);
        bob.call(login(1, "bob")).await;

        let mut anonymous = connect(&handler);
        let response = anonymous.call(message(3, "psst", "", "bob")).await;
        assert!(response.response_code.is_ok());
    }

    #[tokio::test]
    async fn strict_mode_rejects_unauthenticated_message() {
        let (handler, registry) = handler();
        let handler = handler.with_require_login(true);
        let mut bob = connect(&handler);
        bob.call(login(1, "bob")).await;

        let mut anonymous = connect(&handler);
        let response = anonymous.call(message(3, "psst", "", "bob")).await;
        assert_eq!(response.response_code, ResponseCode::NotAuthenticated);
        assert_eq!(registry.pending_count("bob").await, Some(0));
    }

    #[tokio::test]
    async fn client_response_frames_are_ignored() {
        let (handler, _registry) = handler();
        let mut alice = connect(&handler);

        alice
            .send(Command::GenericResponse(GenericResponse::new(
                9,
                ResponseCode::Ok,
            )))
            .await;
        let response = alice.call(login(10, "alice")).await;
        assert_eq!(response.correlation_id, 10);
    }

    #[tokio::test]
    async fn malformed_frame_closes_connection() {
        let (handler, registry) = handler();
        let mut alice = connect(&handler);
        alice.call(login(1, "alice")).await;

        // length 4, version 1, unknown key 0x77
        alice
            .writer
            .write_all(&[0, 0, 0, 4, 0, 1, 0, 0x77])
            .await
            .unwrap();

        assert!(alice.task.await.unwrap().is_ok());
        assert!(!registry.is_online("alice").await);
        assert!(alice.reader.read_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn switching_user_releases_previous_identity() {
        let (handler, registry) = handler();
        let mut conn = connect(&handler);

        conn.call(login(1, "alice")).await;
        conn.call(login(2, "bob")).await;
        assert!(!registry.is_online("alice").await);
        assert!(registry.is_online("bob").await);
    }
}
