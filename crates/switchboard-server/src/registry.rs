//! User registry and per-user store-and-forward mailboxes.
//!
//! The registry maps each username to a [`Session`] for the whole lifetime of
//! the process: entries are created on first login and never removed, a
//! disconnect only flips the session offline.
//!
//! Each session owns a FIFO mailbox and a dedicated delivery routine. The
//! routine sleeps on a coalescing wake-up signal; on wake it takes the whole
//! queue under the mailbox lock and writes the messages to the connection the
//! session is currently bound to. A message enqueued while the user is offline
//! stays queued until the next login rebinds the writer and wakes the routine.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::sync::{Notify, RwLock, watch};
use tracing::debug;

use switchboard_core::EventFeed;
use switchboard_protocol::{ChatMessage, Command, ResponseCode, SharedWriter};

/// Server-side state of one username.
pub struct Session {
    username: String,
    mailbox: Mutex<Mailbox>,
    notify: Notify,
}

struct Mailbox {
    online: bool,
    last_login: DateTime<Local>,
    writer: Option<SharedWriter>,
    pending: VecDeque<ChatMessage>,
}

impl Session {
    fn new(username: String, writer: SharedWriter) -> Self {
        Self {
            username,
            mailbox: Mutex::new(Mailbox {
                online: true,
                last_login: Local::now(),
                writer: Some(writer),
                pending: VecDeque::new(),
            }),
            notify: Notify::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_online(&self) -> bool {
        self.mailbox.lock().online
    }

    pub fn last_login(&self) -> DateTime<Local> {
        self.mailbox.lock().last_login
    }

    /// Number of messages waiting for the next drain.
    pub fn pending_count(&self) -> usize {
        self.mailbox.lock().pending.len()
    }

    pub fn status(&self) -> UserStatus {
        let mailbox = self.mailbox.lock();
        UserStatus {
            username: self.username.clone(),
            online: mailbox.online,
            last_login: mailbox.last_login,
        }
    }

    /// Binds `writer` and flags the session online, unless it already is.
    fn try_bind(&self, writer: SharedWriter) -> bool {
        let mut mailbox = self.mailbox.lock();
        if mailbox.online {
            return false;
        }
        mailbox.online = true;
        mailbox.last_login = Local::now();
        mailbox.writer = Some(writer);
        true
    }

    /// Flags the session offline if it is still bound to `writer`.
    ///
    /// Returns false when a different connection owns the session.
    pub fn release(&self, writer: &SharedWriter) -> bool {
        let mut mailbox = self.mailbox.lock();
        let owned = mailbox
            .writer
            .as_ref()
            .is_some_and(|bound| bound.same_connection(writer));
        if !owned {
            return false;
        }
        mailbox.online = false;
        mailbox.writer = None;
        true
    }

    /// Flags the session offline and hands back whatever writer it was bound to.
    fn disconnect(&self) -> Option<SharedWriter> {
        let mut mailbox = self.mailbox.lock();
        mailbox.online = false;
        mailbox.writer.take()
    }

    /// Wakes the delivery routine. Wake-ups coalesce into a single pending one.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    fn enqueue(&self, message: ChatMessage, feed: &EventFeed) {
        let from = message.from.clone();
        let online = {
            let mut mailbox = self.mailbox.lock();
            mailbox.pending.push_back(message);
            mailbox.online
        };

        if online {
            self.wake();
        } else {
            feed.notice(format!(
                "User {} is offline and received a message from {}",
                self.username, from
            ));
        }
    }

    /// Delivers everything queued so far to the bound writer.
    ///
    /// Messages enqueued while this runs are left for the next drain. A write
    /// failure drops the rest of the batch, flags the session offline and
    /// closes the connection, so later messages wait for the next login.
    async fn drain(&self, feed: &EventFeed) {
        let (writer, batch) = {
            let mut mailbox = self.mailbox.lock();
            let writer = match (&mailbox.writer, mailbox.online) {
                (Some(writer), true) => writer.clone(),
                _ => return,
            };
            (writer, std::mem::take(&mut mailbox.pending))
        };

        let mut batch = batch.into_iter();
        while let Some(message) = batch.next() {
            if message.to != self.username {
                feed.warning(format!(
                    "Message from {} to {} not sent: mailbox belongs to {}",
                    message.from, message.to, self.username
                ));
                continue;
            }

            let from = message.from.clone();
            let push = ChatMessage {
                correlation_id: 0,
                ..message
            };
            match writer.send(&Command::ChatMessage(push)).await {
                Ok(()) => {
                    feed.info(format!("Sent message from {} to {}", from, self.username));
                }
                Err(e) => {
                    let dropped = batch.len() + 1;
                    feed.error(format!(
                        "Error sending message to {}: {} ({} message(s) dropped)",
                        self.username, e, dropped
                    ));
                    // The stream may hold a partial frame: the connection is done.
                    self.release(&writer);
                    if let Err(e) = writer.shutdown().await {
                        debug!(username = %self.username, error = %e, "Connection already closed");
                    }
                    break;
                }
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mailbox = self.mailbox.lock();
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("online", &mailbox.online)
            .field("last_login", &mailbox.last_login)
            .field("pending", &mailbox.pending.len())
            .finish()
    }
}

/// Point-in-time view of one user, used by the status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatus {
    pub username: String,
    pub online: bool,
    pub last_login: DateTime<Local>,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is {}, last Login: {}",
            self.username,
            if self.online { "online" } else { "offline" },
            self.last_login.format("%a, %d %b %Y %H:%M:%S %Z")
        )
    }
}

/// Result of a login attempt.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// First login for this username.
    New(Arc<Session>),
    /// The username was known and offline; its writer has been rebound.
    Reconnected(Arc<Session>),
    /// The username is bound to a live connection.
    AlreadyOnline,
}

/// Global username to session map.
pub struct UserRegistry {
    users: RwLock<HashMap<String, Arc<Session>>>,
    feed: EventFeed,
    shutdown: watch::Sender<bool>,
}

impl UserRegistry {
    pub fn new(feed: EventFeed) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            users: RwLock::new(HashMap::new()),
            feed,
            shutdown,
        }
    }

    /// Binds `username` to the connection behind `writer`.
    ///
    /// The check for an online session and the rebind happen under the
    /// registry write lock, so two concurrent logins cannot both succeed.
    /// The caller wakes the session once its login response is on the wire.
    pub async fn login(&self, username: &str, writer: SharedWriter) -> LoginOutcome {
        let mut users = self.users.write().await;
        if let Some(session) = users.get(username) {
            return if session.try_bind(writer) {
                LoginOutcome::Reconnected(session.clone())
            } else {
                LoginOutcome::AlreadyOnline
            };
        }

        let session = Arc::new(Session::new(username.to_string(), writer));
        users.insert(username.to_string(), session.clone());
        tokio::spawn(run_delivery(
            session.clone(),
            self.feed.clone(),
            self.shutdown.subscribe(),
        ));
        LoginOutcome::New(session)
    }

    /// Accepts `message` into the recipient's mailbox.
    ///
    /// `Ok` acknowledges acceptance, not delivery.
    pub async fn route(&self, message: ChatMessage) -> ResponseCode {
        match self.get(&message.to).await {
            Some(session) => {
                session.enqueue(message, &self.feed);
                ResponseCode::Ok
            }
            None => ResponseCode::UserNotFound,
        }
    }

    pub async fn get(&self, username: &str) -> Option<Arc<Session>> {
        self.users.read().await.get(username).cloned()
    }

    pub async fn is_online(&self, username: &str) -> bool {
        self.get(username)
            .await
            .is_some_and(|session| session.is_online())
    }

    pub async fn pending_count(&self, username: &str) -> Option<usize> {
        self.get(username).await.map(|session| session.pending_count())
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    /// Status of every known user, sorted by username.
    pub async fn snapshot(&self) -> Vec<UserStatus> {
        let mut statuses: Vec<UserStatus> = self
            .users
            .read()
            .await
            .values()
            .map(|session| session.status())
            .collect();
        statuses.sort_by(|a, b| a.username.cmp(&b.username));
        statuses
    }

    /// Stops every delivery routine, then flags every user offline and
    /// closes the connections they were bound to.
    pub async fn shutdown(&self) {
        self.stop_delivery();
        let sessions: Vec<Arc<Session>> = self.users.read().await.values().cloned().collect();
        for session in sessions {
            if let Some(writer) = session.disconnect()
                && let Err(e) = writer.shutdown().await
            {
                debug!(username = %session.username, error = %e, "Connection already closed");
            }
        }
    }

    fn stop_delivery(&self) {
        self.shutdown.send_replace(true);
    }
}

impl Drop for UserRegistry {
    fn drop(&mut self) {
        self.stop_delivery();
    }
}

async fn run_delivery(session: Arc<Session>, feed: EventFeed, mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    loop {
        tokio::select! {
            _ = session.notify.notified() => session.drain(&feed).await,
            _ = shutdown.changed() => break,
        }
    }
    debug!(username = %session.username, "Delivery routine stopped");
}
