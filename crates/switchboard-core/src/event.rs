//! Leveled, timestamped notification feed.
//!
//! The server side of switchboard reports every state transition (logins,
//! accepted and delivered messages, closed connections, ...) as an [`Event`].
//! Events go to two places:
//!
//! - the `tracing` subscriber, under the `switchboard::events` target, so a
//!   deployment with no consumer still gets a complete log;
//! - an unbounded channel, when the feed was created with
//!   [`EventFeed::channel`], for an external display to consume.
//!
//! Emitting never blocks. The channel is unbounded so that no event is ever
//! dropped while a receiver is alive.

use std::fmt;

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::tracing::EVENTS_TARGET;

/// Receiving end of an [`EventFeed`].
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Severity of an [`Event`].
///
/// Encoded externally as `1..=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventLevel {
    Info = 1,
    Notice = 2,
    Warning = 3,
    Error = 4,
}

impl EventLevel {
    /// Returns the external numeric encoding of the level.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns a short uppercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Notice => "NOTICE",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when converting an out-of-range number into an [`EventLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid event level: {0} (expected 1..=4)")]
pub struct InvalidEventLevel(pub u8);

impl TryFrom<u8> for EventLevel {
    type Error = InvalidEventLevel;

    fn try_from(value: u8) -> Result<Self, InvalidEventLevel> {
        match value {
            1 => Ok(Self::Info),
            2 => Ok(Self::Notice),
            3 => Ok(Self::Warning),
            4 => Ok(Self::Error),
            other => Err(InvalidEventLevel(other)),
        }
    }
}

/// A single notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp: DateTime<Local>,
    pub level: EventLevel,
    pub message: String,
}

impl Event {
    /// Creates an event stamped with the current local time.
    pub fn new(level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }

    fn trace(&self) {
        match self.level {
            EventLevel::Info | EventLevel::Notice => {
                ::tracing::info!(target: EVENTS_TARGET, level = %self.level, "{}", self.message)
            }
            EventLevel::Warning => {
                ::tracing::warn!(target: EVENTS_TARGET, "{}", self.message)
            }
            EventLevel::Error => {
                ::tracing::error!(target: EVENTS_TARGET, "{}", self.message)
            }
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Cheap-to-clone emitter handle.
#[derive(Debug, Clone, Default)]
pub struct EventFeed {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl EventFeed {
    /// Creates a feed together with the receiver an external consumer reads from.
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Creates a feed that only mirrors events to `tracing`.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Returns true if events are forwarded to a receiver that is still alive.
    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Emits an event at the given level.
    pub fn emit(&self, level: EventLevel, message: impl Into<String>) {
        let event = Event::new(level, message);
        event.trace();
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is displaying events anymore.
            let _ = tx.send(event);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(EventLevel::Info, message);
    }

    pub fn notice(&self, message: impl Into<String>) {
        self.emit(EventLevel::Notice, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(EventLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(EventLevel::Error, message);
    }
}
