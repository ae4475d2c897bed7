//! Event feed and tracing setup shared by the switchboard crates.

pub mod event;
pub mod tracing;

pub use self::event::{Event, EventFeed, EventLevel, EventReceiver, InvalidEventLevel};
pub use self::tracing::{
    EVENTS_TARGET, TracingConfig, TracingError, TracingOutputFormat, init_tracing,
};
