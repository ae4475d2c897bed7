//! Periodic user status report.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use switchboard_core::EventFeed;

use crate::registry::{UserRegistry, UserStatus};

/// Spawns a task that emits a status report every `period`.
///
/// The first report fires one full period after the call. The task runs
/// until it is aborted.
pub fn spawn_status_reporter(
    registry: Arc<UserRegistry>,
    feed: EventFeed,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let statuses = registry.snapshot().await;
            feed.info(format_status_report(&statuses));
        }
    })
}

/// Renders one report, a line per user.
pub fn format_status_report(statuses: &[UserStatus]) -> String {
    if statuses.is_empty() {
        return "Users status: no users".to_string();
    }
    let mut report = String::from("Users status:");
    for status in statuses {
        report.push_str("\n ");
        report.push_str(&status.to_string());
    }
    report
}
