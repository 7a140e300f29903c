//! Periodic per-account status reports.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::client::Notifier;
use crate::messages::Messages;
use crate::registry::SessionRegistry;

pub struct StatusReporter<H> {
    registry: Arc<SessionRegistry<H>>,
    notifier: Arc<dyn Notifier>,
    messages: Messages,
}

impl<H: Clone> StatusReporter<H> {
    pub fn new(registry: Arc<SessionRegistry<H>>, notifier: Arc<dyn Notifier>, messages: Messages) -> Self {
        StatusReporter {
            registry,
            notifier,
            messages,
        }
    }

    /// Sends one report per live account and resets its message counters.
    /// Returns the number of reports sent.
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut sent = 0;
        for (account, _) in self.registry.live_handles() {
            let (logged_in_at, platform_id) = self
                .registry
                .inspect(account, |entry| {
                    (entry.session.logged_in_at, entry.session.platform_id.clone())
                })
                .unwrap_or((None, None));
            let uptime = logged_in_at.map_or_else(Duration::zero, |at| now - at);
            let stats = self.registry.take_report_stats(account);

            let text = self
                .messages
                .status_report(account, platform_id.as_deref(), uptime, &stats, now);
            self.notifier.send(account, &text).await;
            debug!(account_id = %account, report = stats.reports_sent, "Status report sent");
            sent += 1;
        }
        sent
    }
}
