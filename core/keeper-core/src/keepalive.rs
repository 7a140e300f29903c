//! Periodic keep-alive calls.
//!
//! Failures are only logged. A broken session shows up in the next probe pass,
//! which is where recovery decisions are made.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::client::SessionClient;
use crate::registry::SessionRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAliveReport {
    pub sent: usize,
    pub failed: usize,
}

pub struct KeepAliveScheduler<C: SessionClient> {
    client: Arc<C>,
    registry: Arc<SessionRegistry<C::Handle>>,
}

impl<C: SessionClient> KeepAliveScheduler<C> {
    pub fn new(client: Arc<C>, registry: Arc<SessionRegistry<C::Handle>>) -> Self {
        KeepAliveScheduler { client, registry }
    }

    pub async fn tick(&self) -> KeepAliveReport {
        let mut report = KeepAliveReport::default();
        for (account, handle) in self.registry.live_handles() {
            match self.client.keep_alive(&handle).await {
                Ok(()) => {
                    self.registry.record_keep_alive(account);
                    report.sent += 1;
                    debug!(account_id = %account, "Keep-alive sent");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(account_id = %account, error = %err, "Keep-alive failed");
                }
            }
        }
        report
    }
}
