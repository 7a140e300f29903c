//! Re-authentication challenge dispatch.
//!
//! Challenge generation has its own per-account cooldown, separate from the
//! text alert gate. The resulting artifact is always dispatched: a challenge
//! that sits in a cooldown queue is useless by the time it arrives.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::client::{Notifier, SessionClient};
use crate::clock::Clock;
use crate::error::{KeeperError, Result};
use crate::messages::Messages;
use crate::types::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReauthEntry {
    pub account_id: AccountId,
    pub last_triggered_at: DateTime<Utc>,
}

pub struct ReauthCoordinator<C> {
    client: Arc<C>,
    notifier: Arc<dyn Notifier>,
    messages: Messages,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    last_triggered: Mutex<BTreeMap<AccountId, DateTime<Utc>>>,
}

impl<C: SessionClient> ReauthCoordinator<C> {
    pub fn new(
        client: Arc<C>,
        notifier: Arc<dyn Notifier>,
        messages: Messages,
        clock: Arc<dyn Clock>,
        cooldown_secs: i64,
    ) -> Self {
        ReauthCoordinator {
            client,
            notifier,
            messages,
            clock,
            cooldown: Duration::seconds(cooldown_secs.max(0)),
            last_triggered: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn can_trigger(&self, account: AccountId) -> bool {
        self.retry_in(account, self.clock.now()).is_none()
    }

    /// Seconds left on the account's cooldown, if any.
    fn retry_in(&self, account: AccountId, now: DateTime<Utc>) -> Option<i64> {
        let last_triggered = self.last_triggered.lock().unwrap_or_else(PoisonError::into_inner);
        let last = last_triggered.get(&account)?;
        let elapsed = now - *last;
        (elapsed < self.cooldown).then(|| (self.cooldown - elapsed).num_seconds().max(1))
    }

    /// Generates a challenge and dispatches it through the alert channel.
    pub async fn trigger(&self, account: AccountId) -> Result<PathBuf> {
        let now = self.clock.now();
        {
            // Claim the slot before the platform call so a concurrent caller
            // sees the cooldown.
            let mut last_triggered = self.last_triggered.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(last) = last_triggered.get(&account) {
                let elapsed = now - *last;
                if elapsed < self.cooldown {
                    return Err(KeeperError::ReauthRateLimited {
                        account,
                        retry_in_secs: (self.cooldown - elapsed).num_seconds().max(1),
                    });
                }
            }
            last_triggered.insert(account, now);
        }

        let path = match self.client.generate_reauth_challenge(account).await {
            Ok(path) => path,
            Err(err) => {
                warn!(account_id = %account, error = %err, "Failed to generate re-auth challenge");
                return Err(err.into());
            }
        };

        let caption = self.messages.reauth_caption(account, now);
        self.notifier.send_artifact(account, &path, &caption).await;
        info!(account_id = %account, path = %path.display(), "Re-auth challenge dispatched");
        Ok(path)
    }

    /// Triggers unless rate limited. Rate limiting and failures are logged.
    pub async fn trigger_if_allowed(&self, account: AccountId) -> Option<PathBuf> {
        match self.trigger(account).await {
            Ok(path) => Some(path),
            Err(KeeperError::ReauthRateLimited { retry_in_secs, .. }) => {
                info!(account_id = %account, retry_in_secs, "Re-auth rate limited");
                None
            }
            Err(_) => None,
        }
    }

    /// Clears the cooldown, typically after a successful login.
    pub fn reset(&self, account: AccountId) {
        let mut last_triggered = self.last_triggered.lock().unwrap_or_else(PoisonError::into_inner);
        last_triggered.remove(&account);
    }

    pub fn entries(&self) -> Vec<ReauthEntry> {
        let last_triggered = self.last_triggered.lock().unwrap_or_else(PoisonError::into_inner);
        last_triggered
            .iter()
            .map(|(&account_id, &last_triggered_at)| ReauthEntry {
                account_id,
                last_triggered_at,
            })
            .collect()
    }
}
