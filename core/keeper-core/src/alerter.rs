//! Cooldown gate shared by every alert-emitting path.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Disconnect,
    Network,
    Warning,
    Expiry,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Disconnect => "disconnect",
            AlertKind::Network => "network",
            AlertKind::Warning => "warning",
            AlertKind::Expiry => "expiry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertGateEntry {
    pub account_id: AccountId,
    pub kind: AlertKind,
    pub last_sent_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RateLimitedAlerter {
    cooldown: Duration,
    last_sent: Mutex<BTreeMap<(AccountId, AlertKind), DateTime<Utc>>>,
}

impl RateLimitedAlerter {
    pub fn new(cooldown_secs: i64) -> Self {
        RateLimitedAlerter {
            cooldown: Duration::seconds(cooldown_secs.max(0)),
            last_sent: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns true and records `now` when the `(account, kind)` gate is open.
    /// A suppressed call leaves the recorded timestamp untouched.
    pub fn can_send(&self, account: AccountId, kind: AlertKind, now: DateTime<Utc>) -> bool {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);
        match last_sent.get(&(account, kind)) {
            Some(previous) if now - *previous < self.cooldown => false,
            _ => {
                last_sent.insert((account, kind), now);
                true
            }
        }
    }

    pub fn entries(&self) -> Vec<AlertGateEntry> {
        let last_sent = self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);
        last_sent
            .iter()
            .map(|(&(account_id, kind), &last_sent_at)| AlertGateEntry {
                account_id,
                kind,
                last_sent_at,
            })
            .collect()
    }
}
