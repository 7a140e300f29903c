//! Credential expiry prediction.
//!
//! A session lives only as long as its weakest session-critical cookie, so
//! the earliest `creation + maxAge` across those cookies is the session's
//! expiry. Cookies without both halves are ignored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alerter::{AlertKind, RateLimitedAlerter};
use crate::client::Notifier;
use crate::config::ExpiryConfig;
use crate::error::Result;
use crate::messages::Messages;
use crate::store::CredentialStore;
use crate::types::{AccountId, CredentialBlob};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryStatus {
    Ok,
    Warning,
    Critical,
    Expired,
}

impl ExpiryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryStatus::Ok => "ok",
            ExpiryStatus::Warning => "warning",
            ExpiryStatus::Critical => "critical",
            ExpiryStatus::Expired => "expired",
        }
    }

    pub fn needs_alert(&self) -> bool {
        !matches!(self, ExpiryStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryRecord {
    pub account_id: AccountId,
    pub expiry_date: DateTime<Utc>,
    /// Floored whole days until expiry; negative once expired.
    pub days_remaining: i64,
    pub status: ExpiryStatus,
}

#[derive(Debug, Clone)]
pub struct ExpiryPredictor {
    config: ExpiryConfig,
}

impl Default for ExpiryPredictor {
    fn default() -> Self {
        ExpiryPredictor::new(ExpiryConfig::default())
    }
}

impl ExpiryPredictor {
    pub fn new(config: ExpiryConfig) -> Self {
        ExpiryPredictor { config }
    }

    /// Earliest expiry across the critical cookies, if any carries a lifetime.
    pub fn expiry_date(&self, blob: &CredentialBlob) -> Option<DateTime<Utc>> {
        blob.cookie
            .cookies
            .iter()
            .filter(|entry| self.config.critical_keys.iter().any(|key| key == &entry.key))
            .filter_map(|entry| entry.expires_at())
            .min()
    }

    pub fn evaluate(&self, blob: &CredentialBlob, now: DateTime<Utc>) -> Option<ExpiryRecord> {
        let expiry_date = self.expiry_date(blob)?;
        let days_remaining = (expiry_date - now).num_seconds().div_euclid(SECONDS_PER_DAY);
        let status = self.classify(expiry_date, days_remaining, now);
        Some(ExpiryRecord {
            account_id: blob.account_id,
            expiry_date,
            days_remaining,
            status,
        })
    }

    fn classify(&self, expiry_date: DateTime<Utc>, days_remaining: i64, now: DateTime<Utc>) -> ExpiryStatus {
        if now >= expiry_date {
            ExpiryStatus::Expired
        } else if days_remaining <= self.config.critical_days {
            ExpiryStatus::Critical
        } else if days_remaining <= self.config.warning_days {
            ExpiryStatus::Warning
        } else {
            ExpiryStatus::Ok
        }
    }

    /// Records for every valid stored credential with a known expiry.
    pub fn check_all(&self, store: &CredentialStore, now: DateTime<Utc>) -> Vec<ExpiryRecord> {
        store
            .load_all()
            .iter()
            .filter_map(|blob| {
                let record = self.evaluate(blob, now);
                if record.is_none() {
                    debug!(account_id = %blob.account_id, "No lifetime on critical cookies");
                }
                record
            })
            .collect()
    }

    pub fn status_for(
        &self,
        store: &CredentialStore,
        account: AccountId,
        now: DateTime<Utc>,
    ) -> Result<Option<ExpiryRecord>> {
        let blob = store.load(account)?;
        Ok(self.evaluate(&blob, now))
    }

    /// The daily pass: one gated text alert per account that is not `Ok`.
    /// Returns the number of alerts sent.
    pub async fn run_check(
        &self,
        store: &CredentialStore,
        alerter: &RateLimitedAlerter,
        notifier: &dyn Notifier,
        messages: &Messages,
        now: DateTime<Utc>,
    ) -> usize {
        let records = self.check_all(store, now);
        let mut sent = 0;
        for record in &records {
            match record.status {
                ExpiryStatus::Ok => {
                    debug!(account_id = %record.account_id, days = record.days_remaining, "Credential lifetime ok");
                    continue;
                }
                ExpiryStatus::Warning => {
                    info!(account_id = %record.account_id, days = record.days_remaining, "Credential expires soon");
                }
                ExpiryStatus::Critical | ExpiryStatus::Expired => {
                    warn!(
                        account_id = %record.account_id,
                        days = record.days_remaining,
                        status = record.status.as_str(),
                        "Credential near or past expiry"
                    );
                }
            }

            if !alerter.can_send(record.account_id, AlertKind::Expiry, now) {
                debug!(account_id = %record.account_id, "Expiry alert suppressed by cooldown");
                continue;
            }
            if let Some(text) = messages.expiry(record, now) {
                notifier.send(record.account_id, &text).await;
                sent += 1;
            }
        }
        info!(checked = records.len(), alerts = sent, "Expiry check complete");
        sent
    }
}
