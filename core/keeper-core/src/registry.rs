//! Per-account in-memory state.
//!
//! One map guarded by a std mutex. Every accessor locks, reads or writes,
//! and releases before returning, so no caller can hold the lock across an
//! await point. Decisions are re-read from here immediately before acting.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::classify::FailureKind;
use crate::types::AccountId;

#[derive(Debug, Clone)]
pub struct AccountSession<H> {
    pub handle: Option<H>,
    pub initialized: bool,
    pub login_completed: bool,
    pub login_in_progress: bool,
    pub restored_from_file: bool,
    pub logged_in_at: Option<DateTime<Utc>>,
    pub platform_id: Option<String>,
    /// Bumped on every install, so a decision taken against an older handle
    /// can tell the session has been replaced.
    pub generation: u64,
}

impl<H> Default for AccountSession<H> {
    fn default() -> Self {
        AccountSession {
            handle: None,
            initialized: false,
            login_completed: false,
            login_in_progress: false,
            restored_from_file: false,
            logged_in_at: None,
            platform_id: None,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthRecord {
    pub last_incoming_at: Option<DateTime<Utc>>,
    pub last_outgoing_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub retry_attempt: u32,
    pub network_error_since: Option<DateTime<Utc>>,
}

/// Counters feeding the periodic status report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub incoming: u64,
    pub outgoing: u64,
    pub reports_sent: u64,
    pub keep_alives: u64,
}

#[derive(Debug, Clone)]
pub struct AccountEntry<H> {
    pub session: AccountSession<H>,
    pub health: HealthRecord,
    pub stats: SessionStats,
}

impl<H> Default for AccountEntry<H> {
    fn default() -> Self {
        AccountEntry {
            session: AccountSession::default(),
            health: HealthRecord::default(),
            stats: SessionStats::default(),
        }
    }
}

/// A live handle together with the session generation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession<H> {
    pub account: AccountId,
    pub handle: H,
    pub generation: u64,
}

/// Serialisable view of one account, without the handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    pub has_handle: bool,
    pub initialized: bool,
    pub login_completed: bool,
    pub login_in_progress: bool,
    pub restored_from_file: bool,
    pub logged_in_at: Option<DateTime<Utc>>,
    pub platform_id: Option<String>,
    pub generation: u64,
    pub health: HealthRecord,
    pub stats: SessionStats,
}

#[derive(Debug)]
pub struct SessionRegistry<H> {
    accounts: Mutex<BTreeMap<AccountId, AccountEntry<H>>>,
}

impl<H> Default for SessionRegistry<H> {
    fn default() -> Self {
        SessionRegistry {
            accounts: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<H: Clone> SessionRegistry<H> {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    /// Runs `f` against the account's entry, creating it if absent.
    pub fn with_account<R>(&self, account: AccountId, f: impl FnOnce(&mut AccountEntry<H>) -> R) -> R {
        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        f(accounts.entry(account).or_default())
    }

    /// Read-only access that never creates an entry.
    pub fn inspect<R>(&self, account: AccountId, f: impl FnOnce(&AccountEntry<H>) -> R) -> Option<R> {
        let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        accounts.get(&account).map(f)
    }

    pub fn accounts(&self) -> Vec<AccountId> {
        let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        accounts.keys().copied().collect()
    }

    pub fn handle(&self, account: AccountId) -> Option<H> {
        self.inspect(account, |entry| entry.session.handle.clone())
            .flatten()
    }

    /// Accounts with a completed login and a handle, in id order.
    pub fn live_handles(&self) -> Vec<(AccountId, H)> {
        let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        accounts
            .iter()
            .filter(|(_, entry)| entry.session.login_completed)
            .filter_map(|(id, entry)| entry.session.handle.clone().map(|handle| (*id, handle)))
            .collect()
    }

    /// Like [`Self::live_handles`], tagged with each session's generation.
    pub fn live_sessions(&self) -> Vec<LiveSession<H>> {
        let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        accounts
            .iter()
            .filter(|(_, entry)| entry.session.login_completed)
            .filter_map(|(id, entry)| {
                entry.session.handle.clone().map(|handle| LiveSession {
                    account: *id,
                    handle,
                    generation: entry.session.generation,
                })
            })
            .collect()
    }

    pub fn generation(&self, account: AccountId) -> Option<u64> {
        self.inspect(account, |entry| entry.session.generation)
    }

    /// True while session `generation` is the account's live session.
    pub fn is_current(&self, account: AccountId, generation: u64) -> bool {
        self.inspect(account, |entry| Self::entry_is_current(entry, generation))
            .unwrap_or(false)
    }

    fn entry_is_current(entry: &AccountEntry<H>, generation: u64) -> bool {
        entry.session.generation == generation
            && entry.session.login_completed
            && entry.session.handle.is_some()
    }

    pub fn is_live(&self, account: AccountId) -> bool {
        self.inspect(account, |entry| {
            entry.session.login_completed && entry.session.handle.is_some()
        })
        .unwrap_or(false)
    }

    pub fn set_login_in_progress(&self, account: AccountId, in_progress: bool) {
        self.with_account(account, |entry| entry.session.login_in_progress = in_progress);
    }

    /// Installs a live handle. Activity timestamps start at `now` so the
    /// first activity window is clean.
    pub fn install(
        &self,
        account: AccountId,
        handle: H,
        platform_id: Option<String>,
        restored_from_file: bool,
        now: DateTime<Utc>,
    ) {
        self.with_account(account, |entry| {
            let generation = entry.session.generation.wrapping_add(1);
            entry.session = AccountSession {
                handle: Some(handle),
                initialized: true,
                login_completed: true,
                login_in_progress: false,
                restored_from_file,
                logged_in_at: Some(now),
                platform_id,
                generation,
            };
            entry.health = HealthRecord {
                last_incoming_at: Some(now),
                last_outgoing_at: Some(now),
                ..HealthRecord::default()
            };
            entry.stats = SessionStats::default();
        });
    }

    /// Drops the account back to "needs restore" if `generation` is still the
    /// live session. Demotion also clears the consecutive failure count.
    /// Returns false when the session was replaced or already demoted.
    pub fn demote_if_current(&self, account: AccountId, generation: u64) -> bool {
        self.with_account(account, |entry| {
            if !Self::entry_is_current(entry, generation) {
                return false;
            }
            entry.session.login_completed = false;
            entry.session.initialized = false;
            entry.session.login_in_progress = false;
            entry.session.handle = None;
            entry.health.consecutive_failures = 0;
            entry.health.retry_attempt = 0;
            entry.health.network_error_since = None;
            true
        })
    }

    pub fn record_incoming(&self, account: AccountId, now: DateTime<Utc>) {
        self.with_account(account, |entry| {
            entry.health.last_incoming_at = Some(now);
            entry.stats.incoming += 1;
        });
    }

    pub fn record_outgoing(&self, account: AccountId, now: DateTime<Utc>) {
        self.with_account(account, |entry| {
            entry.health.last_outgoing_at = Some(now);
            entry.stats.outgoing += 1;
        });
    }

    pub fn reset_incoming(&self, account: AccountId, now: DateTime<Utc>) {
        self.with_account(account, |entry| entry.health.last_incoming_at = Some(now));
    }

    pub fn record_keep_alive(&self, account: AccountId) {
        self.with_account(account, |entry| entry.stats.keep_alives += 1);
    }

    pub fn record_probe_success(&self, account: AccountId) {
        self.with_account(account, |entry| {
            entry.health.consecutive_failures = 0;
            entry.health.retry_attempt = 0;
            entry.health.network_error_since = None;
        });
    }

    /// Counts one failed health pass against session `generation` and returns
    /// the new consecutive total. `None` if that session is no longer live.
    pub fn record_probe_failure(
        &self,
        account: AccountId,
        generation: u64,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> Option<u32> {
        self.with_account(account, |entry| {
            if !Self::entry_is_current(entry, generation) {
                return None;
            }
            entry.health.consecutive_failures = entry.health.consecutive_failures.saturating_add(1);
            if kind == FailureKind::Network && entry.health.network_error_since.is_none() {
                entry.health.network_error_since = Some(now);
            }
            Some(entry.health.consecutive_failures)
        })
    }

    /// Start of the current network outage, recorded on first sight.
    pub fn note_network_error(&self, account: AccountId, now: DateTime<Utc>) -> DateTime<Utc> {
        self.with_account(account, |entry| *entry.health.network_error_since.get_or_insert(now))
    }

    pub fn set_retry_attempt(&self, account: AccountId, attempt: u32) {
        self.with_account(account, |entry| entry.health.retry_attempt = attempt);
    }

    pub fn health(&self, account: AccountId) -> Option<HealthRecord> {
        self.inspect(account, |entry| entry.health.clone())
    }

    /// Returns the counters and zeroes the per-report message counts.
    pub fn take_report_stats(&self, account: AccountId) -> SessionStats {
        self.with_account(account, |entry| {
            entry.stats.reports_sent += 1;
            let stats = entry.stats;
            entry.stats.incoming = 0;
            entry.stats.outgoing = 0;
            stats
        })
    }

    pub fn snapshot(&self) -> Vec<AccountSnapshot> {
        let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        accounts
            .iter()
            .map(|(id, entry)| AccountSnapshot {
                account_id: *id,
                has_handle: entry.session.handle.is_some(),
                initialized: entry.session.initialized,
                login_completed: entry.session.login_completed,
                login_in_progress: entry.session.login_in_progress,
                restored_from_file: entry.session.restored_from_file,
                logged_in_at: entry.session.logged_in_at,
                platform_id: entry.session.platform_id.clone(),
                generation: entry.session.generation,
                health: entry.health.clone(),
                stats: entry.stats,
            })
            .collect()
    }
}
