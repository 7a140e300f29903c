//! Session restoration from stored credentials.
//!
//! Two entry points share the same retry discipline:
//!
//! - [`RestoreOrchestrator::restore`] logs in from a stored blob and verifies
//!   the result with one identity probe. Network and unclassified failures are
//!   retried with backoff; an auth failure marks the credential invalid and
//!   stops at once.
//! - [`RestoreOrchestrator::verify`] re-probes a live handle for the health
//!   pass. Network failures are only retried inside the grace period measured
//!   from the first failure of the current outage.
//!
//! Neither path triggers re-authentication for network failures; that is the
//! caller's decision.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::alerter::{AlertKind, RateLimitedAlerter};
use crate::backoff::RetryPolicy;
use crate::classify::{ErrorClassifier, FailureKind};
use crate::client::{BackendNotifier, BackendStatus, ClientResult, Notifier, RecoveryActions, SessionClient};
use crate::clock::Clock;
use crate::config::{ClientDefaults, ProbeConfig, RestoreConfig};
use crate::messages::Messages;
use crate::reauth::ReauthCoordinator;
use crate::registry::SessionRegistry;
use crate::store::CredentialStore;
use crate::types::{AccountId, CredentialBlob, Credentials};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome<H> {
    Restored {
        handle: H,
        platform_id: String,
        attempts: u32,
    },
    Failed {
        kind: FailureKind,
        attempts: u32,
        /// Raw platform text, for local logs only.
        error: String,
    },
}

impl<H> RestoreOutcome<H> {
    pub fn is_restored(&self) -> bool {
        matches!(self, RestoreOutcome::Restored { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            RestoreOutcome::Restored { .. } => None,
            RestoreOutcome::Failed { kind, .. } => Some(*kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Alive { platform_id: String },
    Failed { kind: FailureKind, error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub total: usize,
    pub restored: usize,
    pub failed: usize,
    pub invalid: usize,
    pub first_account: Option<AccountId>,
}

/// Collaborators needed beyond the platform client.
pub struct RestoreDeps<C: SessionClient> {
    pub store: CredentialStore,
    pub registry: Arc<SessionRegistry<C::Handle>>,
    pub reauth: Arc<ReauthCoordinator<C>>,
    pub alerter: Arc<RateLimitedAlerter>,
    pub notifier: Arc<dyn Notifier>,
    pub backend: Arc<dyn BackendNotifier>,
    pub messages: Messages,
    pub clock: Arc<dyn Clock>,
}

pub struct RestoreOrchestrator<C: SessionClient> {
    client: Arc<C>,
    deps: RestoreDeps<C>,
    classifier: ErrorClassifier,
    restore: RestoreConfig,
    probe: ProbeConfig,
    defaults: ClientDefaults,
}

impl<C: SessionClient> RestoreOrchestrator<C> {
    pub fn new(
        client: Arc<C>,
        deps: RestoreDeps<C>,
        classifier: ErrorClassifier,
        restore: RestoreConfig,
        probe: ProbeConfig,
        defaults: ClientDefaults,
    ) -> Self {
        RestoreOrchestrator {
            client,
            deps,
            classifier,
            restore,
            probe,
            defaults,
        }
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Login material for a blob, filling gaps from the configured defaults.
    pub fn credentials_for(&self, blob: &CredentialBlob) -> Credentials {
        let or_default = |value: &str, fallback: &str| {
            if value.trim().is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        };
        Credentials {
            account_id: blob.account_id,
            cookie: blob.cookie.clone(),
            device_id: or_default(&blob.device_id, &self.defaults.device_id),
            user_agent: or_default(&blob.user_agent, &self.defaults.user_agent),
            language: self.defaults.language.clone(),
        }
    }

    async fn login_and_probe(&self, credentials: &Credentials) -> ClientResult<(C::Handle, String)> {
        let handle = self.client.login(credentials).await?;
        let platform_id = self.client.probe(&handle).await?;
        Ok((handle, platform_id))
    }

    fn backoff(policy: &RetryPolicy, attempt: u32) -> StdDuration {
        policy.delay_for(attempt, &mut rand::thread_rng())
    }

    pub async fn restore(&self, account: AccountId, blob: &CredentialBlob) -> RestoreOutcome<C::Handle> {
        let credentials = self.credentials_for(blob);
        let policy = self.restore.policy;
        let max_attempts = policy.max_attempts.max(1);
        self.deps.registry.set_login_in_progress(account, true);

        let mut attempt = 0;
        let outcome = loop {
            let attempts = attempt + 1;
            match self.login_and_probe(&credentials).await {
                Ok((handle, platform_id)) => {
                    info!(account_id = %account, attempts, platform_id = %platform_id, "Session restored");
                    break RestoreOutcome::Restored {
                        handle,
                        platform_id,
                        attempts,
                    };
                }
                Err(err) => {
                    let kind = self.classifier.classify_error(&err);
                    warn!(
                        account_id = %account,
                        attempt = attempts,
                        max_attempts,
                        kind = kind.as_str(),
                        error = %err,
                        "Restore attempt failed"
                    );

                    if kind == FailureKind::Auth {
                        if let Err(mark_err) = self.deps.store.mark_invalid(account) {
                            error!(account_id = %account, error = %mark_err, "Failed to mark credential invalid");
                        }
                        break RestoreOutcome::Failed {
                            kind,
                            attempts,
                            error: err.message,
                        };
                    }

                    if !policy.has_attempt_after(attempt) {
                        break RestoreOutcome::Failed {
                            kind,
                            attempts,
                            error: err.message,
                        };
                    }

                    let delay = Self::backoff(&policy, attempt);
                    debug!(account_id = %account, delay_ms = delay.as_millis() as u64, "Retrying restore");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        self.deps.registry.set_login_in_progress(account, false);
        outcome
    }

    /// Re-probes a live handle. Success clears the account's failure tracking.
    pub async fn verify(&self, account: AccountId, handle: &C::Handle) -> VerifyOutcome {
        let policy = self.probe.policy;
        let grace = Duration::seconds(self.probe.network_grace_secs);
        let mut attempt = 0;
        loop {
            self.deps.registry.set_retry_attempt(account, attempt);
            let err = match self.client.probe(handle).await {
                Ok(platform_id) => {
                    self.deps.registry.record_probe_success(account);
                    return VerifyOutcome::Alive { platform_id };
                }
                Err(err) => err,
            };

            let kind = self.classifier.classify_error(&err);
            debug!(account_id = %account, attempt, kind = kind.as_str(), error = %err, "Probe failed");
            let retry = match kind {
                FailureKind::Auth => false,
                FailureKind::Network => {
                    let now = self.deps.clock.now();
                    let since = self.deps.registry.note_network_error(account, now);
                    now - since < grace && policy.has_attempt_after(attempt)
                }
                FailureKind::Other => policy.has_attempt_after(attempt),
            };
            if !retry {
                return VerifyOutcome::Failed {
                    kind,
                    error: err.message,
                };
            }

            tokio::time::sleep(Self::backoff(&policy, attempt)).await;
            attempt += 1;
        }
    }

    /// Startup pass: alerts for invalid credentials, then restores every valid one.
    pub async fn restore_all(&self, recovery: &dyn RecoveryActions) -> RestoreSummary {
        let blobs = self.deps.store.load_all();
        let invalid: Vec<_> = self
            .deps
            .store
            .load_invalid()
            .into_iter()
            .filter(|entry| !blobs.iter().any(|blob| blob.account_id == entry.account_id))
            .collect();

        let mut summary = RestoreSummary {
            total: blobs.len(),
            invalid: invalid.len(),
            ..RestoreSummary::default()
        };

        let invalid_spacing = StdDuration::from_secs(self.restore.invalid_spacing_secs);
        for (index, entry) in invalid.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(invalid_spacing).await;
            }
            info!(account_id = %entry.account_id, "Credential marked invalid at startup");
            self.send_disconnect(entry.account_id, FailureKind::Auth).await;
            self.deps.reauth.trigger_if_allowed(entry.account_id).await;
        }

        let spacing = StdDuration::from_secs(self.restore.account_spacing_secs);
        let reauth_delay = StdDuration::from_secs(self.restore.reauth_delay_secs);
        let mut pending_reauth = JoinSet::new();

        for (index, blob) in blobs.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(spacing).await;
            }
            let account = blob.account_id;
            match self.restore(account, blob).await {
                RestoreOutcome::Restored {
                    handle,
                    platform_id,
                    ..
                } => {
                    let now = self.deps.clock.now();
                    self.deps
                        .registry
                        .install(account, handle, Some(platform_id.clone()), true, now);
                    recovery.start_keep_alive(account).await;
                    recovery.start_listener(account).await;
                    recovery.start_health_monitor(account).await;

                    let text = self.deps.messages.restored(account, Some(&platform_id), now);
                    self.deps.notifier.send(account, &text).await;
                    self.deps
                        .backend
                        .report(account, BackendStatus::Connected, "Session restored from file")
                        .await;

                    summary.restored += 1;
                    summary.first_account.get_or_insert(account);
                }
                RestoreOutcome::Failed { kind, attempts, .. } => {
                    summary.failed += 1;
                    warn!(account_id = %account, kind = kind.as_str(), attempts, "Restore gave up");
                    self.send_disconnect(account, kind).await;

                    if kind == FailureKind::Network {
                        continue;
                    }
                    let reauth = Arc::clone(&self.deps.reauth);
                    pending_reauth.spawn(async move {
                        tokio::time::sleep(reauth_delay).await;
                        reauth.trigger_if_allowed(account).await;
                    });
                }
            }
        }

        while let Some(joined) = pending_reauth.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Delayed re-auth task failed");
            }
        }

        info!(
            total = summary.total,
            restored = summary.restored,
            failed = summary.failed,
            invalid = summary.invalid,
            "Startup restore complete"
        );
        summary
    }

    async fn send_disconnect(&self, account: AccountId, kind: FailureKind) {
        let now = self.deps.clock.now();
        if !self.deps.alerter.can_send(account, AlertKind::Disconnect, now) {
            debug!(account_id = %account, "Disconnect alert suppressed by cooldown");
            return;
        }
        let text = self.deps.messages.disconnect(account, kind, now);
        self.deps.notifier.send(account, &text).await;
    }
}
