//! Session health monitoring.
//!
//! Two independent passes:
//!
//! - The activity pass compares inbound and outbound timestamps. An account
//!   that still sends but has stopped receiving is half-dead and gets its
//!   listener restarted. An account silent in both directions is left alone:
//!   that is usually just an idle account.
//! - The probe pass re-verifies every live session and escalates repeated
//!   failures according to [`escalation_for`].

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alerter::{AlertKind, RateLimitedAlerter};
use crate::classify::FailureKind;
use crate::client::{Notifier, SessionClient};
use crate::clock::Clock;
use crate::config::{ActivityThresholds, EscalationThresholds};
use crate::messages::Messages;
use crate::registry::{HealthRecord, LiveSession, SessionRegistry};
use crate::restore::{RestoreOrchestrator, VerifyOutcome};
use crate::types::AccountId;

// ═══════════════════════════════════════════════════════════════════════════════
// Activity State Machine
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// Outgoing works, incoming has gone quiet.
    HalfDead,
    /// No traffic either way for longer than the silent threshold.
    Silent,
}

pub fn evaluate(record: &HealthRecord, now: DateTime<Utc>, thresholds: &ActivityThresholds) -> HealthState {
    let (Some(incoming), Some(outgoing)) = (record.last_incoming_at, record.last_outgoing_at) else {
        return HealthState::Healthy;
    };
    let half_dead = Duration::seconds(thresholds.half_dead_secs);
    let silent = Duration::seconds(thresholds.silent_secs);
    let since_incoming = now - incoming;
    let since_outgoing = now - outgoing;

    if since_incoming > half_dead && since_outgoing <= half_dead {
        HealthState::HalfDead
    } else if since_incoming > silent && since_outgoing > silent {
        HealthState::Silent
    } else {
        HealthState::Healthy
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Probe Escalation
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeAction {
    /// Keep counting.
    Wait,
    /// Send a cooldown-gated alert of the given kind.
    Warn(AlertKind),
    /// Demote the account and hand it to re-authentication.
    Demote,
}

/// What the probe pass does after `failures` consecutive failures of `kind`.
pub fn escalation_for(kind: FailureKind, failures: u32, thresholds: &EscalationThresholds) -> ProbeAction {
    match kind {
        FailureKind::Auth => ProbeAction::Demote,
        FailureKind::Network if failures >= thresholds.network_escalate => ProbeAction::Demote,
        FailureKind::Network if failures >= thresholds.network_warn => ProbeAction::Warn(AlertKind::Network),
        FailureKind::Network => ProbeAction::Wait,
        FailureKind::Other if failures >= thresholds.other_escalate => ProbeAction::Demote,
        FailureKind::Other if failures == 1 => ProbeAction::Warn(AlertKind::Warning),
        FailureKind::Other => ProbeAction::Wait,
    }
}

/// Outcome of one probe pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub checked: usize,
    pub alive: usize,
    pub warned: Vec<AccountId>,
    /// Accounts demoted during the pass, with the failure that caused it.
    pub demoted: Vec<(AccountId, FailureKind)>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Monitor
// ═══════════════════════════════════════════════════════════════════════════════

pub struct HealthMonitor<C: SessionClient> {
    client: Arc<C>,
    registry: Arc<SessionRegistry<C::Handle>>,
    restore: Arc<RestoreOrchestrator<C>>,
    alerter: Arc<RateLimitedAlerter>,
    notifier: Arc<dyn Notifier>,
    messages: Messages,
    clock: Arc<dyn Clock>,
    activity: ActivityThresholds,
    escalation: EscalationThresholds,
}

impl<C: SessionClient> HealthMonitor<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<C>,
        registry: Arc<SessionRegistry<C::Handle>>,
        restore: Arc<RestoreOrchestrator<C>>,
        alerter: Arc<RateLimitedAlerter>,
        notifier: Arc<dyn Notifier>,
        messages: Messages,
        clock: Arc<dyn Clock>,
        activity: ActivityThresholds,
        escalation: EscalationThresholds,
    ) -> Self {
        HealthMonitor {
            client,
            registry,
            restore,
            alerter,
            notifier,
            messages,
            clock,
            activity,
            escalation,
        }
    }

    /// Activity pass over every live account. Half-dead listeners are restarted.
    pub async fn check_activity(&self) -> Vec<(AccountId, HealthState)> {
        let mut states = Vec::new();
        for (account, handle) in self.registry.live_handles() {
            let Some(record) = self.registry.health(account) else {
                continue;
            };
            let state = evaluate(&record, self.clock.now(), &self.activity);
            match state {
                HealthState::Healthy => {}
                HealthState::HalfDead => {
                    warn!(account_id = %account, "Half-dead connection, restarting listener");
                    self.restart_listener(account, &handle).await;
                }
                HealthState::Silent => {
                    info!(account_id = %account, "No activity in either direction");
                }
            }
            states.push((account, state));
        }
        states
    }

    /// Stop, settle, start. `lastIncomingAt` is reset so the next window is clean.
    pub async fn restart_listener(&self, account: AccountId, handle: &C::Handle) {
        if let Err(err) = self.client.stop_listener(handle).await {
            warn!(account_id = %account, error = %err, "Failed to stop listener");
        }
        tokio::time::sleep(StdDuration::from_millis(self.activity.settle_delay_ms)).await;
        if let Err(err) = self.client.start_listener(handle).await {
            warn!(account_id = %account, error = %err, "Failed to start listener");
        }
        self.registry.reset_incoming(account, self.clock.now());
    }

    /// Probes one live session and counts a failure against it.
    ///
    /// Returns the failure kind when the session must be demoted. Demotion
    /// itself is left to the caller, which has to act before its next await.
    pub async fn probe_session(
        &self,
        session: &LiveSession<C::Handle>,
        report: &mut ProbeReport,
    ) -> Option<FailureKind> {
        let account = session.account;
        if !self.registry.is_current(account, session.generation) {
            debug!(account_id = %account, "Session replaced before probe, skipping");
            return None;
        }
        report.checked += 1;

        let kind = match self.restore.verify(account, &session.handle).await {
            VerifyOutcome::Alive { platform_id } => {
                debug!(account_id = %account, platform_id = %platform_id, "Probe ok");
                report.alive += 1;
                return None;
            }
            VerifyOutcome::Failed { kind, .. } => kind,
        };

        // The session may have been demoted or replaced during the probe.
        let now = self.clock.now();
        let Some(failures) = self
            .registry
            .record_probe_failure(account, session.generation, kind, now)
        else {
            debug!(account_id = %account, kind = kind.as_str(), "Probe failure for a stale session ignored");
            return None;
        };

        match escalation_for(kind, failures, &self.escalation) {
            ProbeAction::Wait => {
                debug!(account_id = %account, failures, kind = kind.as_str(), "Probe failure counted");
                None
            }
            ProbeAction::Warn(alert) => {
                warn!(account_id = %account, failures, kind = kind.as_str(), "Repeated probe failures");
                if self.alerter.can_send(account, alert, now) {
                    let text = match alert {
                        AlertKind::Network => self.messages.network_warning(account, failures, now),
                        _ => self.messages.probe_warning(account, kind, now),
                    };
                    self.notifier.send(account, &text).await;
                    report.warned.push(account);
                }
                None
            }
            ProbeAction::Demote => {
                warn!(account_id = %account, failures, kind = kind.as_str(), "Escalating probe failure");
                Some(kind)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn record(incoming_mins_ago: i64, outgoing_mins_ago: i64) -> HealthRecord {
        HealthRecord {
            last_incoming_at: Some(t0() - Duration::minutes(incoming_mins_ago)),
            last_outgoing_at: Some(t0() - Duration::minutes(outgoing_mins_ago)),
            ..HealthRecord::default()
        }
    }

    #[test]
    fn half_dead_requires_recent_outgoing() {
        let thresholds = ActivityThresholds::default();
        assert_eq!(evaluate(&record(31, 5), t0(), &thresholds), HealthState::HalfDead);
        assert_eq!(evaluate(&record(31, 30), t0(), &thresholds), HealthState::HalfDead);
        assert_eq!(evaluate(&record(30, 5), t0(), &thresholds), HealthState::Healthy);
        assert_eq!(evaluate(&record(31, 31), t0(), &thresholds), HealthState::Healthy);
    }

    #[test]
    fn both_stale_is_silent_not_half_dead() {
        let thresholds = ActivityThresholds::default();
        assert_eq!(evaluate(&record(61, 61), t0(), &thresholds), HealthState::Silent);
        assert_eq!(evaluate(&record(120, 90), t0(), &thresholds), HealthState::Silent);
    }

    #[test]
    fn missing_timestamps_are_healthy() {
        let thresholds = ActivityThresholds::default();
        assert_eq!(evaluate(&HealthRecord::default(), t0(), &thresholds), HealthState::Healthy);
    }

    #[test]
    fn network_escalation_is_two_tier() {
        let thresholds = EscalationThresholds::default();
        for failures in 1..5 {
            assert_eq!(escalation_for(FailureKind::Network, failures, &thresholds), ProbeAction::Wait);
        }
        for failures in 5..10 {
            assert_eq!(
                escalation_for(FailureKind::Network, failures, &thresholds),
                ProbeAction::Warn(AlertKind::Network)
            );
        }
        assert_eq!(escalation_for(FailureKind::Network, 10, &thresholds), ProbeAction::Demote);
    }

    #[test]
    fn auth_demotes_immediately_and_other_after_three() {
        let thresholds = EscalationThresholds::default();
        assert_eq!(escalation_for(FailureKind::Auth, 1, &thresholds), ProbeAction::Demote);
        assert_eq!(
            escalation_for(FailureKind::Other, 1, &thresholds),
            ProbeAction::Warn(AlertKind::Warning)
        );
        assert_eq!(escalation_for(FailureKind::Other, 2, &thresholds), ProbeAction::Wait);
        assert_eq!(escalation_for(FailureKind::Other, 3, &thresholds), ProbeAction::Demote);
    }
}
