//! Session manager facade.
//!
//! Owns every piece of per-process state (live handles, health records, alert
//! gates, re-auth cooldowns) and the timers that drive the components. One
//! instance is built at process start; clones share the same state.
//!
//! # Timers
//!
//! Each responsibility gets its own tokio task on a fixed interval:
//!
//! | timer        | work                                         |
//! |--------------|----------------------------------------------|
//! | save         | snapshot live cookies into the store         |
//! | health       | probe pass with failure escalation           |
//! | activity     | half-dead detection and listener restart     |
//! | keep-alive   | keep-alive call per live session             |
//! | status       | periodic status report per live session      |
//! | expiry       | cookie expiry prediction and alerts          |
//!
//! A tick runs to completion before the same timer ticks again. Different
//! timers may interleave on one account; every decision re-reads the
//! registry right before acting.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::alerter::{AlertGateEntry, AlertKind, RateLimitedAlerter};
use crate::classify::{ErrorClassifier, FailureKind};
use crate::client::{BackendNotifier, BackendStatus, Notifier, RecoveryActions, SessionClient};
use crate::clock::{Clock, SystemClock};
use crate::config::KeeperConfig;
use crate::error::Result;
use crate::expiry::ExpiryPredictor;
use crate::health::{HealthMonitor, ProbeReport};
use crate::keepalive::KeepAliveScheduler;
use crate::messages::Messages;
use crate::reauth::{ReauthCoordinator, ReauthEntry};
use crate::registry::{AccountSnapshot, SessionRegistry};
use crate::restore::{RestoreDeps, RestoreOrchestrator, RestoreSummary};
use crate::status::StatusReporter;
use crate::store::CredentialStore;
use crate::types::{AccountId, CookieJar, CredentialBlob};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Save,
    Health,
    Activity,
    KeepAlive,
    StatusReport,
    Expiry,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::Save => "save",
            TimerKind::Health => "health",
            TimerKind::Activity => "activity",
            TimerKind::KeepAlive => "keep_alive",
            TimerKind::StatusReport => "status_report",
            TimerKind::Expiry => "expiry",
        }
    }
}

/// External collaborators handed to [`SessionManager::new`].
pub struct Collaborators<C> {
    pub client: Arc<C>,
    pub notifier: Arc<dyn Notifier>,
    pub backend: Arc<dyn BackendNotifier>,
    pub clock: Arc<dyn Clock>,
}

impl<C> Collaborators<C> {
    pub fn new(client: Arc<C>, notifier: Arc<dyn Notifier>, backend: Arc<dyn BackendNotifier>) -> Self {
        Collaborators {
            client,
            notifier,
            backend,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Debug view of the whole manager.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub accounts: Vec<AccountSnapshot>,
    pub alert_gates: Vec<AlertGateEntry>,
    pub reauth: Vec<ReauthEntry>,
    pub timers: Vec<TimerKind>,
    pub stopped: bool,
}

pub struct SessionManager<C: SessionClient> {
    inner: Arc<Inner<C>>,
}

impl<C: SessionClient> Clone for SessionManager<C> {
    fn clone(&self) -> Self {
        SessionManager {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: SessionClient> fmt::Debug for SessionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions_dir", &self.inner.store.dir())
            .field("accounts", &self.inner.registry.accounts())
            .finish()
    }
}

struct Inner<C: SessionClient> {
    config: KeeperConfig,
    client: Arc<C>,
    store: CredentialStore,
    registry: Arc<SessionRegistry<C::Handle>>,
    alerter: Arc<RateLimitedAlerter>,
    reauth: Arc<ReauthCoordinator<C>>,
    restore: Arc<RestoreOrchestrator<C>>,
    health: HealthMonitor<C>,
    keep_alive: KeepAliveScheduler<C>,
    status: StatusReporter<C::Handle>,
    expiry: ExpiryPredictor,
    notifier: Arc<dyn Notifier>,
    backend: Arc<dyn BackendNotifier>,
    messages: Messages,
    clock: Arc<dyn Clock>,
    timers: Mutex<BTreeMap<TimerKind, JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl<C: SessionClient> SessionManager<C> {
    pub fn new(config: KeeperConfig, collaborators: Collaborators<C>) -> Self {
        let Collaborators {
            client,
            notifier,
            backend,
            clock,
        } = collaborators;

        let store = CredentialStore::new(
            config.storage.sessions_dir.clone(),
            config.storage.file_prefix.clone(),
        );
        let registry = Arc::new(SessionRegistry::new());
        let messages = Messages::new(&config.alerts);
        let alerter = Arc::new(RateLimitedAlerter::new(config.alerts.cooldown_secs));
        let reauth = Arc::new(ReauthCoordinator::new(
            Arc::clone(&client),
            Arc::clone(&notifier),
            messages.clone(),
            Arc::clone(&clock),
            config.alerts.reauth_cooldown_secs,
        ));
        let restore = Arc::new(RestoreOrchestrator::new(
            Arc::clone(&client),
            RestoreDeps {
                store: store.clone(),
                registry: Arc::clone(&registry),
                reauth: Arc::clone(&reauth),
                alerter: Arc::clone(&alerter),
                notifier: Arc::clone(&notifier),
                backend: Arc::clone(&backend),
                messages: messages.clone(),
                clock: Arc::clone(&clock),
            },
            ErrorClassifier::new(&config.classifier),
            config.restore.clone(),
            config.probe.clone(),
            config.client.clone(),
        ));
        let health = HealthMonitor::new(
            Arc::clone(&client),
            Arc::clone(&registry),
            Arc::clone(&restore),
            Arc::clone(&alerter),
            Arc::clone(&notifier),
            messages.clone(),
            Arc::clone(&clock),
            config.activity,
            config.probe.escalation,
        );
        let keep_alive = KeepAliveScheduler::new(Arc::clone(&client), Arc::clone(&registry));
        let status = StatusReporter::new(Arc::clone(&registry), Arc::clone(&notifier), messages.clone());
        let expiry = ExpiryPredictor::new(config.expiry.clone());
        let (shutdown, _) = watch::channel(false);

        SessionManager {
            inner: Arc::new(Inner {
                config,
                client,
                store,
                registry,
                alerter,
                reauth,
                restore,
                health,
                keep_alive,
                status,
                expiry,
                notifier,
                backend,
                messages,
                clock,
                timers: Mutex::new(BTreeMap::new()),
                shutdown,
            }),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn registry(&self) -> &SessionRegistry<C::Handle> {
        &self.inner.registry
    }

    pub fn reauth(&self) -> &ReauthCoordinator<C> {
        &self.inner.reauth
    }

    pub fn restorer(&self) -> &RestoreOrchestrator<C> {
        &self.inner.restore
    }

    pub fn health_monitor(&self) -> &HealthMonitor<C> {
        &self.inner.health
    }

    pub fn expiry(&self) -> &ExpiryPredictor {
        &self.inner.expiry
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════════

    /// Restores stored sessions and starts the process-wide timers.
    pub async fn start(&self) -> RestoreSummary {
        info!(sessions_dir = %self.inner.store.dir().display(), "Session manager starting");
        let summary = self.inner.restore.restore_all(self).await;

        self.ensure_timer(TimerKind::Save);
        self.ensure_timer(TimerKind::Expiry);
        if self.inner.config.schedule.status_reports_enabled {
            self.ensure_timer(TimerKind::StatusReport);
        }
        summary
    }

    /// Stops scheduling ticks, waits for in-flight ticks, then saves once more.
    pub async fn stop(&self) {
        self.inner.shutdown.send_replace(true);
        let handles: Vec<(TimerKind, JoinHandle<()>)> = {
            let mut timers = self.inner.timers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *timers).into_iter().collect()
        };
        for (kind, handle) in handles {
            if let Err(err) = handle.await {
                error!(timer = kind.as_str(), error = %err, "Timer task failed");
            }
        }
        let saved = self.force_save().await;
        info!(saved, "Session manager stopped");
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    fn ensure_timer(&self, kind: TimerKind) {
        if self.is_stopped() {
            return;
        }
        let mut timers = self.inner.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if timers.get(&kind).is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let (first, period) = self.timer_schedule(kind);
        let mut shutdown = self.inner.shutdown.subscribe();
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
                manager.run_tick(kind).await;
            }
            debug!(timer = kind.as_str(), "Timer stopped");
        });
        debug!(timer = kind.as_str(), period_secs = period.as_secs(), "Timer started");
        timers.insert(kind, handle);
    }

    fn timer_schedule(&self, kind: TimerKind) -> (StdDuration, StdDuration) {
        let schedule = &self.inner.config.schedule;
        let (first, period) = match kind {
            TimerKind::Save => (schedule.initial_save_delay_secs, schedule.save_interval_secs),
            TimerKind::Health => (schedule.health_check_interval_secs, schedule.health_check_interval_secs),
            TimerKind::Activity => (
                schedule.activity_check_interval_secs,
                schedule.activity_check_interval_secs,
            ),
            TimerKind::KeepAlive => (
                schedule.initial_keep_alive_delay_secs,
                schedule.keep_alive_interval_secs,
            ),
            TimerKind::StatusReport => (
                schedule.initial_status_report_delay_secs,
                schedule.status_report_interval_secs,
            ),
            TimerKind::Expiry => (
                schedule.initial_expiry_check_delay_secs,
                schedule.expiry_check_interval_secs,
            ),
        };
        // A zero period would make `interval_at` panic.
        (StdDuration::from_secs(first), StdDuration::from_secs(period.max(1)))
    }

    async fn run_tick(&self, kind: TimerKind) {
        match kind {
            TimerKind::Save => {
                self.force_save().await;
            }
            TimerKind::Health => {
                self.health_tick().await;
            }
            TimerKind::Activity => {
                self.inner.health.check_activity().await;
            }
            TimerKind::KeepAlive => {
                let report = self.inner.keep_alive.tick().await;
                debug!(sent = report.sent, failed = report.failed, "Keep-alive tick");
            }
            TimerKind::StatusReport => {
                self.inner.status.tick(self.inner.clock.now()).await;
            }
            TimerKind::Expiry => {
                self.expiry_tick().await;
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Ticks
    // ═══════════════════════════════════════════════════════════════════════════

    /// One probe pass. An escalated account is demoted right after its own
    /// probe, and only if the probed session is still the live one.
    pub async fn health_tick(&self) -> ProbeReport {
        let mut report = ProbeReport::default();
        for session in self.inner.registry.live_sessions() {
            let Some(kind) = self.inner.health.probe_session(&session, &mut report).await else {
                continue;
            };
            if self.demote(session.account, session.generation, kind).await {
                report.demoted.push((session.account, kind));
            }
        }
        report
    }

    pub async fn expiry_tick(&self) -> usize {
        let inner = &self.inner;
        inner
            .expiry
            .run_check(
                &inner.store,
                &inner.alerter,
                inner.notifier.as_ref(),
                &inner.messages,
                inner.clock.now(),
            )
            .await
    }

    /// Snapshots every live session's cookie into the store. Returns the number saved.
    pub async fn force_save(&self) -> usize {
        let mut saved = 0;
        for (account, handle) in self.inner.registry.live_handles() {
            match self.save_account(account, &handle).await {
                Ok(()) => saved += 1,
                Err(err) => warn!(account_id = %account, error = %err, "Failed to save credential"),
            }
        }
        debug!(saved, "Credential snapshot complete");
        saved
    }

    async fn save_account(&self, account: AccountId, handle: &C::Handle) -> Result<()> {
        let cookie = self.inner.client.current_cookie(handle).await?;
        let defaults = &self.inner.config.client;
        let (device_id, user_agent) = match self.inner.store.load(account) {
            Ok(previous) => (previous.device_id, previous.user_agent),
            Err(_) => (defaults.device_id.clone(), defaults.user_agent.clone()),
        };
        self.persist(account, cookie, device_id, user_agent)
    }

    fn persist(
        &self,
        account: AccountId,
        cookie: CookieJar,
        device_id: String,
        user_agent: String,
    ) -> Result<()> {
        let defaults = &self.inner.config.client;
        let pick = |value: String, fallback: &str| {
            if value.trim().is_empty() {
                fallback.to_string()
            } else {
                value
            }
        };
        let blob = CredentialBlob::new(
            account,
            cookie,
            pick(device_id, &defaults.device_id),
            pick(user_agent, &defaults.user_agent),
            self.inner.clock.now(),
        );
        self.inner.store.save(&blob)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Session Events
    // ═══════════════════════════════════════════════════════════════════════════

    /// Adopts a session established interactively (after a challenge was consumed).
    pub async fn register_login(
        &self,
        account: AccountId,
        handle: C::Handle,
        device_id: &str,
        user_agent: &str,
    ) -> Result<()> {
        let platform_id = match self.inner.client.probe(&handle).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(account_id = %account, error = %err, "Identity probe after login failed");
                None
            }
        };
        let now = self.inner.clock.now();
        self.inner
            .registry
            .install(account, handle.clone(), platform_id.clone(), false, now);

        let saved = match self.inner.client.current_cookie(&handle).await {
            Ok(cookie) => self.persist(account, cookie, device_id.to_string(), user_agent.to_string()),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = &saved {
            warn!(account_id = %account, error = %err, "Failed to save credential after login");
        }

        self.notify_connection_restored(account, platform_id.as_deref()).await;
        self.ensure_timer(TimerKind::KeepAlive);
        self.ensure_timer(TimerKind::Health);
        self.ensure_timer(TimerKind::Activity);
        info!(account_id = %account, "Login registered");
        saved
    }

    pub async fn notify_connection_restored(&self, account: AccountId, platform_id: Option<&str>) {
        let now = self.inner.clock.now();
        let text = self.inner.messages.restored(account, platform_id, now);
        self.inner.notifier.send(account, &text).await;
        self.inner
            .backend
            .report(account, BackendStatus::Connected, "Session connected")
            .await;
        self.inner.registry.record_probe_success(account);
        self.inner.reauth.reset(account);
    }

    /// Gated disconnect alert, backend `expired` report, then a re-auth
    /// challenge unless skipped or rate limited.
    pub async fn handle_session_expired(&self, account: AccountId, reason: &str, skip_reauth: bool) {
        let now = self.inner.clock.now();
        let text = self.inner.messages.disconnect_with_reason(account, reason, now);
        self.escalate(account, &text, reason, skip_reauth).await;
    }

    async fn demote(&self, account: AccountId, generation: u64, kind: FailureKind) -> bool {
        if !self.inner.registry.demote_if_current(account, generation) {
            debug!(account_id = %account, "Session replaced since probe, not demoting");
            return false;
        }
        warn!(account_id = %account, kind = kind.as_str(), "Demoting session");
        if kind == FailureKind::Auth {
            if let Err(err) = self.inner.store.mark_invalid(account) {
                error!(account_id = %account, error = %err, "Failed to mark credential invalid");
            }
        }
        let now = self.inner.clock.now();
        let text = self.inner.messages.disconnect(account, kind, now);
        let reason = format!("Health check failed ({})", kind.as_str());
        self.escalate(account, &text, &reason, false).await;
        true
    }

    async fn escalate(&self, account: AccountId, alert_text: &str, backend_message: &str, skip_reauth: bool) {
        let now = self.inner.clock.now();
        if self.inner.alerter.can_send(account, AlertKind::Disconnect, now) {
            self.inner.notifier.send(account, alert_text).await;
        } else {
            debug!(account_id = %account, "Disconnect alert suppressed by cooldown");
        }
        self.inner
            .backend
            .report(account, BackendStatus::Expired, backend_message)
            .await;
        if !skip_reauth {
            self.inner.reauth.trigger_if_allowed(account).await;
        }
    }

    pub fn record_incoming(&self, account: AccountId) {
        self.inner.registry.record_incoming(account, self.inner.clock.now());
    }

    pub fn record_outgoing(&self, account: AccountId) {
        self.inner.registry.record_outgoing(account, self.inner.clock.now());
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        let timers = {
            let timers = self.inner.timers.lock().unwrap_or_else(PoisonError::into_inner);
            timers
                .iter()
                .filter(|(_, handle)| !handle.is_finished())
                .map(|(kind, _)| *kind)
                .collect()
        };
        ManagerSnapshot {
            accounts: self.inner.registry.snapshot(),
            alert_gates: self.inner.alerter.entries(),
            reauth: self.inner.reauth.entries(),
            timers,
            stopped: self.is_stopped(),
        }
    }
}

#[async_trait]
impl<C: SessionClient> RecoveryActions for SessionManager<C> {
    async fn start_listener(&self, account: AccountId) {
        let Some(handle) = self.inner.registry.handle(account) else {
            return;
        };
        if let Err(err) = self.inner.client.start_listener(&handle).await {
            warn!(account_id = %account, error = %err, "Failed to start listener");
        }
    }

    async fn stop_listener(&self, account: AccountId) {
        let Some(handle) = self.inner.registry.handle(account) else {
            return;
        };
        if let Err(err) = self.inner.client.stop_listener(&handle).await {
            warn!(account_id = %account, error = %err, "Failed to stop listener");
        }
    }

    async fn start_keep_alive(&self, _account: AccountId) {
        self.ensure_timer(TimerKind::KeepAlive);
    }

    async fn start_health_monitor(&self, _account: AccountId) {
        self.ensure_timer(TimerKind::Health);
        self.ensure_timer(TimerKind::Activity);
    }
}
