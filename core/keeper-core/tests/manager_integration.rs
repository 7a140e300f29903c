mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use common::*;
use keeper_core::keepalive::KeepAliveScheduler;
use keeper_core::status::StatusReporter;
use keeper_core::{
    AccountId, BackendStatus, Clock, Messages, Notifier, SessionRegistry, TimerKind,
};

#[tokio::test(start_paused = true)]
async fn register_login_saves_notifies_and_starts_timers() {
    let h = harness();
    let account = AccountId(21);

    h.manager
        .register_login(account, 21, "imei-21", "agent/9")
        .await
        .expect("register login");

    let saved = h.manager.store().load(account).expect("saved blob");
    assert_eq!(saved.device_id, "imei-21");
    assert_eq!(saved.user_agent, "agent/9");
    assert_eq!(saved.cookie.cookies[0].value, "fresh-21");
    assert_eq!(saved.saved_at, Some(t0()));

    assert!(h.manager.registry().is_live(account));
    let texts = h.notifier.texts_for(account);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("uid-21"));
    assert_eq!(h.backend.statuses_for(account), vec![BackendStatus::Connected]);

    let snapshot = h.manager.snapshot();
    for kind in [TimerKind::KeepAlive, TimerKind::Health, TimerKind::Activity] {
        assert!(snapshot.timers.contains(&kind), "{kind:?} running");
    }

    h.manager.stop().await;
    let snapshot = h.manager.snapshot();
    assert!(snapshot.stopped);
    assert!(snapshot.timers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn connection_restored_resets_failures_and_reauth_cooldown() {
    let h = harness();
    let account = AccountId(22);
    h.manager
        .registry()
        .install(account, 22, None, false, h.clock.now());
    h.manager.reauth().trigger(account).await.expect("trigger");
    let generation = h.manager.registry().generation(account).expect("generation");
    h.manager.registry().record_probe_failure(
        account,
        generation,
        keeper_core::FailureKind::Network,
        h.clock.now(),
    );

    h.manager.notify_connection_restored(account, Some("uid-22")).await;

    assert!(h.manager.reauth().can_trigger(account));
    let health = h.manager.registry().health(account).expect("health");
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(health.network_error_since, None);
    assert_eq!(h.backend.statuses_for(account), vec![BackendStatus::Connected]);
}

#[tokio::test(start_paused = true)]
async fn force_save_snapshots_live_sessions_keeping_device_identity() {
    let h = harness();
    let account = AccountId(23);
    h.manager
        .store()
        .save(&stored_blob(23, t0() - Duration::days(2), 30))
        .expect("seed blob");
    h.manager
        .registry()
        .install(account, 23, None, true, h.clock.now());

    h.clock.advance(Duration::hours(1));
    assert_eq!(h.manager.force_save().await, 1);

    let saved = h.manager.store().load(account).expect("saved");
    assert_eq!(saved.device_id, "imei-23");
    assert_eq!(saved.cookie.cookies[0].value, "fresh-23");
    assert_eq!(saved.saved_at, Some(t0() + Duration::hours(1)));
}

#[tokio::test(start_paused = true)]
async fn start_restores_and_timers_fire() {
    let h = harness();
    h.manager
        .store()
        .save(&stored_blob(24, t0(), 30))
        .expect("seed blob");

    let summary = h.manager.start().await;
    assert_eq!(summary.restored, 1);
    assert!(h.manager.registry().is_live(AccountId(24)));

    tokio::time::sleep(StdDuration::from_secs(61)).await;
    assert!(!h.client.keep_alives.lock().expect("lock").is_empty());

    h.manager.stop().await;
    let probes = h.client.probe_count();
    tokio::time::sleep(StdDuration::from_secs(600)).await;
    assert_eq!(h.client.probe_count(), probes, "no ticks after stop");
}

#[tokio::test(start_paused = true)]
async fn expiry_check_alerts_once_per_cooldown() {
    let h = harness();
    // Created 28 days ago with a 30-day lifetime: two days left.
    h.manager
        .store()
        .save(&stored_blob(25, t0() - Duration::days(28), 30))
        .expect("seed blob");
    h.manager
        .store()
        .save(&stored_blob(26, t0(), 30))
        .expect("seed blob");

    assert_eq!(h.manager.expiry_tick().await, 1);
    assert_eq!(h.notifier.texts_for(AccountId(25)).len(), 1);
    assert!(h.notifier.texts_for(AccountId(26)).is_empty());

    assert_eq!(h.manager.expiry_tick().await, 0);

    let record = h
        .manager
        .expiry()
        .status_for(h.manager.store(), AccountId(25), h.clock.now())
        .expect("load")
        .expect("record");
    assert_eq!(record.days_remaining, 2);
    assert_eq!(record.status, keeper_core::ExpiryStatus::Critical);
}

#[tokio::test]
async fn keep_alive_failures_are_only_counted() {
    let client = Arc::new(FakeClient::default());
    let registry: Arc<SessionRegistry<u64>> = Arc::new(SessionRegistry::new());
    registry.install(AccountId(1), 1, None, false, t0());
    registry.install(AccountId(2), 2, None, false, t0());
    let scheduler = KeepAliveScheduler::new(Arc::clone(&client), Arc::clone(&registry));

    let report = scheduler.tick().await;
    assert_eq!((report.sent, report.failed), (2, 0));

    client.fail_keep_alive("socket hang up");
    let report = scheduler.tick().await;
    assert_eq!((report.sent, report.failed), (0, 2));
    assert!(registry.is_live(AccountId(1)));
    assert!(client.listener_events().is_empty());
}

#[tokio::test]
async fn status_report_sends_counts_and_resets_them() {
    let notifier = Arc::new(RecordingNotifier::default());
    let registry: Arc<SessionRegistry<u64>> = Arc::new(SessionRegistry::new());
    registry.install(AccountId(3), 3, Some("uid-3".to_string()), false, t0());
    registry.record_incoming(AccountId(3), t0());
    registry.record_outgoing(AccountId(3), t0());
    let reporter = StatusReporter::new(
        Arc::clone(&registry),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        Messages::default(),
    );

    assert_eq!(reporter.tick(t0() + Duration::minutes(90)).await, 1);
    let texts = notifier.texts_for(AccountId(3));
    assert!(texts[0].contains("1h 30m"), "{}", texts[0]);
    assert!(texts[0].contains("uid-3"));

    let snapshot = registry.snapshot();
    assert_eq!(snapshot[0].stats.incoming, 0);
    assert_eq!(snapshot[0].stats.reports_sent, 1);
}
