//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keeper_core::client::ClientResult;
use keeper_core::{
    AccountId, BackendNotifier, BackendStatus, ClientError, Collaborators, CookieEntry, CookieJar,
    CredentialBlob, Credentials, KeeperConfig, ManualClock, Notifier, RecoveryActions, SessionClient,
    SessionManager,
};

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
        .expect("timestamp")
        .with_timezone(&Utc)
}

// ─────────────────────────────────────────────────────────────────────────────
// Platform client
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FakeClient {
    login_script: Mutex<BTreeMap<AccountId, VecDeque<ClientResult<()>>>>,
    probe_script: Mutex<BTreeMap<u64, VecDeque<ClientResult<()>>>>,
    probe_error: Mutex<BTreeMap<u64, String>>,
    keep_alive_error: Mutex<Option<String>>,
    pub logins: Mutex<Vec<Credentials>>,
    pub probes: Mutex<Vec<u64>>,
    pub keep_alives: Mutex<Vec<u64>>,
    pub listener_events: Mutex<Vec<(&'static str, u64)>>,
    pub challenges: Mutex<Vec<AccountId>>,
}

impl FakeClient {
    pub fn script_login(&self, account: AccountId, results: Vec<ClientResult<()>>) {
        self.login_script
            .lock()
            .expect("lock")
            .insert(account, results.into());
    }

    pub fn script_probe(&self, handle: u64, results: Vec<ClientResult<()>>) {
        self.probe_script
            .lock()
            .expect("lock")
            .insert(handle, results.into());
    }

    /// Every probe of `handle` fails with `message` until cleared.
    pub fn fail_probes(&self, handle: u64, message: &str) {
        self.probe_error
            .lock()
            .expect("lock")
            .insert(handle, message.to_string());
    }

    pub fn heal_probes(&self, handle: u64) {
        self.probe_error.lock().expect("lock").remove(&handle);
    }

    pub fn fail_keep_alive(&self, message: &str) {
        *self.keep_alive_error.lock().expect("lock") = Some(message.to_string());
    }

    pub fn login_count(&self, account: AccountId) -> usize {
        self.logins
            .lock()
            .expect("lock")
            .iter()
            .filter(|credentials| credentials.account_id == account)
            .count()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.lock().expect("lock").len()
    }

    pub fn challenge_count(&self) -> usize {
        self.challenges.lock().expect("lock").len()
    }

    pub fn challenged(&self) -> Vec<AccountId> {
        self.challenges.lock().expect("lock").clone()
    }

    pub fn listener_events(&self) -> Vec<(&'static str, u64)> {
        self.listener_events.lock().expect("lock").clone()
    }
}

#[async_trait]
impl SessionClient for FakeClient {
    type Handle = u64;

    async fn login(&self, credentials: &Credentials) -> ClientResult<u64> {
        self.logins.lock().expect("lock").push(credentials.clone());
        let scripted = self
            .login_script
            .lock()
            .expect("lock")
            .get_mut(&credentials.account_id)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Err(err)) => Err(err),
            _ => Ok(credentials.account_id.0),
        }
    }

    async fn probe(&self, handle: &u64) -> ClientResult<String> {
        self.probes.lock().expect("lock").push(*handle);
        let scripted = self
            .probe_script
            .lock()
            .expect("lock")
            .get_mut(handle)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Err(err)) => return Err(err),
            Some(Ok(())) => return Ok(format!("uid-{handle}")),
            None => {}
        }
        if let Some(message) = self.probe_error.lock().expect("lock").get(handle) {
            return Err(ClientError::new(message.clone()));
        }
        Ok(format!("uid-{handle}"))
    }

    async fn keep_alive(&self, handle: &u64) -> ClientResult<()> {
        self.keep_alives.lock().expect("lock").push(*handle);
        match self.keep_alive_error.lock().expect("lock").clone() {
            Some(message) => Err(ClientError::new(message)),
            None => Ok(()),
        }
    }

    async fn stop_listener(&self, handle: &u64) -> ClientResult<()> {
        self.listener_events.lock().expect("lock").push(("stop", *handle));
        Ok(())
    }

    async fn start_listener(&self, handle: &u64) -> ClientResult<()> {
        self.listener_events.lock().expect("lock").push(("start", *handle));
        Ok(())
    }

    async fn generate_reauth_challenge(&self, account: AccountId) -> ClientResult<PathBuf> {
        self.challenges.lock().expect("lock").push(account);
        Ok(PathBuf::from(format!("/tmp/qr_{account}.png")))
    }

    async fn current_cookie(&self, handle: &u64) -> ClientResult<CookieJar> {
        Ok(CookieJar::new(vec![CookieEntry::new("zpw_sek", format!("fresh-{handle}"))]))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Alert channel and backend
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub texts: Mutex<Vec<(AccountId, String)>>,
    pub artifacts: Mutex<Vec<(AccountId, PathBuf, String)>>,
}

impl RecordingNotifier {
    pub fn texts(&self) -> Vec<(AccountId, String)> {
        self.texts.lock().expect("lock").clone()
    }

    pub fn texts_for(&self, account: AccountId) -> Vec<String> {
        self.texts()
            .into_iter()
            .filter(|(id, _)| *id == account)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.lock().expect("lock").len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, account: AccountId, text: &str) {
        self.texts.lock().expect("lock").push((account, text.to_string()));
    }

    async fn send_artifact(&self, account: AccountId, path: &Path, caption: &str) {
        self.artifacts
            .lock()
            .expect("lock")
            .push((account, path.to_path_buf(), caption.to_string()));
    }
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub reports: Mutex<Vec<(AccountId, BackendStatus, String)>>,
}

impl RecordingBackend {
    pub fn statuses_for(&self, account: AccountId) -> Vec<BackendStatus> {
        self.reports
            .lock()
            .expect("lock")
            .iter()
            .filter(|(id, _, _)| *id == account)
            .map(|(_, status, _)| *status)
            .collect()
    }
}

#[async_trait]
impl BackendNotifier for RecordingBackend {
    async fn report(&self, account: AccountId, status: BackendStatus, message: &str) {
        self.reports
            .lock()
            .expect("lock")
            .push((account, status, message.to_string()));
    }
}

#[derive(Debug, Default)]
pub struct RecordingRecovery {
    pub events: Mutex<Vec<(&'static str, AccountId)>>,
}

impl RecordingRecovery {
    pub fn events(&self) -> Vec<(&'static str, AccountId)> {
        self.events.lock().expect("lock").clone()
    }
}

#[async_trait]
impl RecoveryActions for RecordingRecovery {
    async fn start_listener(&self, account: AccountId) {
        self.events.lock().expect("lock").push(("start_listener", account));
    }

    async fn stop_listener(&self, account: AccountId) {
        self.events.lock().expect("lock").push(("stop_listener", account));
    }

    async fn start_keep_alive(&self, account: AccountId) {
        self.events.lock().expect("lock").push(("start_keep_alive", account));
    }

    async fn start_health_monitor(&self, account: AccountId) {
        self.events.lock().expect("lock").push(("start_health_monitor", account));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

pub struct Harness {
    pub manager: SessionManager<FakeClient>,
    pub client: Arc<FakeClient>,
    pub notifier: Arc<RecordingNotifier>,
    pub backend: Arc<RecordingBackend>,
    pub clock: Arc<ManualClock>,
    pub _dir: tempfile::TempDir,
}

pub fn test_config(dir: &Path) -> KeeperConfig {
    let mut config = KeeperConfig::default();
    config.storage.sessions_dir = dir.join("sessions");
    config
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

pub fn harness_with(adjust: impl FnOnce(&mut KeeperConfig)) -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = test_config(dir.path());
    adjust(&mut config);

    let client = Arc::new(FakeClient::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let backend = Arc::new(RecordingBackend::default());
    let clock = Arc::new(ManualClock::new(t0()));
    let collaborators = Collaborators::new(
        Arc::clone(&client),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        Arc::clone(&backend) as Arc<dyn BackendNotifier>,
    )
    .with_clock(Arc::clone(&clock) as Arc<dyn keeper_core::Clock>);

    Harness {
        manager: SessionManager::new(config, collaborators),
        client,
        notifier,
        backend,
        clock,
        _dir: dir,
    }
}

pub fn stored_blob(account: u64, creation: DateTime<Utc>, lifetime_days: i64) -> CredentialBlob {
    let cookie = CookieJar::new(vec![
        CookieEntry::new("zpw_sek", "secret").with_lifetime(creation, lifetime_days * 86_400),
        CookieEntry::new("zpsid", "sid").with_lifetime(creation, 365 * 86_400),
    ]);
    CredentialBlob::new(AccountId(account), cookie, format!("imei-{account}"), "agent/1", creation)
}

pub fn network_error() -> ClientError {
    ClientError::new("connect ETIMEDOUT 10.0.0.1:443")
}

pub fn auth_error() -> ClientError {
    ClientError::new("Login failed: cookie rejected")
}

pub fn other_error() -> ClientError {
    ClientError::new("unexpected payload shape")
}
