//! Collaborator seams.
//!
//! The platform client, the alert channel and the backend system-of-record
//! live outside this crate. Everything here is a trait so the manager can be
//! driven by real HTTP implementations (`keeper-notify`) or by in-memory
//! fakes in tests.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::types::{AccountId, CookieJar, Credentials};

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Capability surface of the messaging platform.
#[async_trait]
pub trait SessionClient: Send + Sync + 'static {
    /// Live connection handle. Cheap to clone.
    type Handle: Clone + Send + Sync + 'static;

    async fn login(&self, credentials: &Credentials) -> ClientResult<Self::Handle>;

    /// Lightweight identity check. Returns the platform's id for the account.
    async fn probe(&self, handle: &Self::Handle) -> ClientResult<String>;

    async fn keep_alive(&self, handle: &Self::Handle) -> ClientResult<()>;

    async fn stop_listener(&self, handle: &Self::Handle) -> ClientResult<()>;

    async fn start_listener(&self, handle: &Self::Handle) -> ClientResult<()>;

    /// Produces a login challenge artifact (QR image) and returns its path.
    async fn generate_reauth_challenge(&self, account: AccountId) -> ClientResult<PathBuf>;

    /// Current cookie jar of a live handle, used for periodic snapshots.
    async fn current_cookie(&self, handle: &Self::Handle) -> ClientResult<CookieJar>;
}

/// Operator-facing alert channel. Best effort: failures are logged by the
/// implementation and never retried here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, account: AccountId, text: &str);

    async fn send_artifact(&self, account: AccountId, path: &Path, caption: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Expired,
    Connected,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Expired => "expired",
            BackendStatus::Connected => "connected",
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget status sync to the backend.
#[async_trait]
pub trait BackendNotifier: Send + Sync {
    async fn report(&self, account: AccountId, status: BackendStatus, message: &str);
}

/// Post-restore wiring for a freshly installed handle.
#[async_trait]
pub trait RecoveryActions: Send + Sync {
    async fn start_listener(&self, account: AccountId);

    async fn stop_listener(&self, account: AccountId);

    async fn start_keep_alive(&self, account: AccountId);

    async fn start_health_monitor(&self, account: AccountId);
}

/// Notifier that drops everything. Used when no alert channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, account: AccountId, text: &str) {
        tracing::debug!(account_id = %account, len = text.len(), "Alert dropped (no channel)");
    }

    async fn send_artifact(&self, account: AccountId, path: &Path, _caption: &str) {
        tracing::debug!(account_id = %account, path = %path.display(), "Artifact dropped (no channel)");
    }
}

#[async_trait]
impl BackendNotifier for NullNotifier {
    async fn report(&self, account: AccountId, status: BackendStatus, _message: &str) {
        tracing::debug!(account_id = %account, %status, "Backend report dropped (no backend)");
    }
}
