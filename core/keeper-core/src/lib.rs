//! Keeper Core Library
//!
//! Keeps many long-lived cookie-authenticated platform sessions alive across
//! process restarts, network flaps and silent degradation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SessionManager                         │
//! │  registry (handles, health)  ·  timers  ·  lifecycle         │
//! └──────┬──────────────┬──────────────┬──────────────┬──────────┘
//!        │              │              │              │
//!   RestoreOrch.   HealthMonitor   KeepAlive      ExpiryPredictor
//!        │              │                             │
//!        ├── ReauthCoordinator ── Notifier (artifacts)│
//!        └── RateLimitedAlerter ── Notifier (text) ───┘
//!                       │
//!               CredentialStore (sessions/<prefix>_<id>.json)
//! ```
//!
//! The platform client, alert channel and backend are traits in [`client`];
//! the `keeper-notify` crate provides HTTP implementations of the latter two.
//!
//! # Failure Handling
//!
//! Every platform error is classified ([`classify`]) as network, auth or
//! other before any decision is made. Network failures are retried and never
//! escalate to re-authentication on their own; auth failures mark the stored
//! credential invalid and request a fresh login challenge.

pub mod alerter;
pub mod backoff;
pub mod classify;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod expiry;
pub mod health;
pub mod keepalive;
pub mod manager;
pub mod messages;
pub mod reauth;
pub mod registry;
pub mod restore;
pub mod status;
pub mod store;
pub mod types;

pub use alerter::{AlertKind, RateLimitedAlerter};
pub use backoff::RetryPolicy;
pub use classify::{ClassifierTable, ErrorClassifier, FailureKind};
pub use client::{BackendNotifier, BackendStatus, Notifier, NullNotifier, RecoveryActions, SessionClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, KeeperConfig, Language};
pub use error::{ClientError, KeeperError, Result};
pub use expiry::{ExpiryPredictor, ExpiryRecord, ExpiryStatus};
pub use health::{escalation_for, HealthMonitor, HealthState, ProbeAction, ProbeReport};
pub use manager::{Collaborators, ManagerSnapshot, SessionManager, TimerKind};
pub use messages::Messages;
pub use reauth::ReauthCoordinator;
pub use registry::{HealthRecord, LiveSession, SessionRegistry};
pub use restore::{RestoreOrchestrator, RestoreOutcome, RestoreSummary, VerifyOutcome};
pub use store::CredentialStore;
pub use types::{AccountId, CookieEntry, CookieJar, CredentialBlob, Credentials, InvalidCredential};
