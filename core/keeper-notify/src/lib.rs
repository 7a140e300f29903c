//! HTTP collaborators for the session keeper.
//!
//! [`HttpBackendNotifier`] pushes session status changes to the backend's
//! REST API. [`TelegramNotifier`] delivers operator alerts through per-account
//! Telegram bots whose settings are served by the same backend.
//!
//! Both are best effort: failures are logged and swallowed so that alert
//! delivery never feeds back into session recovery decisions.

pub mod backend;
pub mod error;
pub mod telegram;

pub use backend::{HttpBackendNotifier, StatusPayload};
pub use error::{NotifyError, Result};
pub use telegram::{parse_settings, TelegramNotifier, TelegramSettings};

use std::time::Duration;

/// Builds the shared HTTP client used by both notifiers.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(NotifyError::ClientBuild)
}
