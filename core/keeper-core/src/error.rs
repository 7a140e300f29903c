//! Error types for keeper-core operations.
//!
//! Platform failures never surface as `KeeperError` directly: they arrive as
//! [`ClientError`] and are classified before any scheduling decision is made.

use std::path::PathBuf;

use crate::types::AccountId;

// ═══════════════════════════════════════════════════════════════════════════════
// Platform Client Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Normalized failure description returned by a [`crate::client::SessionClient`].
///
/// Only the message is kept; classification works on its text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ClientError {
    pub message: String,
}

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self {
        ClientError {
            message: message.into(),
        }
    }
}

impl From<String> for ClientError {
    fn from(message: String) -> Self {
        ClientError { message }
    }
}

impl From<&str> for ClientError {
    fn from(message: &str) -> Self {
        ClientError::new(message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Internal Error
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can occur in keeper-core operations.
#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Credential Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("No stored credential for account {0}")]
    CredentialNotFound(AccountId),

    #[error("Credential file malformed: {path}: {details}")]
    CredentialMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Re-authentication for account {account} is rate limited for {retry_in_secs}s")]
    ReauthRateLimited {
        account: AccountId,
        retry_in_secs: i64,
    },

    #[error("Platform client error: {0}")]
    Client(#[from] ClientError),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl KeeperError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        KeeperError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        KeeperError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using KeeperError.
pub type Result<T> = std::result::Result<T, KeeperError>;
