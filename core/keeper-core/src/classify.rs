//! Failure classification for platform errors.
//!
//! The platform reports failures only as free-form text, so classification is
//! a substring match against two keyword tables. Network keywords are checked
//! first: a timeout while logging in is transient even though the message
//! also mentions the login.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

static DEFAULT_NETWORK_KEYWORDS: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "ENOTFOUND",
        "ETIMEDOUT",
        "ECONNREFUSED",
        "ECONNRESET",
        "EAI_AGAIN",
        "ENETUNREACH",
        "EHOSTUNREACH",
        "fetch failed",
        "network",
        "timeout",
        "timed out",
        "socket hang up",
        "connection reset",
        "dns",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
});

static DEFAULT_AUTH_KEYWORDS: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "Đăng nhập thất bại",
        "login failed",
        "invalid session",
        "expired",
        "unauthorized",
        "invalid token",
        "credential",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Transient; retry with backoff and never escalate on its own.
    Network,
    /// The credential is dead; escalate to re-authentication.
    Auth,
    /// Unknown; retried with a small cap, then escalated.
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::Auth => "auth",
            FailureKind::Other => "other",
        }
    }
}

/// Keyword tables, overridable from the `[classifier]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierTable {
    pub network: Vec<String>,
    pub auth: Vec<String>,
}

impl Default for ClassifierTable {
    fn default() -> Self {
        ClassifierTable {
            network: DEFAULT_NETWORK_KEYWORDS.clone(),
            auth: DEFAULT_AUTH_KEYWORDS.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    network: Vec<String>,
    auth: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        ErrorClassifier::new(&ClassifierTable::default())
    }
}

impl ErrorClassifier {
    pub fn new(table: &ClassifierTable) -> Self {
        let normalize = |words: &[String]| -> Vec<String> {
            words
                .iter()
                .map(|word| word.trim().to_lowercase())
                .filter(|word| !word.is_empty())
                .collect()
        };
        ErrorClassifier {
            network: normalize(&table.network),
            auth: normalize(&table.auth),
        }
    }

    pub fn classify(&self, description: &str) -> FailureKind {
        let text = description.to_lowercase();
        if self.network.iter().any(|word| text.contains(word.as_str())) {
            FailureKind::Network
        } else if self.auth.iter().any(|word| text.contains(word.as_str())) {
            FailureKind::Auth
        } else {
            FailureKind::Other
        }
    }

    pub fn classify_error(&self, error: &ClientError) -> FailureKind {
        self.classify(&error.message)
    }
}
