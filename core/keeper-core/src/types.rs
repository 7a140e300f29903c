//! Persisted credential types and shared identifiers.
//!
//! The on-disk body of a credential file is a [`CredentialBlob`] serialized as
//! JSON with the field names `accountId`, `cookie`, `imei`, `userAgent` and
//! `savedAt`. Cookie entries keep every field the platform wrote, so a
//! snapshot taken from a live handle round-trips without loss.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Numeric account identifier assigned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(AccountId)
    }
}

impl From<u64> for AccountId {
    fn from(value: u64) -> Self {
        AccountId(value)
    }
}

/// Cookie lifetime as written by the platform's cookie jar.
///
/// Session cookies carry a number of seconds; persistent ones may carry the
/// string `"Infinity"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxAge {
    Seconds(i64),
    Unbounded(String),
}

impl MaxAge {
    pub fn seconds(&self) -> Option<i64> {
        match self {
            MaxAge::Seconds(secs) => Some(*secs),
            MaxAge::Unbounded(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieEntry {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<MaxAge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<DateTime<Utc>>,
    /// Domain, path, flags and anything else the jar recorded.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CookieEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        CookieEntry {
            key: key.into(),
            value: value.into(),
            max_age: None,
            creation: None,
            extra: Map::new(),
        }
    }

    pub fn with_lifetime(mut self, creation: DateTime<Utc>, max_age_secs: i64) -> Self {
        self.creation = Some(creation);
        self.max_age = Some(MaxAge::Seconds(max_age_secs));
        self
    }

    /// Instant the platform stops accepting this cookie, when both halves are known.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let creation = self.creation?;
        let secs = self.max_age.as_ref()?.seconds()?;
        Some(creation + chrono::Duration::seconds(secs))
    }
}

/// Serialized cookie jar (opaque apart from its cookie list).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CookieJar {
    #[serde(default)]
    pub cookies: Vec<CookieEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CookieJar {
    pub fn new(cookies: Vec<CookieEntry>) -> Self {
        CookieJar {
            cookies,
            extra: Map::new(),
        }
    }
}

/// Per-account credential material persisted by the credential store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBlob {
    pub account_id: AccountId,
    pub cookie: CookieJar,
    #[serde(rename = "imei", default)]
    pub device_id: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl CredentialBlob {
    pub fn new(
        account_id: AccountId,
        cookie: CookieJar,
        device_id: impl Into<String>,
        user_agent: impl Into<String>,
        saved_at: DateTime<Utc>,
    ) -> Self {
        CredentialBlob {
            account_id,
            cookie,
            device_id: device_id.into(),
            user_agent: user_agent.into(),
            saved_at: Some(saved_at),
        }
    }
}

/// Login material handed to the platform client.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub account_id: AccountId,
    pub cookie: CookieJar,
    pub device_id: String,
    pub user_agent: String,
    pub language: String,
}

/// Entry for a credential file that was renamed after an auth failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCredential {
    pub account_id: AccountId,
    pub saved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_parses_with_whitespace() {
        assert_eq!(" 42 ".parse::<AccountId>().expect("parse"), AccountId(42));
        assert!("abc".parse::<AccountId>().is_err());
    }

    #[test]
    fn cookie_entry_keeps_unknown_fields() {
        let raw = r#"{
            "key": "zpsid",
            "value": "abc",
            "domain": "chat.example.me",
            "path": "/",
            "httpOnly": true,
            "maxAge": 31536000,
            "creation": "2026-01-31T00:00:00Z"
        }"#;
        let entry: CookieEntry = serde_json::from_str(raw).expect("parse cookie");
        assert_eq!(entry.extra.get("domain"), Some(&Value::from("chat.example.me")));
        assert_eq!(entry.extra.get("httpOnly"), Some(&Value::Bool(true)));

        let back = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(back["path"], Value::from("/"));
        assert_eq!(back["maxAge"], Value::from(31536000));
    }

    #[test]
    fn unbounded_max_age_has_no_expiry() {
        let raw = r#"{"key":"zpw_sek","value":"v","maxAge":"Infinity","creation":"2026-01-31T00:00:00Z"}"#;
        let entry: CookieEntry = serde_json::from_str(raw).expect("parse cookie");
        assert_eq!(entry.max_age, Some(MaxAge::Unbounded("Infinity".to_string())));
        assert!(entry.expires_at().is_none());
    }

    #[test]
    fn blob_uses_wire_field_names() {
        let saved_at = DateTime::parse_from_rfc3339("2026-01-31T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let blob = CredentialBlob::new(AccountId(7), CookieJar::default(), "dev-1", "ua/1.0", saved_at);
        let value = serde_json::to_value(&blob).expect("serialize");
        assert_eq!(value["accountId"], Value::from(7));
        assert_eq!(value["imei"], Value::from("dev-1"));
        assert_eq!(value["userAgent"], Value::from("ua/1.0"));
        assert!(value.get("savedAt").is_some());
    }
}
