//! File-backed credential persistence.
//!
//! One JSON file per account under the sessions directory:
//!
//! ```text
//! sessions/
//!   zalo_12.json            valid credential for account 12
//!   invalid_zalo_9.json     credential rejected by the platform (kept for forensics)
//!   temp_zalo_3.json        in-flight write from another tool (ignored)
//! ```
//!
//! # Atomic Writes
//!
//! Uses temp file + rename so a crash mid-write never leaves a truncated
//! credential behind.
//!
//! # Defensive Reads
//!
//! `load_all` never fails because of a single bad file: unreadable or
//! malformed files are logged and skipped.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{KeeperError, Result};
use crate::types::{AccountId, CredentialBlob, InvalidCredential};

const INVALID_PREFIX: &str = "invalid_";
const TEMP_PREFIX: &str = "temp_";
const EXTENSION: &str = ".json";

#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
    prefix: String,
}

/// Minimal view used when enumerating invalid files, which may predate the
/// current blob layout.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvalidHeader {
    account_id: Option<AccountId>,
    #[serde(default)]
    saved_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        CredentialStore {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn valid_path(&self, account: AccountId) -> PathBuf {
        self.dir.join(format!("{}_{}{}", self.prefix, account, EXTENSION))
    }

    pub fn invalid_path(&self, account: AccountId) -> PathBuf {
        self.dir
            .join(format!("{}{}_{}{}", INVALID_PREFIX, self.prefix, account, EXTENSION))
    }

    /// Replaces the account's credential file with `blob`.
    pub fn save(&self, blob: &CredentialBlob) -> Result<()> {
        fs_err::create_dir_all(&self.dir)
            .map_err(|err| KeeperError::io("create sessions directory", err))?;

        let content = serde_json::to_string_pretty(blob)
            .map_err(|err| KeeperError::json("serialize credential", err))?;

        let target = self.valid_path(blob.account_id);
        let mut temp_file = NamedTempFile::new_in(&self.dir)
            .map_err(|err| KeeperError::io("create temp credential file", err))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|err| KeeperError::io("write temp credential file", err))?;
        temp_file
            .flush()
            .map_err(|err| KeeperError::io("flush temp credential file", err))?;
        temp_file
            .persist(&target)
            .map_err(|err| KeeperError::io(format!("persist {}", target.display()), err.error))?;

        debug!(account_id = %blob.account_id, path = %target.display(), "Credential saved");
        Ok(())
    }

    pub fn load(&self, account: AccountId) -> Result<CredentialBlob> {
        let path = self.valid_path(account);
        let content = match fs_err::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(KeeperError::CredentialNotFound(account))
            }
            Err(err) => return Err(KeeperError::io("read credential", err)),
        };
        parse_blob(&path, &content)
    }

    /// Every valid credential in the directory, sorted by account id.
    pub fn load_all(&self) -> Vec<CredentialBlob> {
        let mut blobs = Vec::new();
        for path in self.list_files() {
            let Some(name) = file_name(&path) else {
                continue;
            };
            if name.starts_with(INVALID_PREFIX) || name.starts_with(TEMP_PREFIX) {
                continue;
            }

            let content = match fs_err::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    warn!(error = %err, "Failed to read credential file");
                    continue;
                }
            };
            match parse_blob(&path, &content) {
                Ok(blob) => blobs.push(blob),
                Err(err) => warn!(error = %err, "Skipping malformed credential file"),
            }
        }
        blobs.sort_by_key(|blob| blob.account_id);
        blobs
    }

    /// Accounts whose credential was rejected by the platform.
    pub fn load_invalid(&self) -> Vec<InvalidCredential> {
        let marker = format!("{}{}_", INVALID_PREFIX, self.prefix);
        let mut invalid = Vec::new();
        for path in self.list_files() {
            let Some(name) = file_name(&path) else {
                continue;
            };
            if !name.starts_with(&marker) {
                continue;
            }

            let header = fs_err::read_to_string(&path)
                .map_err(|err| err.to_string())
                .and_then(|content| {
                    serde_json::from_str::<InvalidHeader>(&content).map_err(|err| err.to_string())
                });
            match header {
                Ok(InvalidHeader {
                    account_id: Some(account_id),
                    saved_at,
                }) => invalid.push(InvalidCredential {
                    account_id,
                    saved_at,
                }),
                Ok(_) => warn!(path = %path.display(), "Invalid credential file has no accountId"),
                Err(err) => warn!(path = %path.display(), error = %err, "Failed to read invalid credential file"),
            }
        }
        invalid.sort_by_key(|entry| entry.account_id);
        invalid
    }

    /// Renames the account's credential to its invalid name. Missing files are a no-op.
    pub fn mark_invalid(&self, account: AccountId) -> Result<()> {
        let from = self.valid_path(account);
        let to = self.invalid_path(account);
        match fs_err::rename(&from, &to) {
            Ok(()) => {
                info!(account_id = %account, path = %to.display(), "Credential marked invalid");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(account_id = %account, "No credential file to mark invalid");
                Ok(())
            }
            Err(err) => Err(KeeperError::io("mark credential invalid", err)),
        }
    }

    fn list_files(&self) -> Vec<PathBuf> {
        let entries = match fs_err::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.dir.display(), "Sessions directory not found");
                return Vec::new();
            }
            Err(err) => {
                warn!(error = %err, "Failed to list sessions directory");
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| file_name(path).is_some_and(|name| name.ends_with(EXTENSION)))
            .collect();
        files.sort();
        files
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

fn parse_blob(path: &Path, content: &str) -> Result<CredentialBlob> {
    serde_json::from_str::<CredentialBlob>(content).map_err(|err| KeeperError::CredentialMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CookieEntry, CookieJar};
    use chrono::{DateTime, Utc};
    use serde_json::Value;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn sample_blob(id: u64) -> CredentialBlob {
        let mut entry = CookieEntry::new("zpw_sek", "secret-value")
            .with_lifetime(at("2026-01-01T00:00:00Z"), 31_536_000);
        entry
            .extra
            .insert("domain".to_string(), Value::from(".chat.example.me"));
        let mut jar = CookieJar::new(vec![entry, CookieEntry::new("lang", "vi")]);
        jar.extra.insert("version".to_string(), Value::from("tough-cookie@4.1.3"));
        CredentialBlob::new(AccountId(id), jar, "imei-1", "agent/1", at("2026-01-31T00:00:00Z"))
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = CredentialStore::new(temp_dir.path().join("sessions"), "zalo");
        let blob = sample_blob(12);

        store.save(&blob).expect("save");
        let loaded = store.load(AccountId(12)).expect("load");
        assert_eq!(loaded, blob);
        assert!(store.valid_path(AccountId(12)).ends_with("zalo_12.json"));
    }

    #[test]
    fn save_overwrites_previous_blob() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = CredentialStore::new(temp_dir.path(), "zalo");
        let mut blob = sample_blob(3);
        store.save(&blob).expect("first save");

        blob.user_agent = "agent/2".to_string();
        store.save(&blob).expect("second save");

        assert_eq!(store.load(AccountId(3)).expect("load").user_agent, "agent/2");
        assert_eq!(store.load_all().len(), 1);
    }

    #[test]
    fn load_missing_account_is_not_found() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = CredentialStore::new(temp_dir.path(), "zalo");
        let err = store.load(AccountId(99)).expect_err("missing");
        assert!(matches!(err, KeeperError::CredentialNotFound(AccountId(99))));
    }

    #[test]
    fn load_all_skips_invalid_temp_and_malformed_files() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = CredentialStore::new(temp_dir.path(), "zalo");
        store.save(&sample_blob(2)).expect("save 2");
        store.save(&sample_blob(1)).expect("save 1");

        fs_err::write(temp_dir.path().join("zalo_5.json"), "{ not json").expect("malformed");
        fs_err::write(temp_dir.path().join("zalo_6.json"), r#"{"imei":"x"}"#).expect("partial");
        fs_err::write(temp_dir.path().join("notes.txt"), "ignored").expect("txt");
        let temp_body = serde_json::to_string(&sample_blob(8)).expect("serialize");
        fs_err::write(temp_dir.path().join("temp_zalo_8.json"), &temp_body).expect("temp");
        fs_err::write(temp_dir.path().join("invalid_zalo_9.json"), &temp_body).expect("invalid");

        let ids: Vec<AccountId> = store.load_all().iter().map(|b| b.account_id).collect();
        assert_eq!(ids, vec![AccountId(1), AccountId(2)]);
    }

    #[test]
    fn load_all_on_missing_directory_is_empty() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = CredentialStore::new(temp_dir.path().join("nope"), "zalo");
        assert!(store.load_all().is_empty());
        assert!(store.load_invalid().is_empty());
    }

    #[test]
    fn mark_invalid_renames_instead_of_deleting() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = CredentialStore::new(temp_dir.path(), "zalo");
        store.save(&sample_blob(4)).expect("save");

        store.mark_invalid(AccountId(4)).expect("mark invalid");

        assert!(!store.valid_path(AccountId(4)).exists());
        assert!(store.invalid_path(AccountId(4)).exists());
        assert!(store.load_all().is_empty());
        let invalid = store.load_invalid();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].account_id, AccountId(4));
        assert_eq!(invalid[0].saved_at, Some(at("2026-01-31T00:00:00Z")));
    }

    #[test]
    fn mark_invalid_without_file_is_noop() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = CredentialStore::new(temp_dir.path(), "zalo");
        store.mark_invalid(AccountId(5)).expect("noop");
        assert!(!store.invalid_path(AccountId(5)).exists());
    }

    #[test]
    fn custom_prefix_is_respected() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = CredentialStore::new(temp_dir.path(), "acct");
        store.save(&sample_blob(1)).expect("save");
        assert!(temp_dir.path().join("acct_1.json").exists());

        let other = CredentialStore::new(temp_dir.path(), "zalo");
        store.mark_invalid(AccountId(1)).expect("mark");
        assert!(other.load_invalid().is_empty());
        assert_eq!(store.load_invalid().len(), 1);
    }
}
