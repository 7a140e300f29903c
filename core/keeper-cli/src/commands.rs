use chrono::{DateTime, Utc};
use keeper_core::{
    AccountId, CredentialBlob, CredentialStore, ExpiryPredictor, ExpiryRecord, InvalidCredential,
    KeeperConfig, Messages,
};
use keeper_notify::TelegramNotifier;

fn store(config: &KeeperConfig) -> CredentialStore {
    CredentialStore::new(&config.storage.sessions_dir, &config.storage.file_prefix)
}

fn format_saved_at(saved_at: Option<DateTime<Utc>>) -> String {
    saved_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn render_list(valid: &[CredentialBlob], invalid: &[InvalidCredential]) -> String {
    let mut out = format!("{:<12} {:<8} {}\n", "ACCOUNT", "STATE", "SAVED");
    for blob in valid {
        out.push_str(&format!(
            "{:<12} {:<8} {}\n",
            blob.account_id,
            "valid",
            format_saved_at(blob.saved_at)
        ));
    }
    for entry in invalid {
        out.push_str(&format!(
            "{:<12} {:<8} {}\n",
            entry.account_id,
            "invalid",
            format_saved_at(entry.saved_at)
        ));
    }
    out
}

pub fn render_expiry(records: &[ExpiryRecord]) -> String {
    let mut out = format!("{:<12} {:<9} {:>5} {}\n", "ACCOUNT", "STATUS", "DAYS", "EXPIRES");
    for record in records {
        out.push_str(&format!(
            "{:<12} {:<9} {:>5} {}\n",
            record.account_id,
            record.status.as_str(),
            record.days_remaining,
            record.expiry_date.format("%Y-%m-%d %H:%M UTC")
        ));
    }
    out
}

pub fn list(config: &KeeperConfig) -> Result<(), String> {
    let store = store(config);
    let valid = store.load_all();
    let invalid = store.load_invalid();
    if valid.is_empty() && invalid.is_empty() {
        println!("No stored credentials in {}", store.dir().display());
        return Ok(());
    }
    print!("{}", render_list(&valid, &invalid));
    Ok(())
}

pub fn expiry(config: &KeeperConfig, account: Option<AccountId>, json: bool) -> Result<(), String> {
    let store = store(config);
    let predictor = ExpiryPredictor::new(config.expiry.clone());
    let now = Utc::now();

    let records = match account {
        Some(account) => predictor
            .status_for(&store, account, now)
            .map_err(|err| err.to_string())?
            .into_iter()
            .collect::<Vec<_>>(),
        None => predictor.check_all(&store, now),
    };

    if json {
        let body = serde_json::to_string_pretty(&records).map_err(|err| err.to_string())?;
        println!("{body}");
    } else if records.is_empty() {
        println!("No expiry information available");
    } else {
        print!("{}", render_expiry(&records));
    }
    Ok(())
}

pub fn invalidate(config: &KeeperConfig, account: AccountId) -> Result<(), String> {
    let store = store(config);
    if !store.valid_path(account).exists() {
        return Err(format!("No stored credential for account {account}"));
    }
    store.mark_invalid(account).map_err(|err| err.to_string())?;
    println!("Marked account {account} invalid: {}", store.invalid_path(account).display());
    Ok(())
}

pub async fn test_alert(config: &KeeperConfig, account: AccountId) -> Result<(), String> {
    let notifier = TelegramNotifier::new(&config.backend).map_err(|err| err.to_string())?;
    let settings = notifier
        .settings_for(account)
        .await
        .ok_or_else(|| format!("No Telegram settings for account {account}"))?;
    let text = Messages::new(&config.alerts).test_alert(account, Utc::now());
    notifier
        .send_message(&settings, &text)
        .await
        .map_err(|err| err.to_string())?;
    println!("Test alert sent for account {account}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::{CookieEntry, CookieJar};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn config_in(dir: &std::path::Path) -> KeeperConfig {
        let mut config = KeeperConfig::default();
        config.storage.sessions_dir = dir.to_path_buf();
        config
    }

    fn blob(id: u64) -> CredentialBlob {
        let cookie = CookieJar::new(vec![
            CookieEntry::new("zpw_sek", "secret").with_lifetime(t0(), 30 * 86_400)
        ]);
        CredentialBlob::new(AccountId(id), cookie, "imei", "agent", t0())
    }

    #[test]
    fn render_list_shows_both_states() {
        let invalid = [InvalidCredential {
            account_id: AccountId(2),
            saved_at: None,
        }];
        let out = render_list(&[blob(1)], &invalid);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("1 "));
        assert!(lines[1].contains("valid"));
        assert!(lines[1].contains("2026-03-01 08:00:00 UTC"));
        assert!(lines[2].contains("invalid"));
        assert!(lines[2].ends_with('-'));
    }

    #[test]
    fn render_expiry_lists_days_and_status() {
        let predictor = ExpiryPredictor::new(KeeperConfig::default().expiry);
        let record = predictor
            .evaluate(&blob(4), t0() + chrono::Duration::days(28))
            .expect("record");
        let out = render_expiry(&[record]);
        assert!(out.contains("critical"), "{out}");
        assert!(out.contains("2026-03-31"), "{out}");
    }

    #[test]
    fn invalidate_moves_the_credential_aside() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config_in(dir.path());
        let store = store(&config);
        store.save(&blob(5)).expect("save");

        invalidate(&config, AccountId(5)).expect("invalidate");
        assert!(store.invalid_path(AccountId(5)).exists());
        assert!(!store.valid_path(AccountId(5)).exists());

        let err = invalidate(&config, AccountId(5)).expect_err("already invalid");
        assert!(err.contains("No stored credential"));
    }
}
