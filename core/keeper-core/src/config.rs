//! Runtime configuration for the session keeper.
//!
//! Loaded from `~/.session-keeper/keeper.toml` when present (every field has a
//! default), then overlaid with process environment variables for the values
//! deployments usually inject: sessions directory, backend URL, API key and
//! credential fallbacks.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::RetryPolicy;
use crate::classify::ClassifierTable;
use crate::error::{KeeperError, Result};

const CONFIG_DIR: &str = ".session-keeper";
const CONFIG_FILE: &str = "keeper.toml";

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0";
const DEFAULT_DEVICE_ID: &str = "default_imei";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub storage: StorageConfig,
    pub backend: BackendConfig,
    pub client: ClientDefaults,
    pub schedule: ScheduleConfig,
    pub restore: RestoreConfig,
    pub probe: ProbeConfig,
    pub activity: ActivityThresholds,
    pub alerts: AlertConfig,
    pub expiry: ExpiryConfig,
    pub classifier: ClassifierTable,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub sessions_dir: PathBuf,
    /// Credential files are named `<prefix>_<id>.json`.
    pub file_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = dirs::home_dir()
            .map(|home| home.join(CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR));
        StorageConfig {
            sessions_dir: root.join("sessions"),
            file_prefix: "zalo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub status_path: String,
    pub settings_path: String,
    pub request_timeout_secs: u64,
    pub settings_cache_ttl_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            api_key: None,
            status_path: "/api/zalo/session-status".to_string(),
            settings_path: "/api/zalo/telegram-settings".to_string(),
            request_timeout_secs: 10,
            settings_cache_ttl_secs: 300,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Values used when a stored credential lacks a device id or user agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientDefaults {
    pub device_id: String,
    pub user_agent: String,
    pub language: String,
}

impl Default for ClientDefaults {
    fn default() -> Self {
        ClientDefaults {
            device_id: DEFAULT_DEVICE_ID.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            language: "vi".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub save_interval_secs: u64,
    pub initial_save_delay_secs: u64,
    pub health_check_interval_secs: u64,
    pub activity_check_interval_secs: u64,
    pub keep_alive_interval_secs: u64,
    pub initial_keep_alive_delay_secs: u64,
    pub status_reports_enabled: bool,
    pub status_report_interval_secs: u64,
    pub initial_status_report_delay_secs: u64,
    pub expiry_check_interval_secs: u64,
    pub initial_expiry_check_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            save_interval_secs: 60 * 60,
            initial_save_delay_secs: 60,
            health_check_interval_secs: 60,
            activity_check_interval_secs: 60,
            keep_alive_interval_secs: 10 * 60,
            initial_keep_alive_delay_secs: 60,
            status_reports_enabled: true,
            status_report_interval_secs: 30 * 60,
            initial_status_report_delay_secs: 2 * 60,
            expiry_check_interval_secs: 24 * 60 * 60,
            initial_expiry_check_delay_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub policy: RetryPolicy,
    /// Pause between a failed restore and the re-auth challenge.
    pub reauth_delay_secs: u64,
    pub account_spacing_secs: u64,
    pub invalid_spacing_secs: u64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        RestoreConfig {
            policy: RetryPolicy::default(),
            reauth_delay_secs: 10,
            account_spacing_secs: 2,
            invalid_spacing_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub policy: RetryPolicy,
    pub network_grace_secs: i64,
    pub escalation: EscalationThresholds,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            policy: RetryPolicy::default(),
            network_grace_secs: 3 * 60,
            escalation: EscalationThresholds::default(),
        }
    }
}

/// Consecutive-failure counts at which the health pass acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationThresholds {
    pub network_warn: u32,
    pub network_escalate: u32,
    pub other_escalate: u32,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        EscalationThresholds {
            network_warn: 5,
            network_escalate: 10,
            other_escalate: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityThresholds {
    pub half_dead_secs: i64,
    pub silent_secs: i64,
    pub settle_delay_ms: u64,
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        ActivityThresholds {
            half_dead_secs: 30 * 60,
            silent_secs: 60 * 60,
            settle_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Vi,
    En,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub cooldown_secs: i64,
    pub reauth_cooldown_secs: i64,
    pub language: Language,
    pub utc_offset_hours: i32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            cooldown_secs: 10 * 60,
            reauth_cooldown_secs: 5 * 60,
            language: Language::Vi,
            utc_offset_hours: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Cookies whose lifetime bounds the whole session.
    pub critical_keys: Vec<String>,
    pub warning_days: i64,
    pub critical_days: i64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        ExpiryConfig {
            critical_keys: vec!["zpw_sek".to_string(), "zpsid".to_string()],
            warning_days: 7,
            critical_days: 3,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(KeeperError::HomeDirNotFound)?;
    Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Loads configuration from `path` (or the default location) and applies
/// environment overrides. A missing file yields defaults.
pub fn load_config(path: Option<PathBuf>) -> Result<KeeperConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    let mut config = if config_path.exists() {
        let content = fs_err::read_to_string(&config_path).map_err(|err| {
            KeeperError::io(format!("read config {}", config_path.display()), err)
        })?;
        toml::from_str::<KeeperConfig>(&content).map_err(|err| KeeperError::ConfigMalformed {
            path: config_path.clone(),
            details: err.to_string(),
        })?
    } else {
        KeeperConfig::default()
    };

    apply_env_overrides(&mut config, |key| env::var(key).ok());
    Ok(config)
}

/// Overlays environment values. The first non-empty variable of each group wins.
pub fn apply_env_overrides<F>(config: &mut KeeperConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let first = |keys: &[&str]| {
        keys.iter()
            .filter_map(|key| lookup(key))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
    };

    if let Some(dir) = first(&["KEEPER_SESSIONS_DIR"]) {
        config.storage.sessions_dir = PathBuf::from(dir);
    }
    if let Some(url) = first(&["KEEPER_BACKEND_URL", "LARAVEL_URL"]) {
        config.backend.base_url = url;
    }
    if let Some(key) = first(&["KEEPER_API_KEY", "API_SECRET_KEY"]) {
        config.backend.api_key = Some(key);
    }
    if let Some(device_id) = first(&["KEEPER_DEVICE_ID", "ZALO_IMEI"]) {
        config.client.device_id = device_id;
    }
    if let Some(user_agent) = first(&["KEEPER_USER_AGENT", "ZALO_USER_AGENT"]) {
        config.client.user_agent = user_agent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config.alerts.cooldown_secs, 600);
        assert_eq!(config.alerts.reauth_cooldown_secs, 300);
        assert_eq!(config.probe.escalation.network_warn, 5);
        assert_eq!(config.probe.escalation.network_escalate, 10);
        assert_eq!(config.activity.half_dead_secs, 1800);
        assert_eq!(config.schedule.keep_alive_interval_secs, 600);
    }

    #[test]
    fn load_config_parses_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("keeper.toml");
        fs_err::write(
            &path,
            r#"
[storage]
file_prefix = "acct"

[alerts]
cooldown_secs = 120
language = "en"

[restore.policy]
max_attempts = 5

[classifier]
network = ["gateway timeout"]
"#,
        )
        .expect("write config");

        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config.storage.file_prefix, "acct");
        assert_eq!(config.alerts.cooldown_secs, 120);
        assert_eq!(config.alerts.language, Language::En);
        assert_eq!(config.alerts.reauth_cooldown_secs, 300);
        assert_eq!(config.restore.policy.max_attempts, 5);
        assert_eq!(config.restore.policy.base_delay_ms, 5_000);
        assert_eq!(config.classifier.network, vec!["gateway timeout".to_string()]);
        assert!(!config.classifier.auth.is_empty());
    }

    #[test]
    fn load_config_rejects_malformed_toml() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("keeper.toml");
        fs_err::write(&path, "[alerts\ncooldown_secs = ").expect("write config");

        let err = load_config(Some(path)).expect_err("malformed config");
        assert!(matches!(err, KeeperError::ConfigMalformed { .. }));
    }

    #[test]
    fn env_overrides_prefer_first_non_empty_key() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("KEEPER_BACKEND_URL", ""),
            ("LARAVEL_URL", "https://backend.example"),
            ("API_SECRET_KEY", "secret"),
            ("KEEPER_SESSIONS_DIR", "/var/lib/keeper"),
            ("ZALO_USER_AGENT", "agent/2"),
        ]);
        let mut config = KeeperConfig::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.backend.base_url, "https://backend.example");
        assert_eq!(config.backend.api_key.as_deref(), Some("secret"));
        assert_eq!(config.storage.sessions_dir, PathBuf::from("/var/lib/keeper"));
        assert_eq!(config.client.user_agent, "agent/2");
        assert_eq!(config.client.device_id, DEFAULT_DEVICE_ID);
    }
}
