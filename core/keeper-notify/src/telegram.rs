//! Telegram alert channel.
//!
//! Each account may have its own bot and chat. Settings come from the backend
//! (`GET <backend><settings_path>`) and are cached for a configurable TTL; a
//! failed refresh keeps serving the previous settings.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use keeper_core::config::BackendConfig;
use keeper_core::{AccountId, Notifier};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::backend::{endpoint, API_KEY_HEADER};
use crate::error::{NotifyError, Result};

const TELEGRAM_API: &str = "https://api.telegram.org";
const PARSE_MODE: &str = "Markdown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
struct SettingsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Vec<SettingsRow>,
}

#[derive(Debug, Deserialize)]
struct SettingsRow {
    account_id: Value,
    #[serde(default)]
    telegram_bot_token: Option<String>,
    #[serde(default)]
    telegram_chat_id: Value,
}

/// Numbers and numeric strings are both accepted for ids.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Parses the settings endpoint body. Rows without an account id, bot token
/// or chat id are dropped.
pub fn parse_settings(body: &str) -> Result<HashMap<AccountId, TelegramSettings>> {
    let response: SettingsResponse =
        serde_json::from_str(body).map_err(|err| NotifyError::Malformed(err.to_string()))?;
    if !response.success {
        return Err(NotifyError::Api("settings request was not successful".to_string()));
    }

    let settings = response
        .data
        .into_iter()
        .filter_map(|row| {
            let account = id_text(&row.account_id)?.parse::<AccountId>().ok()?;
            let bot_token = row.telegram_bot_token.filter(|token| !token.trim().is_empty())?;
            let chat_id = id_text(&row.telegram_chat_id)?;
            Some((account, TelegramSettings { bot_token, chat_id }))
        })
        .collect();
    Ok(settings)
}

#[derive(Debug, Default)]
struct SettingsCache {
    entries: HashMap<AccountId, TelegramSettings>,
    fetched_at: Option<Instant>,
}

impl SettingsCache {
    /// An empty successful fetch is as fresh as any other.
    fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        self.fetched_at
            .is_some_and(|fetched| now.saturating_duration_since(fetched) < ttl)
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    settings_url: String,
    api_key: Option<String>,
    api_base: String,
    ttl: Duration,
    cache: Mutex<SettingsCache>,
}

impl TelegramNotifier {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self::with_client(crate::http_client(config.request_timeout())?, config))
    }

    pub fn with_client(http: reqwest::Client, config: &BackendConfig) -> Self {
        TelegramNotifier {
            http,
            settings_url: endpoint(&config.base_url, &config.settings_path),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            api_base: TELEGRAM_API.to_string(),
            ttl: Duration::from_secs(config.settings_cache_ttl_secs),
            cache: Mutex::new(SettingsCache::default()),
        }
    }

    /// Points bot calls at a different API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Seeds the cache, marking it fresh as of now.
    pub fn prime(&self, entries: HashMap<AccountId, TelegramSettings>) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.entries = entries;
        cache.fetched_at = Some(Instant::now());
    }

    /// Settings for `account`, refreshing the cache when it is stale.
    pub async fn settings_for(&self, account: AccountId) -> Option<TelegramSettings> {
        self.refresh_if_stale().await;
        self.cached(account)
    }

    fn cached(&self, account: AccountId) -> Option<TelegramSettings> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(&account)
            .cloned()
    }

    async fn refresh_if_stale(&self) {
        let fresh = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_fresh(self.ttl, Instant::now());
        if fresh {
            return;
        }

        match self.fetch_settings().await {
            Ok(entries) => {
                tracing::info!(accounts = entries.len(), "Fetched Telegram settings");
                self.prime(entries);
            }
            Err(NotifyError::MissingApiKey) => {
                tracing::warn!("No API key configured, Telegram settings not fetched");
            }
            Err(err) => {
                tracing::warn!(error = %err, "Telegram settings refresh failed, keeping cached settings");
            }
        }
    }

    async fn fetch_settings(&self) -> Result<HashMap<AccountId, TelegramSettings>> {
        let api_key = self.api_key.as_deref().ok_or(NotifyError::MissingApiKey)?;
        let response = self
            .http
            .get(&self.settings_url)
            .header(API_KEY_HEADER, api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| NotifyError::request(&self.settings_url, err))?;

        if !response.status().is_success() {
            return Err(NotifyError::Status {
                url: self.settings_url.clone(),
                status: response.status().as_u16(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|err| NotifyError::request(&self.settings_url, err))?;
        parse_settings(&body)
    }

    fn method_url(&self, settings: &TelegramSettings, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_base.trim_end_matches('/'),
            settings.bot_token,
            method
        )
    }

    pub async fn send_message(&self, settings: &TelegramSettings, text: &str) -> Result<()> {
        let url = self.method_url(settings, "sendMessage");
        let body = SendMessage {
            chat_id: &settings.chat_id,
            text,
            parse_mode: PARSE_MODE,
        };
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| NotifyError::request("sendMessage", err))?;
        check_response(response).await
    }

    pub async fn send_photo(&self, settings: &TelegramSettings, path: &Path, caption: &str) -> Result<()> {
        let bytes = tokio::fs::read(path).await.map_err(|source| NotifyError::Artifact {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "qr.png".to_string());
        let photo = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/png")
            .map_err(|err| NotifyError::request("sendPhoto", err))?;
        let form = Form::new()
            .text("chat_id", settings.chat_id.clone())
            .text("caption", caption.to_string())
            .text("parse_mode", PARSE_MODE)
            .part("photo", photo);

        let url = self.method_url(settings, "sendPhoto");
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| NotifyError::request("sendPhoto", err))?;
        check_response(response).await
    }
}

/// Telegram reports failures in the body with `ok: false`.
async fn check_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| NotifyError::request("telegram", err))?;
    match serde_json::from_str::<TelegramResponse>(&body) {
        Ok(parsed) if parsed.ok => Ok(()),
        Ok(parsed) => Err(NotifyError::Api(
            parsed.description.unwrap_or_else(|| format!("status {status}")),
        )),
        Err(err) => Err(NotifyError::Malformed(err.to_string())),
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, account: AccountId, text: &str) {
        let Some(settings) = self.settings_for(account).await else {
            tracing::info!(account_id = %account, "No Telegram settings for account, alert skipped");
            return;
        };
        match self.send_message(&settings, text).await {
            Ok(()) => tracing::info!(account_id = %account, "Telegram message sent"),
            Err(err) => tracing::warn!(account_id = %account, error = %err, "Telegram message failed"),
        }
    }

    async fn send_artifact(&self, account: AccountId, path: &Path, caption: &str) {
        let Some(settings) = self.settings_for(account).await else {
            tracing::info!(account_id = %account, "No Telegram settings for account, artifact skipped");
            return;
        };
        match self.send_photo(&settings, path, caption).await {
            Ok(()) => tracing::info!(account_id = %account, path = %path.display(), "Telegram photo sent"),
            Err(err) => tracing::warn!(account_id = %account, error = %err, "Telegram photo failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(token: &str) -> TelegramSettings {
        TelegramSettings {
            bot_token: token.to_string(),
            chat_id: "-100200".to_string(),
        }
    }

    #[test]
    fn parse_settings_accepts_numeric_and_string_ids() {
        let body = r#"{
            "success": true,
            "data": [
                {"account_id": 3, "telegram_bot_token": "123:abc", "telegram_chat_id": -100200},
                {"account_id": "4", "telegram_bot_token": "456:def", "telegram_chat_id": "@ops"},
                {"account_id": 5, "telegram_bot_token": null, "telegram_chat_id": 1},
                {"account_id": 6, "telegram_bot_token": "789:ghi", "telegram_chat_id": null}
            ]
        }"#;

        let parsed = parse_settings(body).expect("parse");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[&AccountId(3)], settings("123:abc"));
        assert_eq!(parsed[&AccountId(4)].chat_id, "@ops");
    }

    #[test]
    fn parse_settings_rejects_unsuccessful_or_malformed_bodies() {
        assert!(matches!(
            parse_settings(r#"{"success": false, "data": []}"#),
            Err(NotifyError::Api(_))
        ));
        assert!(matches!(parse_settings("<html>"), Err(NotifyError::Malformed(_))));
    }

    #[test]
    fn empty_fetch_result_is_cached() {
        let never_fetched = SettingsCache::default();
        assert!(!never_fetched.is_fresh(Duration::from_secs(300), Instant::now()));

        let fetched_empty = SettingsCache {
            entries: HashMap::new(),
            fetched_at: Some(Instant::now()),
        };
        assert!(fetched_empty.is_fresh(Duration::from_secs(300), Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_goes_stale_after_ttl() {
        let start = Instant::now();
        let cache = SettingsCache {
            entries: HashMap::from([(AccountId(1), settings("t"))]),
            fetched_at: Some(start),
        };
        assert!(cache.is_fresh(Duration::from_secs(300), start));
        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!cache.is_fresh(Duration::from_secs(300), Instant::now()));
    }

    #[tokio::test]
    async fn primed_cache_serves_without_fetching() {
        let notifier = TelegramNotifier::new(&BackendConfig::default()).expect("client");
        notifier.prime(HashMap::from([(AccountId(7), settings("tok"))]));

        assert_eq!(notifier.settings_for(AccountId(7)).await, Some(settings("tok")));
        assert_eq!(notifier.settings_for(AccountId(8)).await, None);
    }

    #[test]
    fn method_url_embeds_bot_token() {
        let notifier = TelegramNotifier::new(&BackendConfig::default())
            .expect("client")
            .with_api_base("http://localhost:9/");
        assert_eq!(
            notifier.method_url(&settings("1:x"), "sendPhoto"),
            "http://localhost:9/bot1:x/sendPhoto"
        );
    }
}
