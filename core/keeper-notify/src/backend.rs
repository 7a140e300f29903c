//! Session status sync to the backend REST API.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use keeper_core::config::BackendConfig;
use keeper_core::{AccountId, BackendNotifier, BackendStatus};
use serde::Serialize;

use crate::error::{NotifyError, Result};

pub(crate) const API_KEY_HEADER: &str = "X-API-Key";

/// Body of `POST <backend><status_path>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusPayload {
    pub account_id: AccountId,
    pub status: BackendStatus,
    pub message: String,
    pub timestamp: String,
}

impl StatusPayload {
    pub fn new(account: AccountId, status: BackendStatus, message: &str, now: DateTime<Utc>) -> Self {
        StatusPayload {
            account_id: account,
            status,
            message: message.to_string(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Joins the configured base URL and an absolute API path.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, Clone)]
pub struct HttpBackendNotifier {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpBackendNotifier {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self::with_client(crate::http_client(config.request_timeout())?, config))
    }

    pub fn with_client(http: reqwest::Client, config: &BackendConfig) -> Self {
        HttpBackendNotifier {
            http,
            url: endpoint(&config.base_url, &config.status_path),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends one status update. The response body is not inspected.
    pub async fn post(&self, payload: &StatusPayload) -> Result<()> {
        let api_key = self.api_key.as_deref().ok_or(NotifyError::MissingApiKey)?;
        let response = self
            .http
            .post(&self.url)
            .header(API_KEY_HEADER, api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| NotifyError::request(&self.url, err))?;

        if !response.status().is_success() {
            return Err(NotifyError::Status {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BackendNotifier for HttpBackendNotifier {
    async fn report(&self, account: AccountId, status: BackendStatus, message: &str) {
        let payload = StatusPayload::new(account, status, message, Utc::now());
        match self.post(&payload).await {
            Ok(()) => tracing::info!(account_id = %account, status = %status, "Backend notified"),
            Err(NotifyError::MissingApiKey) => {
                tracing::warn!(account_id = %account, "No API key configured, backend not notified")
            }
            Err(err) => {
                tracing::warn!(account_id = %account, status = %status, error = %err, "Backend notify failed")
            }
        }
    }
}
