use super::UsageFetcher;
use crate::error::FetchError;
use crate::models::credentials::{resolve_session, CookieSource};
use crate::models::*;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;

/// Connection settings for the usage endpoint
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub organization_id: Option<String>,
}

impl From<&UserConfig> for ApiConfig {
    fn from(config: &UserConfig) -> Self {
        Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            timeout_seconds: config.request_timeout_seconds,
            organization_id: config.organization_id.clone(),
        }
    }
}

/// claude.ai usage client authenticated with browser session cookies.
///
/// Makes exactly one request per fetch; the next poll is the retry.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: ApiConfig,
    cookie_sources: Vec<CookieSource>,
}

impl ApiClient {
    pub fn new(config: ApiConfig, cookie_sources: Vec<CookieSource>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            cookie_sources,
        })
    }

    pub fn from_config(config: &UserConfig) -> Result<Self> {
        let sources = CookieSource::chain(config.cookie_file.as_deref());
        Self::new(ApiConfig::from(config), sources)
    }

    pub fn usage_url(&self, org_id: &str) -> String {
        format!("{}/{}/usage", self.config.base_url, org_id)
    }

    async fn handle_response(&self, response: Response) -> Result<MetricSnapshot, FetchError> {
        let status = response.status();
        if !status.is_success() {
            log::warn!("Usage endpoint returned {}", status);
            return Err(FetchError::RemoteError(status.as_u16()));
        }

        let body = response.text().await?;
        serde_json::from_str::<MetricSnapshot>(&body)
            .map_err(|e| FetchError::Transport(format!("Failed to parse usage response: {e}")))
    }

    /// Connection summary without cookie values
    pub fn get_config_info(&self) -> String {
        format!(
            "Base URL: {}, Timeout: {}s, Cookie sources: {}, Org override: {}",
            self.config.base_url,
            self.config.timeout_seconds,
            self.cookie_sources.len(),
            if self.config.organization_id.is_some() { "yes" } else { "no" }
        )
    }
}

#[async_trait]
impl UsageFetcher for ApiClient {
    async fn fetch_snapshot(&self) -> Result<MetricSnapshot, FetchError> {
        let session = resolve_session(&self.cookie_sources, self.config.organization_id.as_deref())?;
        let url = self.usage_url(&session.org_id);
        log::debug!("Fetching usage from {}", url);

        let response = self
            .client
            .get(&url)
            .header("Cookie", session.cookies.header_value())
            .header("Content-Type", "application/json")
            .send()
            .await?;

        self.handle_response(response).await
    }
}
