use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::engine::permissions::{Permissions, parse_mask};
use crate::engine::server::ServerViewState;

/// Default per-request timeout, covering connect through body read.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelope every Refractor REST response is wrapped in.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    payload: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_payload(self, endpoint: &str) -> Result<T> {
        if !self.success {
            return Err(anyhow!(
                "{} failed: {}",
                endpoint,
                self.message.as_deref().unwrap_or("no message")
            ));
        }
        self.payload
            .ok_or_else(|| anyhow!("{} returned no payload", endpoint))
    }
}

/// The authenticated dashboard user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
    /// Decimal string; may exceed what a double can represent.
    #[serde(default)]
    permissions: Option<String>,
}

impl CurrentUser {
    pub fn permissions(&self) -> Permissions {
        parse_mask(self.permissions.as_deref())
    }
}

/// Snapshot loader over the Refractor REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        Self::with_timeout(base_url, token, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("invalid API base URL {base_url}"))?;
        // Url::join replaces the last segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path {path}"))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!(%url, "GET");

        let mut req = self.http.get(url.clone());
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;

        let body: ApiResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("failed to decode response from {url}"))?;
        body.into_payload(path)
    }

    /// Fetch every server with its current roster, as sent. Duplicate roster
    /// entries are removed by [`LiveState::load_snapshot`](crate::engine::reconciler::LiveState::load_snapshot).
    pub async fn fetch_servers(&self) -> Result<Vec<ServerViewState>> {
        self.get("servers/").await
    }

    pub async fn fetch_current_user(&self) -> Result<CurrentUser> {
        self.get("users/me").await
    }
}
