//! Authorization header construction and token caching.
//!
//! The cache is owned by a client instance. Clock and token source are
//! injectable so expiry handling can be driven deterministically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{PlatformError, Result};

/// Refresh this long before the platform-reported expiry.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: u64 = 4 * 60 * 60;

pub const DEFAULT_TOKEN_URL: &str = "https://www.wixapis.com/oauth2/token";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A freshly issued access token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<IssuedToken>;
}

/// How requests are authorized.
#[derive(Clone)]
pub enum AuthMode {
    /// Long-lived API key, sent as-is.
    StaticToken(String),
    /// Client-credentials grant; tokens are cached and refreshed.
    ClientCredentials(Arc<dyn TokenSource>),
}

#[derive(Debug, Clone)]
struct CachedToken {
    header: String,
    expires_at: DateTime<Utc>,
}

pub struct CredentialCache {
    mode: AuthMode,
    clock: Arc<dyn Clock>,
    refresh_margin: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl CredentialCache {
    pub fn new(mode: AuthMode) -> Self {
        Self {
            mode,
            clock: Arc::new(SystemClock),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            cached: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Value for the `Authorization` header. Fetches a new token when none is
    /// cached or the cached one expires within the refresh margin.
    pub async fn authorization_header(&self) -> Result<String> {
        let source = match &self.mode {
            AuthMode::StaticToken(token) => return Ok(token.clone()),
            AuthMode::ClientCredentials(source) => source,
        };

        // Held across the fetch so concurrent callers share one refresh.
        let mut cached = self.cached.lock().await;
        let now = self.clock.now();
        let margin = chrono::Duration::from_std(self.refresh_margin)
            .unwrap_or_else(|_| chrono::Duration::zero());

        if let Some(token) = cached.as_ref() {
            if now < token.expires_at - margin {
                return Ok(token.header.clone());
            }
        }

        debug!("Fetching new platform access token");
        let issued = source.fetch_token().await?;
        let ttl = chrono::Duration::from_std(issued.expires_in)
            .map_err(|_| PlatformError::auth("token lifetime out of range"))?;
        let token = CachedToken {
            header: issued.access_token,
            expires_at: now + ttl,
        };
        let header = token.header.clone();
        *cached = Some(token);
        Ok(header)
    }

    /// Drops the cached token, e.g. after the platform answered 401.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Client-credentials grant against the platform's OAuth endpoint.
pub struct OAuthTokenSource {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    instance_id: Option<String>,
}

impl OAuthTokenSource {
    pub fn new(
        http: reqwest::Client,
        token_url: &str,
        client_id: String,
        client_secret: String,
        instance_id: Option<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.to_string(),
            client_id,
            client_secret,
            instance_id,
        }
    }
}

#[async_trait]
impl TokenSource for OAuthTokenSource {
    async fn fetch_token(&self) -> Result<IssuedToken> {
        let mut body = serde_json::json!({
            "grant_type": "client_credentials",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
        });
        if let Some(instance_id) = &self.instance_id {
            body["instance_id"] = serde_json::Value::String(instance_id.clone());
        }

        let response = self.http.post(&self.token_url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(PlatformError::auth(format!(
                "token endpoint returned {}: {}",
                status, text
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&text)?;
        Ok(IssuedToken {
            access_token: parsed.access_token,
            expires_in: Duration::from_secs(parsed.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS)),
        })
    }
}
