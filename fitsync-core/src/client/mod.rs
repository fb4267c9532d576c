//! HTTP client for the WHOOP v2 developer API
//!
//! Collection endpoints are Bearer-authenticated GETs returning a `records`
//! array plus a `nextToken` continuation cursor. The client follows the
//! cursor until it is empty or absent, retrying individual attempts on rate
//! limits and transient server errors with exponential backoff.

mod auth;
mod backoff;

pub use auth::{Credentials, EnvFileTokenStore, TokenStore, Tokens};
pub use backoff::Backoff;

use crate::config::WhoopConfig;
use crate::error::{Error, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Hard vendor ceiling on collection page size.
pub const MAX_PAGE_LIMIT: u32 = 25;

/// One page of a collection response.
#[derive(Debug, Deserialize)]
struct CollectionPage {
    #[serde(default)]
    records: Vec<serde_json::Value>,
    #[serde(default, rename = "nextToken", alias = "next_token")]
    next_token: Option<String>,
}

/// Token exchange response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Result of fetching one collection over a bounded range.
#[derive(Debug)]
pub struct FetchOutcome {
    pub records: Vec<serde_json::Value>,
    pub pages: u32,
}

/// WHOOP API client. Cheap to share; holds a pooled [`reqwest::Client`].
pub struct WhoopClient {
    http: reqwest::Client,
    api_base: String,
    token_url: String,
    scope: String,
    max_retries: u32,
    backoff_seed: Duration,
    backoff_cap: Duration,
}

impl WhoopClient {
    pub fn new(config: &WhoopConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            scope: config.scope.clone(),
            max_retries: config.max_retries,
            backoff_seed: backoff::DEFAULT_SEED,
            backoff_cap: backoff::DEFAULT_CAP,
        })
    }

    /// Override retry pacing. Tests use millisecond delays to keep retry
    /// paths fast; production keeps the defaults.
    pub fn set_retry_pacing(&mut self, seed: Duration, cap: Duration) {
        self.backoff_seed = seed;
        self.backoff_cap = cap;
    }

    /// Exchange the refresh token for a short-lived access token.
    ///
    /// When the vendor rotates the refresh token, the new value is handed to
    /// `store` before this function returns; the old token is invalid
    /// server-side from this point on.
    pub async fn refresh_access_token(
        &self,
        credentials: &Credentials,
        store: &dyn TokenStore,
    ) -> Result<Tokens> {
        use secrecy::ExposeSecret;

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose_secret()),
            ("refresh_token", credentials.refresh_token_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "token refresh failed: {} {}",
                status.as_u16(),
                body
            )));
        }

        let payload: TokenResponse = response.json().await?;

        if let Some(rotated) = payload
            .refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != credentials.refresh_token_str())
        {
            store.persist_refresh_token(rotated)?;
        }

        tracing::debug!(expires_in = ?payload.expires_in, "Access token refreshed");

        Ok(Tokens::new(
            payload.access_token,
            payload.refresh_token,
            payload.expires_in,
        ))
    }

    /// Fetch every record of a collection endpoint within `[since, until)`.
    ///
    /// `limit` is clamped to the vendor ceiling of 25 rather than rejected.
    /// Pagination follows the `nextToken` cursor with the same bounds on
    /// every page.
    pub async fn fetch_collection(
        &self,
        access_token: &str,
        path: &str,
        since: Option<&str>,
        until: Option<&str>,
        limit: u32,
    ) -> Result<FetchOutcome> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let url = format!("{}{}", self.api_base, path);

        let mut records = Vec::new();
        let mut pages = 0u32;
        let mut next_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
            if let Some(since) = since {
                query.push(("start", since.to_string()));
            }
            if let Some(until) = until {
                query.push(("end", until.to_string()));
            }
            if let Some(token) = &next_token {
                query.push(("nextToken", token.clone()));
            }

            let response = self.get_with_backoff(&url, access_token, &query).await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Remote {
                    status: status.as_u16(),
                    body,
                });
            }

            let page: CollectionPage = response.json().await?;
            records.extend(page.records);
            pages += 1;

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(path, pages, records = records.len(), "Collection fetched");

        Ok(FetchOutcome { records, pages })
    }

    /// Issue one GET, retrying 429 and 5xx responses with backoff.
    ///
    /// Backoff state is local to this call: a fresh logical request starts a
    /// fresh delay sequence. Returns the response for any non-retryable
    /// status; the caller decides whether that status is an error.
    async fn get_with_backoff(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let mut backoff = Backoff::with(self.backoff_seed, self.backoff_cap);
        let mut attempt = 0u32;

        loop {
            let response = self
                .http
                .get(url)
                .bearer_auth(access_token)
                .header(reqwest::header::ACCEPT, "application/json")
                .query(query)
                .send()
                .await?;

            let status = response.status();
            let rate_limited = status == StatusCode::TOO_MANY_REQUESTS;
            let server_error = status.is_server_error();

            if !rate_limited && !server_error {
                return Ok(response);
            }

            if attempt >= self.max_retries {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Remote {
                    status: status.as_u16(),
                    body,
                });
            }

            let wait = if rate_limited {
                backoff.rate_limit_delay(retry_after(&response))
            } else {
                backoff.server_error_delay()
            };

            tracing::warn!(
                %status,
                attempt,
                wait_ms = wait.as_millis() as u64,
                "Retryable response, backing off"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

/// Parse a `Retry-After` header given in seconds.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| *s >= 0.0)
        .map(Duration::from_secs_f64)
}
