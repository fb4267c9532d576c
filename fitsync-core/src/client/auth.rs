//! OAuth credentials and refresh-token persistence
//!
//! The vendor rotates refresh tokens on use: once an exchange succeeds, the
//! old token is dead server-side. A rotated token therefore has to reach the
//! [`TokenStore`] before the exchange response is dropped.

use crate::config::Config;
use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::time::Instant;

const REFRESH_TOKEN_KEY: &str = "WHOOP_REFRESH_TOKEN";

/// OAuth client credentials plus the current refresh token.
pub struct Credentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
}

impl Credentials {
    /// Load credentials from the process environment, falling back to the
    /// credential dotfile for the refresh token (which is where rotated
    /// tokens get persisted between runs).
    pub fn load() -> Result<Self> {
        Self::load_from(&Config::env_file_path())
    }

    /// Load credentials, reading the refresh-token fallback from `env_file`.
    pub fn load_from(env_file: &Path) -> Result<Self> {
        let client_id = std::env::var("WHOOP_CLIENT_ID").ok();
        let client_secret = std::env::var("WHOOP_CLIENT_SECRET").ok();
        let refresh_token = std::env::var(REFRESH_TOKEN_KEY)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| read_env_file_value(env_file, REFRESH_TOKEN_KEY));

        let mut missing = Vec::new();
        if client_id.as_deref().map_or(true, |v| v.trim().is_empty()) {
            missing.push("WHOOP_CLIENT_ID");
        }
        if client_secret.as_deref().map_or(true, |v| v.trim().is_empty()) {
            missing.push("WHOOP_CLIENT_SECRET");
        }
        if refresh_token.as_deref().map_or(true, |v| v.trim().is_empty()) {
            missing.push(REFRESH_TOKEN_KEY);
        }
        if !missing.is_empty() {
            return Err(Error::Auth(format!(
                "missing credentials: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            client_id: client_id.unwrap_or_default().trim().to_string(),
            client_secret: SecretString::from(
                client_secret.unwrap_or_default().trim().to_string(),
            ),
            refresh_token: SecretString::from(
                refresh_token.unwrap_or_default().trim().to_string(),
            ),
        })
    }

    /// Build credentials directly (tests, embedding).
    pub fn new(client_id: &str, client_secret: &str, refresh_token: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: SecretString::from(client_secret.to_string()),
            refresh_token: SecretString::from(refresh_token.to_string()),
        }
    }

    pub(crate) fn refresh_token_str(&self) -> &str {
        self.refresh_token.expose_secret()
    }
}

/// Short-lived access token from a refresh exchange.
#[derive(Debug)]
pub struct Tokens {
    pub access_token: SecretString,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    obtained_at: Instant,
}

impl Tokens {
    pub(crate) fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token),
            refresh_token,
            expires_in,
            obtained_at: Instant::now(),
        }
    }

    /// Whether the access token is within `skew_seconds` of expiry.
    /// Tokens without an expiry never report expired.
    pub fn is_expired(&self, skew_seconds: u64) -> bool {
        match self.expires_in {
            Some(expires_in) => {
                self.obtained_at.elapsed().as_secs() >= expires_in.saturating_sub(skew_seconds)
            }
            None => false,
        }
    }

    pub fn access_token_str(&self) -> &str {
        self.access_token.expose_secret()
    }
}

/// Sink for rotated refresh tokens.
pub trait TokenStore {
    /// Persist a rotated refresh token before the old one is discarded.
    fn persist_refresh_token(&self, token: &str) -> Result<()>;
}

/// Persists the refresh token into an env-style dotfile
/// (`WHOOP_REFRESH_TOKEN=...`), rewriting the existing line or appending.
pub struct EnvFileTokenStore {
    path: PathBuf,
}

impl EnvFileTokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the default XDG config location.
    pub fn at_default_path() -> Self {
        Self::new(Config::env_file_path())
    }
}

impl TokenStore for EnvFileTokenStore {
    fn persist_refresh_token(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let existing = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut lines: Vec<String> = Vec::new();
        let mut replaced = false;
        for line in existing.lines() {
            if line.starts_with(&format!("{REFRESH_TOKEN_KEY}=")) {
                lines.push(format!("{REFRESH_TOKEN_KEY}={token}"));
                replaced = true;
            } else {
                lines.push(line.to_string());
            }
        }
        if !replaced {
            lines.push(format!("{REFRESH_TOKEN_KEY}={token}"));
        }

        // Write-then-rename so a crash never leaves a truncated credential file
        let tmp = self.path.with_extension("env.tmp");
        std::fs::write(&tmp, lines.join("\n") + "\n")?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::info!(path = %self.path.display(), "Persisted rotated refresh token");
        Ok(())
    }
}

/// Read one `KEY=VALUE` entry from an env-style dotfile.
fn read_env_file_value(path: &Path, key: &str) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    for line in text.lines() {
        if let Some(value) = line.strip_prefix(&format!("{key}=")) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
