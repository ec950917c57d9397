use anyhow::{bail, Context, Result};
use std::time::Duration;

/// Default Slack Web API base; tests point this at a local mock.
pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,

    // ── Database ────────────────────────────────────────────────────────
    /// PostgreSQL connection string, or `memory` for the in-process store.
    pub database_url: String,

    // ── Slack App ───────────────────────────────────────────────────────
    pub slack_client_id: String,
    pub slack_client_secret: String,
    pub slack_redirect_uri: String,
    pub slack_api_base: String,

    // ── OAuth state ─────────────────────────────────────────────────────
    /// 32-byte base64-encoded HMAC key for state parameter signing.
    pub state_secret: String,

    // ── Scheduler ───────────────────────────────────────────────────────
    pub scan_interval: Duration,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let scan_interval_secs: u64 = std::env::var("SCAN_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .context("Invalid SCAN_INTERVAL_SECS")?;
        if scan_interval_secs == 0 {
            bail!("SCAN_INTERVAL_SECS must be greater than zero");
        }

        let http_timeout_secs: u64 = std::env::var("HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .context("Invalid HTTP_TIMEOUT_SECS")?;

        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "5000".into())
                .parse()
                .context("Invalid PORT")?,

            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL is required (PostgreSQL connection string or `memory`)")?,

            slack_client_id: std::env::var("SLACK_CLIENT_ID")
                .context("SLACK_CLIENT_ID is required")?,
            slack_client_secret: std::env::var("SLACK_CLIENT_SECRET")
                .context("SLACK_CLIENT_SECRET is required")?,
            slack_redirect_uri: std::env::var("SLACK_REDIRECT_URI")
                .context("SLACK_REDIRECT_URI is required")?,
            slack_api_base: std::env::var("SLACK_API_BASE")
                .unwrap_or_else(|_| DEFAULT_SLACK_API_BASE.into()),

            state_secret: std::env::var("STATE_SECRET")
                .context("STATE_SECRET is required (32 bytes, base64)")?,

            scan_interval: Duration::from_secs(scan_interval_secs),
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }

    /// Whether the in-memory store was requested instead of PostgreSQL.
    pub fn uses_memory_store(&self) -> bool {
        self.database_url.eq_ignore_ascii_case("memory")
    }

    /// Build the shared outbound HTTP client with the configured timeout.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
            .context("Failed to build HTTP client")
    }
}
