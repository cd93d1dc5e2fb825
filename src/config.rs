use anyhow::{bail, Context, Result};
use std::time::Duration;

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,

    // ── Database (PostgreSQL, shared with the account backend) ─────────
    pub database_url: String,

    // ── Crypto ──────────────────────────────────────────────────────────
    /// 32-byte base64-encoded master key for AES-256-GCM token encryption.
    pub master_key: String,
    /// Base64-encoded HMAC key shared with the account backend for session cookies.
    pub session_secret: String,
    pub session_cookie: String,

    // ── Twitch ──────────────────────────────────────────────────────────
    pub twitch_client_id: String,
    pub twitch_client_secret: String,
    pub twitch_redirect_url: String,
    pub twitch_bot_username: String,
    pub twitch_irc_addr: String,

    // ── Timing ──────────────────────────────────────────────────────────
    pub http_timeout: Duration,
    pub oauth_state_ttl: Duration,
    pub token_refresh_interval: Duration,

    /// Skip startup reconciliation and the refresh daemon.
    pub disable_integrations: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .context("Invalid PORT")?,

            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL is required (PostgreSQL connection string)")?,

            master_key: std::env::var("MASTER_KEY")
                .context("MASTER_KEY is required (32 bytes, base64)")?,
            session_secret: std::env::var("SESSION_SECRET")
                .context("SESSION_SECRET is required (base64)")?,
            session_cookie: std::env::var("SESSION_COOKIE").unwrap_or_else(|_| "session".into()),

            twitch_client_id: std::env::var("TWITCH_CLIENT_ID")
                .context("TWITCH_CLIENT_ID is required")?,
            twitch_client_secret: std::env::var("TWITCH_CLIENT_SECRET")
                .context("TWITCH_CLIENT_SECRET is required")?,
            twitch_redirect_url: std::env::var("TWITCH_REDIRECT_URL")
                .context("TWITCH_REDIRECT_URL is required")?,
            twitch_bot_username: std::env::var("TWITCH_BOT_USERNAME")
                .context("TWITCH_BOT_USERNAME is required")?,
            twitch_irc_addr: std::env::var("TWITCH_IRC_ADDR")
                .unwrap_or_else(|_| "irc.chat.twitch.tv:6667".into()),

            http_timeout: secs_var("HTTP_TIMEOUT_SECS", 5)?,
            oauth_state_ttl: secs_var("OAUTH_STATE_TTL_SECS", 600)?,
            token_refresh_interval: secs_var("TOKEN_REFRESH_INTERVAL_SECS", 300)?,

            disable_integrations: std::env::var("DISABLE_INTEGRATIONS")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
                .unwrap_or(false),
        };

        // Fail at startup rather than on the first callback.
        config.callback_path()?;

        Ok(config)
    }

    /// Path component of the Twitch redirect URL; the callback route is mounted here.
    pub fn callback_path(&self) -> Result<String> {
        let url = url::Url::parse(&self.twitch_redirect_url)
            .with_context(|| format!("Invalid TWITCH_REDIRECT_URL: {}", self.twitch_redirect_url))?;

        let path = url.path();
        if path.is_empty() || path == "/" {
            bail!("TWITCH_REDIRECT_URL must include a callback path");
        }

        Ok(path.to_string())
    }
}

fn secs_var(name: &str, default: u64) -> Result<Duration> {
    let secs = match std::env::var(name) {
        Ok(v) => v.parse().with_context(|| format!("Invalid {name}"))?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(secs))
}
