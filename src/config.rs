//! Configuration and settings management
//!
//! Loads settings from environment variables and defines tuning constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub bot_token: String,

    /// Numeric identifier of the channel users must be subscribed to
    pub channel_id: i64,

    /// Public handle of the required channel, used for the subscribe link
    #[serde(default = "default_channel_username")]
    pub channel_username: String,

    /// Public base URL for webhook delivery. Long polling is used when unset.
    pub webhook_url: Option<String>,

    /// Port for the webhook / health endpoint
    #[serde(default = "default_port")]
    pub port: u16,

    /// Working directory for transient downloads
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,

    /// Path to the yt-dlp executable
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,
}

fn default_channel_username() -> String {
    "@flawlessvideohub".to_string()
}

const fn default_port() -> u16 {
    8080
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_ytdlp_path() -> String {
    "yt-dlp".to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use reel_relay_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails, the token is empty,
    /// or the channel id is zero.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP_PORT=9000 ./target/app` would set the `port` key
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain env vars: BOT_TOKEN -> bot_token. Empty vars count as unset.
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bot_token.trim().is_empty() {
            return Err(ConfigError::Message("BOT_TOKEN is empty".to_string()));
        }
        if self.channel_id == 0 {
            return Err(ConfigError::Message(
                "CHANNEL_ID must be the numeric id of the required channel".to_string(),
            ));
        }
        Ok(())
    }

    /// Channel handle without the leading `@`
    #[must_use]
    pub fn channel_handle(&self) -> &str {
        self.channel_username.trim_start_matches('@')
    }

    /// Full webhook URL (`<base>/webhook`), if webhook mode is configured
    #[must_use]
    pub fn webhook_endpoint(&self) -> Option<String> {
        self.webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .map(|base| format!("{}{WEBHOOK_PATH}", base.trim_end_matches('/')))
    }
}

/// Path Telegram posts updates to in webhook mode
pub const WEBHOOK_PATH: &str = "/webhook";

// Rate limiting
/// Sliding window length for the message quota
pub const FLOOD_WINDOW_SECS: u64 = 60;
/// Messages allowed per user inside the window
pub const FLOOD_MAX_MESSAGES: usize = 5;
/// Minimum interval between two downloads of one user
pub const DOWNLOAD_COOLDOWN_SECS: u64 = 30;

// Downloads
/// Files below this size go out as inline video, the rest as documents (50 MiB)
pub const INLINE_VIDEO_LIMIT_BYTES: u64 = 50 * 1024 * 1024;
/// Hard limit for one yt-dlp run
pub const YTDLP_TIMEOUT_SECS: u64 = 600; // 10 minutes
/// Leftover files older than this are purged by the sweeper
pub const STALE_DOWNLOAD_MAX_AGE_SECS: u64 = 3600;
/// Interval between sweeps of the downloads directory
pub const STALE_DOWNLOAD_SWEEP_SECS: u64 = 600; // 10 minutes
