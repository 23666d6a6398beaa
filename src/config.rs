//! Configuration file parser for `feedrelay.toml`.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos. The loaded value is immutable; the poller,
//! retrier and publisher receive the slices they need at construction.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// How delivered messages are formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageMode {
    #[default]
    Html,
    Markdown,
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Custom Debug impl masks tokens so they never reach the logs.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file.
    pub database_path: String,

    /// Directory holding `<lang>.json` translation files.
    pub locale_dir: String,

    /// Language used when a subscriber has none or an unknown one.
    pub default_language: String,

    /// Default poll interval per source, in minutes.
    pub update_interval_minutes: u64,

    /// Consecutive fetch failures before a source is disabled.
    pub error_threshold: u32,

    /// Attempt bound shared by delivery and preview publishing.
    pub max_retries: u32,

    /// Base delay for exponential backoff, in seconds.
    pub base_backoff_secs: u64,

    /// Sources fetched concurrently within one cycle.
    pub max_concurrent_fetches: usize,

    /// Subscribers delivered to concurrently per broadcast.
    pub fanout_concurrency: usize,

    /// Characters of item description included as a preview; 0 disables it.
    pub preview_text: usize,

    pub message_mode: MessageMode,

    pub disable_web_page_preview: bool,

    /// User-Agent sent with feed requests.
    pub user_agent: String,

    pub enable_telegraph: bool,

    /// One access token per Telegraph account in the publishing pool.
    pub telegraph_tokens: Vec<String>,

    /// Preview page author when the source has no title.
    pub telegraph_author_name: String,

    /// Preview page author link when the item has none.
    pub telegraph_author_url: String,

    /// Base URL of an unrender service returning article Markdown.
    pub unrender_url: Option<String>,

    pub unrender_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "feedrelay.db".to_string(),
            locale_dir: "locales".to_string(),
            default_language: "en".to_string(),
            update_interval_minutes: 10,
            error_threshold: 100,
            max_retries: 3,
            base_backoff_secs: 1,
            max_concurrent_fetches: 10,
            fanout_concurrency: 16,
            preview_text: 0,
            message_mode: MessageMode::Html,
            disable_web_page_preview: false,
            user_agent: concat!("feedrelay/", env!("CARGO_PKG_VERSION")).to_string(),
            enable_telegraph: false,
            telegraph_tokens: Vec::new(),
            telegraph_author_name: "feedrelay".to_string(),
            telegraph_author_url: String::new(),
            unrender_url: None,
            unrender_token: None,
        }
    }
}

fn redact<T>(value: &Option<T>) -> Option<&'static str> {
    value.as_ref().map(|_| "[REDACTED]")
}

/// Mask tokens in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("locale_dir", &self.locale_dir)
            .field("default_language", &self.default_language)
            .field("update_interval_minutes", &self.update_interval_minutes)
            .field("error_threshold", &self.error_threshold)
            .field("max_retries", &self.max_retries)
            .field("base_backoff_secs", &self.base_backoff_secs)
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .field("fanout_concurrency", &self.fanout_concurrency)
            .field("preview_text", &self.preview_text)
            .field("message_mode", &self.message_mode)
            .field("disable_web_page_preview", &self.disable_web_page_preview)
            .field("user_agent", &self.user_agent)
            .field("enable_telegraph", &self.enable_telegraph)
            .field(
                "telegraph_tokens",
                &format_args!("[{} REDACTED]", self.telegraph_tokens.len()),
            )
            .field("telegraph_author_name", &self.telegraph_author_name)
            .field("telegraph_author_url", &self.telegraph_author_url)
            .field("unrender_url", &self.unrender_url)
            .field("unrender_token", &redact(&self.unrender_token))
            .finish()
    }
}

const KNOWN_KEYS: &[&str] = &[
    "database_path",
    "locale_dir",
    "default_language",
    "update_interval_minutes",
    "error_threshold",
    "max_retries",
    "base_backoff_secs",
    "max_concurrent_fetches",
    "fanout_concurrency",
    "preview_text",
    "message_mode",
    "disable_web_page_preview",
    "user_agent",
    "enable_telegraph",
    "telegraph_tokens",
    "telegraph_author_name",
    "telegraph_author_url",
    "unrender_url",
    "unrender_token",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Zero thresholds or bounds → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid loading a huge file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            interval_minutes = config.update_interval_minutes,
            error_threshold = config.error_threshold,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply the `FEEDRELAY_TELEGRAPH_TOKENS` override.
    ///
    /// Environment variables take precedence over the config file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(tokens) = std::env::var("FEEDRELAY_TELEGRAPH_TOKENS") {
            let parsed: Vec<String> = tokens
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            if !parsed.is_empty() {
                self.telegraph_tokens = parsed;
            }
        }
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.error_threshold == 0 {
            return Err(ConfigError::Invalid("error_threshold must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }
        if self.update_interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "update_interval_minutes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn telegraph_tokens(&self) -> Vec<SecretString> {
        self.telegraph_tokens
            .iter()
            .cloned()
            .map(SecretString::from)
            .collect()
    }

    pub fn unrender_token(&self) -> Option<SecretString> {
        self.unrender_token.clone().map(SecretString::from)
    }

    /// Scheduling parameters for the source poller.
    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            default_interval: Duration::from_secs(self.update_interval_minutes.saturating_mul(60)),
            cycle_period: Duration::from_secs(60),
            error_threshold: self.error_threshold,
            max_concurrent_fetches: self.max_concurrent_fetches.max(1),
            enable_telegraph: self.enable_telegraph,
        }
    }

    /// Rendering and concurrency parameters for broadcasting.
    pub fn fanout(&self) -> FanoutConfig {
        FanoutConfig {
            default_language: self.default_language.clone(),
            preview_text: self.preview_text,
            disable_web_page_preview: self.disable_web_page_preview,
            concurrency: self.fanout_concurrency.max(1),
        }
    }

    /// Retry bounds shared by delivery and preview publishing.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_backoff: Duration::from_secs(self.base_backoff_secs),
        }
    }
}

/// Immutable scheduling parameters of [`SourcePoller`](crate::poller::SourcePoller).
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval used when no subscription overrides it.
    pub default_interval: Duration,
    /// How often the scheduler looks for due sources.
    pub cycle_period: Duration,
    /// Error count at which a source is disabled.
    pub error_threshold: u32,
    pub max_concurrent_fetches: usize,
    /// Publish preview pages for new items.
    pub enable_telegraph: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Config::default().poller()
    }
}

/// Immutable parameters of [`BroadcastFanout`](crate::fanout::BroadcastFanout).
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Language used when a subscriber has none stored.
    pub default_language: String,
    /// Characters of description shown as preview; 0 disables previews.
    pub preview_text: usize,
    pub disable_web_page_preview: bool,
    /// Subscribers served at the same time.
    pub concurrency: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Config::default().fanout()
    }
}

/// Attempt bound and base delay for outbound retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Config::default().retry_policy()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("feedrelay_config_test_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("feedrelay.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.update_interval_minutes, 10);
        assert_eq!(config.error_threshold, 100);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_backoff_secs, 1);
        assert_eq!(config.default_language, "en");
        assert_eq!(config.message_mode, MessageMode::Html);
        assert!(!config.enable_telegraph);
        assert!(config.telegraph_tokens.is_empty());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedrelay_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.error_threshold, 100);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.update_interval_minutes, 10);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let path = write_config("partial", "error_threshold = 3\nmessage_mode = \"markdown\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.error_threshold, 3);
        assert_eq!(config.message_mode, MessageMode::Markdown);
        assert_eq!(config.max_retries, 3);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let path = write_config("zero_threshold", "error_threshold = 0\n");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let path = write_config("unknown", "totally_fake_key = 1\nerror_threshold = 7\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.error_threshold, 7);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_debug_masks_tokens() {
        let config = Config {
            telegraph_tokens: vec!["tg-secret-1".into(), "tg-secret-2".into()],
            unrender_token: Some("unrender-secret".into()),
            ..Config::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("tg-secret"));
        assert!(!debug_output.contains("unrender-secret"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(debug_output.contains("[2 REDACTED]"));
    }

    #[test]
    fn test_derived_policies() {
        let config = Config {
            update_interval_minutes: 5,
            error_threshold: 3,
            max_retries: 4,
            base_backoff_secs: 2,
            ..Config::default()
        };
        let poller = config.poller();
        assert_eq!(poller.default_interval, Duration::from_secs(300));
        assert_eq!(poller.error_threshold, 3);

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.base_backoff, Duration::from_secs(2));
    }
}
