//! Configuration loading and validation.
//!
//! Loads relay configuration from `./config.toml` (or the path given via
//! `--config` / `$CHATRELAY_CONFIG_PATH`). Environment variables override
//! file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.
//!
//! The core treats the loaded record as immutable for the process
//! lifetime; nothing re-reads configuration after startup.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Where the loaded configuration came from. Returned alongside the
/// config so the caller can report it once logging is up — `load` runs
/// before any subscriber is initialized and must not log itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Loaded from a TOML file at this path.
    File(PathBuf),
    /// No file found; built-in defaults.
    Defaults,
}

/// Top-level relay configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Watched log file settings (`[watch]`).
    pub watch: WatchConfig,
    /// Webhook destination settings (`[webhook]`).
    pub webhook: WebhookConfig,
    /// Retry and queue settings (`[delivery]`).
    pub delivery: DeliveryConfig,
    /// Filesystem paths for persistent state (`[paths]`).
    pub paths: PathsConfig,
    /// Logging settings (`[log]`).
    pub log: LogConfig,
}

impl RelayConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// `path` comes from the CLI; when absent, `$CHATRELAY_CONFIG_PATH`
    /// and then `./config.toml` are tried. A missing file falls back to
    /// defaults (the webhook URL then fails validation with a clear
    /// message). The returned [`ConfigSource`] says which happened, for
    /// the caller to log once a subscriber exists.
    pub fn load(path: Option<PathBuf>) -> Result<(Self, ConfigSource)> {
        let (mut config, source) = Self::load_from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok((config, source))
    }

    fn load_from_file(path: Option<PathBuf>) -> Result<(Self, ConfigSource)> {
        let path = path
            .or_else(|| std::env::var("CHATRELAY_CONFIG_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config.toml"));

        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok((Self::from_toml(&contents)?, ConfigSource::File(path))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok((Self::default(), ConfigSource::Defaults))
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Parse a TOML string into config.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("CHATRELAY_LOG_FILE") {
            self.watch.log_file = v;
        }
        if let Some(v) = env("CHATRELAY_POLL_INTERVAL_MS") {
            match v.parse() {
                Ok(n) => self.watch.poll_interval_ms = n,
                Err(_) => tracing::warn!(
                    var = "CHATRELAY_POLL_INTERVAL_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("CHATRELAY_WEBHOOK_URL") {
            self.webhook.url = v;
        }
        if let Some(v) = env("CHATRELAY_TEMPLATE") {
            self.webhook.message_template = v;
        }
        if let Some(v) = env("CHATRELAY_CHECKPOINT_FILE") {
            self.paths.checkpoint_file = v;
        }
        if let Some(v) = env("CHATRELAY_LOG_LEVEL") {
            self.log.level = v;
        }
    }

    /// Validate settings the pipeline cannot start without.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty or unparsable webhook URL, a
    /// non-http(s) scheme, an empty log file path, or a zero poll
    /// interval. These are fatal at startup — better to refuse than run
    /// on unknown state.
    pub fn validate(&self) -> Result<()> {
        if self.watch.log_file.trim().is_empty() {
            anyhow::bail!("watch.log_file is not set — point it at the server's chat log");
        }
        if self.watch.poll_interval_ms == 0 {
            anyhow::bail!("watch.poll_interval_ms must be greater than zero");
        }
        if self.webhook.url.trim().is_empty() {
            anyhow::bail!(
                "webhook.url is not set — set it in config.toml or CHATRELAY_WEBHOOK_URL"
            );
        }
        let url = url::Url::parse(&self.webhook.url)
            .with_context(|| format!("webhook.url is not a valid URL: {}", self.webhook.url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("webhook.url must be http or https, got {}", url.scheme());
        }
        if self.delivery.max_attempts == 0 {
            anyhow::bail!("delivery.max_attempts must be at least 1");
        }
        if self.delivery.queue_capacity == 0 {
            anyhow::bail!("delivery.queue_capacity must be at least 1");
        }
        Ok(())
    }

    /// Resolved checkpoint file path. An empty setting falls back to
    /// `~/.chatrelay/checkpoint.json`.
    pub fn checkpoint_path(&self) -> Result<PathBuf> {
        if self.paths.checkpoint_file.trim().is_empty() {
            Ok(data_dir()?.join("checkpoint.json"))
        } else {
            Ok(PathBuf::from(&self.paths.checkpoint_file))
        }
    }

    /// Resolved logs directory. An empty setting falls back to
    /// `~/.chatrelay/logs`.
    pub fn logs_dir(&self) -> Result<PathBuf> {
        if self.paths.logs_dir.trim().is_empty() {
            Ok(data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.paths.logs_dir))
        }
    }
}

/// Resolve the relay's state directory (`~/.chatrelay/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn data_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".chatrelay"))
}

// ── Watch config ────────────────────────────────────────────────

/// Watched log file settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Path of the server log to tail.
    pub log_file: String,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// When no checkpoint exists, start at end-of-file instead of
    /// relaying the whole backlog.
    pub skip_backlog: bool,
}

impl WatchConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            log_file: String::new(),
            poll_interval_ms: 1_000,
            skip_backlog: true,
        }
    }
}

// ── Webhook config ──────────────────────────────────────────────

/// Webhook destination settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Destination URL (Discord-compatible webhook).
    pub url: String,
    /// Message template. Placeholders: `{platform_emoji}`, `{platform}`,
    /// `{speaker}`, `{message}`.
    pub message_template: String,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
}

impl WebhookConfig {
    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            message_template: "{platform_emoji} {platform} — **{speaker}**: {message}".to_string(),
            request_timeout_secs: 8,
        }
    }
}

// ── Delivery config ─────────────────────────────────────────────

/// Retry, backoff, and queue settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Maximum delivery attempts per message before it is dropped.
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds (attempt 1 retries after
    /// roughly this long; each further attempt doubles it).
    pub backoff_base_ms: u64,
    /// Upper bound on the backoff delay in milliseconds.
    pub backoff_max_ms: u64,
    /// Bounded in-memory queue between the tailer and the dispatcher.
    /// When full, polling pauses rather than growing without bound.
    pub queue_capacity: usize,
    /// How long shutdown waits for the in-flight delivery, in seconds.
    pub shutdown_grace_secs: u64,
}

impl DeliveryConfig {
    /// Shutdown grace as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            queue_capacity: 256,
            shutdown_grace_secs: 10,
        }
    }
}

// ── Paths config ────────────────────────────────────────────────

/// Filesystem paths for persistent state.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Checkpoint record path. Empty = `~/.chatrelay/checkpoint.json`.
    pub checkpoint_file: String,
    /// Directory for rotated JSON log files. Empty = `~/.chatrelay/logs`.
    pub logs_dir: String,
}

// ── Log config ──────────────────────────────────────────────────

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
