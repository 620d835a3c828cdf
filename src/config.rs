//! Configuration loading and validation.
//!
//! Loads relay configuration from `./wa-relay.toml` (or `$WA_RELAY_CONFIG`).
//! A `.env` file in the working directory is read first, so its values act
//! like real environment variables.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "wa-relay.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level relay configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Outbound webhook settings.
    pub webhook: WebhookConfig,
    /// WhatsApp sidecar connection settings.
    pub session: SessionConfig,
    /// Sidecar container settings used by `setup`.
    pub sidecar: SidecarConfig,
    /// Log level and log file location.
    pub logging: LoggingConfig,
    /// How long `start` waits for in-flight messages on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            webhook: WebhookConfig::default(),
            session: SessionConfig::default(),
            sidecar: SidecarConfig::default(),
            logging: LoggingConfig::default(),
            shutdown_timeout_secs: 30,
        }
    }
}

impl RelayConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// `explicit_path` (from `--config`) wins over `$WA_RELAY_CONFIG`.
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `.env` or the file exists but cannot be read or
    /// parsed, if an env override has the wrong type, or if the merged
    /// configuration fails validation.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e).context("failed to read .env file");
            }
        }

        let path = match explicit_path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path_with(|key| std::env::var(key).ok()),
        };
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    fn load_from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents)
                .with_context(|| format!("invalid config at {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config file path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        match env("WA_RELAY_CONFIG") {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable if a numeric override does not
    /// parse.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        // Webhook.
        if let Some(v) = env("WA_RELAY_WEBHOOK_URL") {
            self.webhook.url = v;
        }
        if let Some(v) = env("WA_RELAY_WEBHOOK_TIMEOUT_SECS") {
            parse_override("WA_RELAY_WEBHOOK_TIMEOUT_SECS", &v, &mut self.webhook.timeout_secs)?;
        }
        if let Some(v) = env("WA_RELAY_WEBHOOK_MAX_RETRIES") {
            parse_override("WA_RELAY_WEBHOOK_MAX_RETRIES", &v, &mut self.webhook.max_retries)?;
        }
        if let Some(v) = env("WA_RELAY_FALLBACK_MESSAGE") {
            self.webhook.fallback_message = v;
        }

        // Session and sidecar.
        if let Some(v) = env("WA_RELAY_BRIDGE_URL") {
            self.session.bridge_url = v;
        }
        if let Some(v) = env("WA_RELAY_SIDECAR_IMAGE") {
            self.sidecar.image = v;
        }

        // Logging.
        if let Some(v) = env("WA_RELAY_LOGS_DIR") {
            self.logging.logs_dir = Some(PathBuf::from(v));
        }

        if let Some(v) = env("WA_RELAY_SHUTDOWN_TIMEOUT_SECS") {
            parse_override(
                "WA_RELAY_SHUTDOWN_TIMEOUT_SECS",
                &v,
                &mut self.shutdown_timeout_secs,
            )?;
        }
        Ok(())
    }

    /// Check values that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.webhook.url)
            .with_context(|| format!("webhook.url is not a valid URL: {}", self.webhook.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("webhook.url must use http or https, got {}", url.scheme());
        }
        let bridge = url::Url::parse(&self.session.bridge_url).with_context(|| {
            format!(
                "session.bridge_url is not a valid URL: {}",
                self.session.bridge_url
            )
        })?;
        if self.webhook.fallback_message.trim().is_empty() {
            anyhow::bail!("webhook.fallback_message must not be empty");
        }
        if self.session.channel_buffer_size == 0 {
            anyhow::bail!("session.channel_buffer_size must be greater than zero");
        }
        if is_loopback_host(bridge.host_str()) {
            let bridge_port = bridge.port_or_known_default();
            if bridge_port != Some(self.sidecar.port) {
                anyhow::bail!(
                    "session.bridge_url {} does not match sidecar.port {}",
                    self.session.bridge_url,
                    self.sidecar.port
                );
            }
        }
        Ok(())
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrong value types.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: RelayConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

fn parse_override<T: std::str::FromStr>(var: &str, value: &str, slot: &mut T) -> Result<()> {
    *slot = value
        .parse()
        .map_err(|_| anyhow::anyhow!("{var} must be a number, got {value:?}"))?;
    Ok(())
}

fn is_loopback_host(host: Option<&str>) -> bool {
    matches!(host, Some("127.0.0.1" | "localhost" | "[::1]"))
}

// ── Webhook config ──────────────────────────────────────────────

/// Outbound webhook settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Endpoint that receives `{sender, recipient, text}`.
    pub url: String,
    /// Per-attempt request timeout in seconds.
    pub timeout_secs: u64,
    /// Extra attempts after the first failure. Zero means a single attempt.
    pub max_retries: u32,
    /// Fixed delay between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Text sent to the sender when the forward or reply path fails.
    pub fallback_message: String,
}

impl WebhookConfig {
    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/webhook/whatsapp".to_owned(),
            timeout_secs: 30,
            max_retries: 0,
            retry_delay_ms: 500,
            fallback_message: "Service is temporarily unavailable, please try again later."
                .to_owned(),
        }
    }
}

// ── Session config ──────────────────────────────────────────────

/// Connection to the WhatsApp sidecar's HTTP API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the sidecar bridge.
    pub bridge_url: String,
    /// Long-poll timeout for `/events/poll` in seconds.
    pub poll_timeout_secs: u64,
    /// Buffer size of the event channel between listener and dispatcher.
    pub channel_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bridge_url: "http://127.0.0.1:3001".to_owned(),
            poll_timeout_secs: 60,
            channel_buffer_size: 100,
        }
    }
}

// ── Sidecar config ──────────────────────────────────────────────

/// Docker settings for the sidecar container.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Image to pull and run.
    pub image: String,
    /// Container name, used to find an existing container.
    pub container_name: String,
    /// Host port the bridge is published on (bound to 127.0.0.1).
    pub port: u16,
    /// Named volume holding the session credentials.
    pub auth_volume: String,
    /// Mount point of the credentials volume inside the container.
    pub auth_mount: String,
    /// Container memory limit in megabytes.
    pub memory_mb: u32,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            image: "wa-relay-sidecar:latest".to_owned(),
            container_name: "wa-relay-sidecar".to_owned(),
            port: 3001,
            auth_volume: "wa-relay-auth".to_owned(),
            auth_mount: "/data/auth".to_owned(),
            memory_mb: 512,
        }
    }
}

// ── Logging config ──────────────────────────────────────────────

/// Log filter and file location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rotated JSON logs. `None` means `~/.wa-relay/logs`.
    pub logs_dir: Option<PathBuf>,
}

impl LoggingConfig {
    /// Resolve the logs directory, falling back to `~/.wa-relay/logs`.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is configured and the home directory
    /// cannot be determined.
    pub fn resolve_logs_dir(&self) -> Result<PathBuf> {
        match &self.logs_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config_dir()?.join("logs")),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            logs_dir: None,
        }
    }
}

/// Resolve the relay's state directory (`~/.wa-relay/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".wa-relay"))
}
