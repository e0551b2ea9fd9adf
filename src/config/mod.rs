//! Configuration management for the Ableton bridge
//!
//! Handles loading and validating the optional YAML configuration file and
//! applying environment overrides for the OSC endpoint.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub osc: OscConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// AbletonOSC endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OscConfig {
    #[serde(default = "default_osc_host")]
    pub host: String,
    /// Port AbletonOSC listens on
    #[serde(default = "default_send_port")]
    pub send_port: u16,
    /// Port AbletonOSC replies to; `null` means replies only come back to the
    /// sending socket
    #[serde(default = "default_reply_port")]
    pub reply_port: Option<u16>,
    /// Bounded wait for each query reply
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// GUI automation settings for the export sequencer
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ExportConfig {
    /// Application name used to bring Live to the front
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Process name as seen by System Events
    #[serde(default = "default_process_name")]
    pub process_name: String,
    /// Polls allowed for each dialog to appear
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound for the render to finish and its dialogs to close
    #[serde(default = "default_dismissal_timeout_ms")]
    pub dismissal_timeout_ms: u64,
    /// Pause after each keystroke so Live can redraw
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Bound for a single osascript invocation
    #[serde(default = "default_script_timeout_ms")]
    pub script_timeout_ms: u64,
    /// Pause between tracks of a group export so Live finishes writing
    #[serde(default = "default_group_export_delay_ms")]
    pub group_export_delay_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_output_folder: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Also write a daily-rolling log file into the logs directory
    #[serde(default)]
    pub file: bool,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            host: default_osc_host(),
            send_port: default_send_port(),
            reply_port: default_reply_port(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            process_name: default_process_name(),
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            dismissal_timeout_ms: default_dismissal_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            script_timeout_ms: default_script_timeout_ms(),
            group_export_delay_ms: default_group_export_delay_ms(),
            default_output_folder: None,
        }
    }
}

impl OscConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.send_port)
    }
}

impl ExportConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dismissal_timeout(&self) -> Duration {
        Duration::from_millis(self.dismissal_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    pub fn group_export_delay(&self) -> Duration {
        Duration::from_millis(self.group_export_delay_ms)
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        Ok(config)
    }

    /// Load the file if there is one, otherwise start from defaults.
    /// Environment overrides are applied in both cases.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path).await?,
            None => {
                debug!("No configuration file, using defaults");
                Self::default()
            },
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty file is a valid "all defaults" configuration
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply `ABLETON_OSC_*` environment variables on top of the file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("ABLETON_OSC_HOST") {
            if !host.trim().is_empty() {
                self.osc.host = host.trim().to_string();
            }
        }
        if let Some(port) = env_parse::<u16>("ABLETON_OSC_PORT")? {
            self.osc.send_port = port;
        }
        if let Ok(raw) = std::env::var("ABLETON_OSC_REPLY_PORT") {
            let raw = raw.trim();
            self.osc.reply_port = match raw {
                "" | "none" | "off" => None,
                _ => Some(raw.parse().with_context(|| {
                    format!("Invalid ABLETON_OSC_REPLY_PORT value: {}", raw)
                })?),
            };
        }
        if let Some(timeout) = env_parse::<u64>("ABLETON_OSC_TIMEOUT_MS")? {
            self.osc.timeout_ms = timeout;
        }
        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.osc.host.trim().is_empty() {
            anyhow::bail!("osc.host cannot be empty");
        }
        if self.osc.send_port == 0 {
            anyhow::bail!("osc.send_port cannot be 0");
        }
        if self.osc.reply_port == Some(self.osc.send_port) {
            anyhow::bail!(
                "osc.reply_port must differ from osc.send_port ({})",
                self.osc.send_port
            );
        }
        if self.osc.timeout_ms == 0 {
            anyhow::bail!("osc.timeout_ms must be greater than 0");
        }

        if self.export.poll_attempts == 0 {
            anyhow::bail!("export.poll_attempts must be at least 1");
        }
        if self.export.poll_interval_ms == 0 {
            anyhow::bail!("export.poll_interval_ms must be greater than 0");
        }
        if self.export.dismissal_timeout_ms == 0 {
            anyhow::bail!("export.dismissal_timeout_ms must be greater than 0");
        }
        if self.export.script_timeout_ms == 0 {
            anyhow::bail!("export.script_timeout_ms must be greater than 0");
        }
        if self.export.process_name.trim().is_empty() {
            anyhow::bail!("export.process_name cannot be empty");
        }

        if let Some(level) = &self.logging.level {
            const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
            if !LEVELS.contains(&level.to_lowercase().as_str()) {
                anyhow::bail!(
                    "logging.level '{}' is invalid (expected one of {})",
                    level,
                    LEVELS.join(", ")
                );
            }
        }

        Ok(())
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Invalid {} value: {}", name, raw)),
        _ => Ok(None),
    }
}

// Default value functions
fn default_osc_host() -> String { "127.0.0.1".to_string() }
fn default_send_port() -> u16 { 11000 }
fn default_reply_port() -> Option<u16> { Some(11001) }
fn default_timeout_ms() -> u64 { 2000 }
fn default_app_name() -> String { "Ableton Live 12 Suite".to_string() }
fn default_process_name() -> String { "Live".to_string() }
fn default_poll_attempts() -> u32 { 10 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_dismissal_timeout_ms() -> u64 { 120_000 }
fn default_settle_delay_ms() -> u64 { 300 }
fn default_script_timeout_ms() -> u64 { 30_000 }
fn default_group_export_delay_ms() -> u64 { 2000 }
