//! Where the bridge looks for its configuration and writes its logs.
//!
//! ## Resolution order
//!
//! 1. An explicit `--config` path (or `ABLETON_MCP_CONFIG`). It must exist.
//! 2. `ableton-mcp.yaml` in the current working directory.
//! 3. `<config dir>/ableton-mcp/config.yaml` (e.g. `~/Library/Application
//!    Support` on macOS, `~/.config` on Linux).
//!
//! When none of these exist the bridge runs on built-in defaults.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name under the platform config/data dirs
const APP_DIR: &str = "ableton-mcp";

/// File name picked up from the working directory
pub const LOCAL_CONFIG_FILE: &str = "ableton-mcp.yaml";

#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    /// Configuration file to load, if any was found
    pub config: Option<PathBuf>,
    /// Directory for the optional rolling log file
    pub logs_dir: PathBuf,
}

impl AppPaths {
    /// Resolve paths for this process.
    ///
    /// Called before logging is initialized; diagnostics go through
    /// `tracing::debug!` and are simply lost if nobody is listening yet.
    pub fn detect(explicit: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::resolve(explicit, &cwd, dirs::config_dir(), dirs::data_local_dir())
    }

    fn resolve(
        explicit: Option<&Path>,
        cwd: &Path,
        config_dir: Option<PathBuf>,
        data_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let logs_dir = data_dir
            .map(|d| d.join(APP_DIR).join("logs"))
            .unwrap_or_else(|| cwd.join("logs"));

        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Configuration file not found: {}", path.display());
            }
            return Ok(Self {
                config: Some(path.to_path_buf()),
                logs_dir,
            });
        }

        let candidates = [
            Some(cwd.join(LOCAL_CONFIG_FILE)),
            config_dir.map(|d| d.join(APP_DIR).join("config.yaml")),
        ];
        let config = candidates.into_iter().flatten().find(|p| {
            let found = p.is_file();
            debug!("config candidate {} (found: {})", p.display(), found);
            found
        });

        Ok(Self { config, logs_dir })
    }

    /// Human-readable config source for startup logs
    pub fn config_label(&self) -> String {
        self.config
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in defaults".to_string())
    }

    /// Create the logs directory if needed
    pub fn ensure_logs_dir(&self) -> Result<&Path> {
        if !self.logs_dir.exists() {
            std::fs::create_dir_all(&self.logs_dir)?;
        }
        Ok(&self.logs_dir)
    }
}
