//! Service configuration.
//!
//! Configuration lives in a single TOML file with a `[vault]` section
//! ([`VaultConfig`]) and a `[service]` section ([`ServiceConfig`]).  Every
//! key is optional; a missing file means "all defaults".
//!
//! ```toml
//! [vault]
//! data_directory = "data"
//! share_count = 5
//! recovery_threshold = 3
//!
//! [service]
//! pipe_name = "AegisMint"
//! allow_dev_bypass_unlock = false
//! default_unlock_minutes = 15
//! log_file = "logs/service.log"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use aegis_vault::VaultConfig;

use crate::error::{Result, ServiceError};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "AEGIS_CONFIG";

/// Settings for the channel server and dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Channel name.  On Windows this is the pipe `\\.\pipe\<pipe_name>`; on
    /// Unix it names the default socket file.
    pub pipe_name: String,

    /// Explicit Unix socket path, overriding `<tmp>/<pipe_name>.sock`.
    pub socket_path: Option<PathBuf>,

    /// Permit `unlock_for_development`.  Never enable in production.
    pub allow_dev_bypass_unlock: bool,

    /// Window length used when a dev unlock gives no `minutes`.
    pub default_unlock_minutes: u32,

    /// File the service logs to, and `get_recent_logs` reads from.
    pub log_file: PathBuf,

    /// How long a client waits to connect, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pipe_name: "AegisMint".into(),
            socket_path: None,
            allow_dev_bypass_unlock: false,
            default_unlock_minutes: 15,
            log_file: PathBuf::from("logs").join("service.log"),
            connect_timeout_ms: 5_000,
        }
    }
}

impl ServiceConfig {
    /// Allow or refuse development unlocks.
    pub fn with_dev_unlock(mut self, allow: bool) -> Self {
        self.allow_dev_bypass_unlock = allow;
        self
    }

    /// Set the default dev unlock window.
    pub fn with_default_unlock_minutes(mut self, minutes: u32) -> Self {
        self.default_unlock_minutes = minutes;
        self
    }

    /// Set the log file path.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = path.into();
        self
    }

    /// Use an explicit Unix socket path.
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    /// Set the channel name.
    pub fn with_pipe_name(mut self, name: impl Into<String>) -> Self {
        self.pipe_name = name.into();
        self
    }

    /// Client connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check the values that cannot be clamped.
    pub fn validate(&self) -> Result<()> {
        let name = self.pipe_name.trim();
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ServiceError::config(
                "pipe_name must be non-empty and contain no path separators",
            ));
        }
        Ok(())
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AegisConfig {
    pub vault: VaultConfig,
    pub service: ServiceConfig,
}

impl AegisConfig {
    /// Parse configuration from TOML text.  Paths are left as written.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ServiceError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file at `path`, or defaults if it does not exist.
    ///
    /// Relative paths inside the file are resolved against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no configuration file; using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut config = Self::from_toml(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve every relative path against `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        resolve(&mut self.vault.data_directory, base);
        resolve(&mut self.service.log_file, base);
        if let Some(socket) = self.service.socket_path.as_mut() {
            resolve(socket, base);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.vault.validate()?;
        self.service.validate()
    }
}

fn resolve(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}
