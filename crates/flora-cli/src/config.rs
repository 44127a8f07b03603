//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use flora_core::{BackgroundOptions, PoolConfig, TransferOptions};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Devices used when no `--device` is given
    #[serde(default)]
    pub devices: Vec<String>,

    /// Database location, defaults to the platform data directory
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Connection pool settings
    #[serde(default)]
    pub pool: PoolSection,

    /// History transfer settings
    #[serde(default)]
    pub transfer: TransferSection,

    /// Background fetch settings
    #[serde(default)]
    pub background: BackgroundSection,
}

/// `[pool]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Maximum concurrently connected sensors.
    pub max_sessions: usize,
    /// How long a connect may scan for an unknown sensor, in seconds.
    pub scan_timeout_secs: u64,
    /// Connection timeout in seconds.
    pub connection_timeout_secs: u64,
    /// Characteristic read timeout in seconds.
    pub read_timeout_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            max_sessions: pool.max_sessions,
            scan_timeout_secs: pool.scan_timeout.as_secs(),
            connection_timeout_secs: pool.connection.connection_timeout.as_secs(),
            read_timeout_secs: pool.connection.read_timeout.as_secs(),
        }
    }
}

/// `[transfer]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSection {
    /// Timeout for one history entry, in milliseconds.
    pub entry_timeout_ms: u64,
    /// Pause between entries, in milliseconds.
    pub entry_spacing_ms: u64,
    /// Ceiling on a whole transfer, in seconds.
    pub global_timeout_secs: u64,
    /// Give skipped entries one more attempt at the end.
    pub retry_skipped: bool,
    /// Attempts on one entry before it is skipped.
    pub max_entry_attempts: u32,
}

impl Default for TransferSection {
    fn default() -> Self {
        let transfer = TransferOptions::default();
        Self {
            entry_timeout_ms: transfer.entry_timeout.as_millis() as u64,
            entry_spacing_ms: transfer.entry_spacing.as_millis() as u64,
            global_timeout_secs: transfer.global_timeout.as_secs(),
            retry_skipped: transfer.retry_skipped,
            max_entry_attempts: PoolConfig::default().loop_detection.max_entry_attempts,
        }
    }
}

/// `[background]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundSection {
    /// Deadline for a whole fetch, in seconds.
    pub deadline_secs: u64,
    /// Budget for each device, in seconds.
    pub per_device_timeout_secs: u64,
    /// Time allowed for the final disconnect sweep, in seconds.
    pub disconnect_grace_secs: u64,
}

impl Default for BackgroundSection {
    fn default() -> Self {
        let background = BackgroundOptions::default();
        Self {
            deadline_secs: background.deadline.as_secs(),
            per_device_timeout_secs: background.per_device_timeout.as_secs(),
            disconnect_grace_secs: background.disconnect_grace.as_secs(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flora")
            .join("config.toml")
    }

    /// Load config from `path`, or return the default if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field and report all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.pool.max_sessions == 0 {
            problems.push("pool.max_sessions must be at least 1".to_string());
        }
        if self.pool.scan_timeout_secs == 0 {
            problems.push("pool.scan_timeout_secs must be non-zero".to_string());
        }
        if self.pool.connection_timeout_secs == 0 || self.pool.read_timeout_secs == 0 {
            problems.push("pool timeouts must be non-zero".to_string());
        }
        if self.transfer.entry_timeout_ms == 0 {
            problems.push("transfer.entry_timeout_ms must be non-zero".to_string());
        }
        if self.transfer.global_timeout_secs.saturating_mul(1000) < self.transfer.entry_timeout_ms {
            problems.push(
                "transfer.global_timeout_secs must not be shorter than the entry timeout"
                    .to_string(),
            );
        }
        if self.transfer.max_entry_attempts == 0 {
            problems.push("transfer.max_entry_attempts must be at least 1".to_string());
        }
        if self.background.deadline_secs == 0 || self.background.per_device_timeout_secs == 0 {
            problems.push("background deadlines must be non-zero".to_string());
        }
        if self.background.per_device_timeout_secs > self.background.deadline_secs {
            problems.push(
                "background.per_device_timeout_secs must not exceed deadline_secs".to_string(),
            );
        }
        if self.devices.iter().any(|d| d.trim().is_empty()) {
            problems.push("devices must not contain empty identifiers".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            bail!("Invalid configuration:\n  - {}", problems.join("\n  - "))
        }
    }

    /// Database path, configured or default.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(flora_store::default_db_path)
    }

    /// Pool settings for [`flora_core::ConnectionPool::start`].
    pub fn pool_config(&self) -> PoolConfig {
        let defaults = PoolConfig::default();
        let connection = defaults
            .connection
            .clone()
            .connection_timeout(Duration::from_secs(self.pool.connection_timeout_secs))
            .read_timeout(Duration::from_secs(self.pool.read_timeout_secs));
        let loop_detection = defaults
            .loop_detection
            .clone()
            .max_entry_attempts(self.transfer.max_entry_attempts);

        defaults
            .max_sessions(self.pool.max_sessions)
            .scan_timeout(Duration::from_secs(self.pool.scan_timeout_secs))
            .connection(connection)
            .loop_detection(loop_detection)
    }

    /// Transfer options for a history sync.
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions::default()
            .entry_timeout(Duration::from_millis(self.transfer.entry_timeout_ms))
            .entry_spacing(Duration::from_millis(self.transfer.entry_spacing_ms))
            .global_timeout(Duration::from_secs(self.transfer.global_timeout_secs))
            .retry_skipped(self.transfer.retry_skipped)
    }

    /// Options for a background fetch.
    pub fn background_options(&self) -> BackgroundOptions {
        BackgroundOptions::default()
            .deadline(Duration::from_secs(self.background.deadline_secs))
            .per_device_timeout(Duration::from_secs(self.background.per_device_timeout_secs))
            .disconnect_grace(Duration::from_secs(self.background.disconnect_grace_secs))
    }
}

/// Resolve one device from the argument or the first configured device.
pub fn resolve_device(device: Option<String>, config: &Config) -> Option<String> {
    device.or_else(|| config.devices.first().cloned())
}

/// Resolve devices from arguments, falling back to every configured device.
pub fn resolve_devices(devices: Vec<String>, config: &Config) -> Vec<String> {
    if devices.is_empty() {
        config.devices.clone()
    } else {
        devices
    }
}

/// Get a device identifier, with a helpful error message.
pub fn require_device(device: Option<String>, config: &Config) -> Result<String> {
    resolve_device(device, config).ok_or_else(|| {
        anyhow::anyhow!(
            "No device specified. Use --device <ID>, set FLORA_DEVICE, or list devices in the config file.\n\
             Run 'flora scan' to find nearby sensors."
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_library_defaults() {
        let config = Config::default();
        config.validate().unwrap();

        let pool = config.pool_config();
        assert_eq!(pool.max_sessions, PoolConfig::default().max_sessions);
        assert_eq!(pool.scan_timeout, PoolConfig::default().scan_timeout);

        let transfer = config.transfer_options();
        assert_eq!(transfer.entry_timeout, TransferOptions::default().entry_timeout);
        assert!(transfer.retry_skipped);
        assert!(!transfer.restart);

        let background = config.background_options();
        assert_eq!(background.deadline, BackgroundOptions::default().deadline);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            devices = ["C4:7C:8D:6A:3E:11", "flora-2"]

            [pool]
            max_sessions = 2

            [background]
            deadline_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.pool.max_sessions, 2);
        assert_eq!(config.pool.scan_timeout_secs, PoolSection::default().scan_timeout_secs);
        assert_eq!(config.background.deadline_secs, 60);
        assert_eq!(config.transfer, TransferSection::default());
        assert_eq!(config.pool_config().max_sessions, 2);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = Config::default();
        config.pool.max_sessions = 0;
        config.transfer.entry_timeout_ms = 0;
        config.background.per_device_timeout_secs = config.background.deadline_secs + 1;

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("pool.max_sessions"));
        assert!(message.contains("transfer.entry_timeout_ms"));
        assert!(message.contains("background.per_device_timeout_secs"));
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[pool]\nmax_sessions = 0\n").unwrap();
        assert!(Config::load(&path).is_err());

        fs::write(&path, "devices = 3\n").unwrap();
        let message = format!("{:#}", Config::load(&path).unwrap_err());
        assert!(message.contains("Failed to parse config"));
    }

    // ========================================================================
    // device resolution tests
    // ========================================================================

    #[test]
    fn test_resolve_device_prefers_arg() {
        let config = Config {
            devices: vec!["config-device".to_string()],
            ..Default::default()
        };
        let result = resolve_device(Some("arg-device".to_string()), &config);
        assert_eq!(result, Some("arg-device".to_string()));
    }

    #[test]
    fn test_resolve_device_falls_back_to_config() {
        let config = Config {
            devices: vec!["first".to_string(), "second".to_string()],
            ..Default::default()
        };
        assert_eq!(resolve_device(None, &config), Some("first".to_string()));
    }

    #[test]
    fn test_require_device_errors_when_none() {
        let err = require_device(None, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("No device specified"));
    }

    #[test]
    fn test_resolve_devices() {
        let config = Config {
            devices: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert_eq!(resolve_devices(vec![], &config), config.devices);
        assert_eq!(
            resolve_devices(vec!["c".to_string()], &config),
            vec!["c".to_string()]
        );
    }
}
