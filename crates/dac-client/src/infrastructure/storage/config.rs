//! TOML-based configuration persistence for the DAC client.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\DacStream\config.toml`
//! - Linux:    `~/.config/dacstream/config.toml`
//! - macOS:    `~/Library/Application Support/DacStream/config.toml`
//!
//! Example file:
//!
//! ```toml
//! [client]
//! log_level = "debug"
//!
//! [network]
//! discovery_port = 7654
//! read_timeout_ms = 500
//!
//! [stream]
//! point_rate = 20000
//! point_layout = "legacy"
//! autoplay = true
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "some_fn")]`, and every section is
//! itself optional, so an empty file (or no file at all) yields the same
//! configuration as `AppConfig::default()`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dac_core::protocol::messages::{BROADCAST_PORT, COMMAND_PORT};
use dac_core::PointLayout;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::stream::StreamSettings;
use crate::infrastructure::network::connection::ConnectionSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is not usable.
    #[error("invalid config value for {field}: {detail}")]
    Invalid { field: &'static str, detail: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

/// General client behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Ports, bind address and socket deadlines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// UDP port devices broadcast on.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// TCP port of the device command channel.
    #[serde(default = "default_command_port")]
    pub command_port: u16,
    /// Local address the discovery socket binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Deadline for each socket read while waiting for a response.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Discovery registry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    /// An entry not refreshed for longer than this is dropped.
    #[serde(default = "default_expiry_ms")]
    pub expiry_ms: u64,
    #[serde(default = "default_prune_interval_ms")]
    pub prune_interval_ms: u64,
}

/// Stream writer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Output rate passed to `begin`, in points per second.
    #[serde(default = "default_point_rate")]
    pub point_rate: u32,
    /// Maximum points the writer keeps outstanding on the device.
    #[serde(default = "default_budget")]
    pub budget: u16,
    /// Below this request window the writer backs off.
    #[serde(default = "default_low_threshold")]
    pub low_threshold: u16,
    #[serde(default = "default_pacing_delay_ms")]
    pub pacing_delay_ms: u64,
    /// Upper bound on the extra points granted after a back-off.
    #[serde(default = "default_backoff_window")]
    pub backoff_window: u16,
    /// Point record field order used on the command channel.
    #[serde(default)]
    pub point_layout: PointLayout,
    /// Stream the test pattern to the first discovered device.
    #[serde(default)]
    pub autoplay: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_discovery_port() -> u16 {
    BROADCAST_PORT
}
fn default_command_port() -> u16 {
    COMMAND_PORT
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    200
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_expiry_ms() -> u64 {
    2000
}
fn default_prune_interval_ms() -> u64 {
    250
}
fn default_point_rate() -> u32 {
    30_000
}
fn default_budget() -> u16 {
    1799
}
fn default_low_threshold() -> u16 {
    100
}
fn default_pacing_delay_ms() -> u64 {
    5
}
fn default_backoff_window() -> u16 {
    150
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            command_port: default_command_port(),
            bind_address: default_bind_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            expiry_ms: default_expiry_ms(),
            prune_interval_ms: default_prune_interval_ms(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            point_rate: default_point_rate(),
            budget: default_budget(),
            low_threshold: default_low_threshold(),
            pacing_delay_ms: default_pacing_delay_ms(),
            backoff_window: default_backoff_window(),
            point_layout: PointLayout::default(),
            autoplay: false,
        }
    }
}

// ── Conversions into runtime settings ─────────────────────────────────────────

impl NetworkConfig {
    /// Parses `bind_address`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if it is not an IP address.
    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|e| ConfigError::Invalid {
                field: "network.bind_address",
                detail: format!("{:?}: {e}", self.bind_address),
            })
    }

    /// Socket deadlines and point layout for a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if either timeout is zero.
    pub fn connection_settings(
        &self,
        layout: PointLayout,
    ) -> Result<ConnectionSettings, ConfigError> {
        require_nonzero("network.connect_timeout_ms", self.connect_timeout_ms)?;
        require_nonzero("network.read_timeout_ms", self.read_timeout_ms)?;
        Ok(ConnectionSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            layout,
        })
    }
}

impl RegistryConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }
}

impl StreamConfig {
    /// Flow-control parameters for the stream writer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `budget` or `point_rate` is zero.
    pub fn settings(&self) -> Result<StreamSettings, ConfigError> {
        require_nonzero("stream.budget", u64::from(self.budget))?;
        require_nonzero("stream.point_rate", u64::from(self.point_rate))?;
        Ok(StreamSettings {
            point_rate: self.point_rate,
            budget: self.budget,
            low_threshold: self.low_threshold,
            pacing_delay: Duration::from_millis(self.pacing_delay_ms),
            backoff_window: self.backoff_window,
        })
    }
}

fn require_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            detail: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file, returning
/// `AppConfig::default()` if the file does not yet exist.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning the default if it is absent.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory including the `DacStream`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("DacStream"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("dacstream"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("DacStream")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir()
            .join(format!("dac_cfg_{tag}_{}_{nanos}", std::process::id()))
            .join("config.toml")
    }

    // ── AppConfig defaults ────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_has_protocol_ports() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.network.discovery_port, 7654);
        assert_eq!(cfg.network.command_port, 7765);
    }

    #[test]
    fn test_app_config_default_stream_flow_control() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.stream.budget, 1799);
        assert_eq!(cfg.stream.low_threshold, 100);
        assert_eq!(cfg.stream.point_layout, PointLayout::Standard);
        assert!(!cfg.stream.autoplay);
    }

    #[test]
    fn test_registry_config_default_expiry_is_two_seconds() {
        let cfg = RegistryConfig::default();
        assert_eq!(cfg.expiry(), Duration::from_millis(2000));
    }

    // ── TOML parsing ──────────────────────────────────────────────────────────

    #[test]
    fn test_deserialize_empty_toml_equals_default() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_partial_stream_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[stream]
point_rate = 20000
point_layout = "legacy"
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.stream.point_rate, 20_000);
        assert_eq!(cfg.stream.point_layout, PointLayout::Legacy);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.stream.budget, 1799);
        assert_eq!(cfg.network.read_timeout_ms, 1000);
    }

    #[test]
    fn test_deserialize_unknown_layout_is_parse_error() {
        let result: Result<AppConfig, toml::de::Error> =
            toml::from_str("[stream]\npoint_layout = \"diagonal\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_stream_config_settings_converts_units() {
        let mut cfg = StreamConfig::default();
        cfg.pacing_delay_ms = 7;

        let settings = cfg.settings().expect("valid");

        assert_eq!(settings.pacing_delay, Duration::from_millis(7));
        assert_eq!(settings.budget, 1799);
        assert_eq!(settings.point_rate, 30_000);
    }

    #[test]
    fn test_bind_ip_rejects_garbage() {
        let mut cfg = NetworkConfig::default();
        cfg.bind_address = "not-an-ip".to_string();
        assert!(matches!(cfg.bind_ip(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_stream_settings_reject_zero_budget() {
        // Arrange
        let mut cfg = StreamConfig::default();
        cfg.budget = 0;

        // Act
        let result = cfg.settings();

        // Assert
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "stream.budget",
                ..
            })
        ));
    }

    #[test]
    fn test_connection_settings_reject_zero_read_timeout() {
        // Arrange
        let mut cfg = NetworkConfig::default();
        cfg.read_timeout_ms = 0;

        // Act
        let result = cfg.connection_settings(PointLayout::Standard);

        // Assert
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "network.read_timeout_ms",
                ..
            })
        ));
    }

    #[test]
    fn test_connection_settings_converts_defaults() {
        let cfg = NetworkConfig::default();

        let settings = cfg.connection_settings(PointLayout::Legacy).expect("valid");

        assert_eq!(settings.read_timeout, Duration::from_millis(cfg.read_timeout_ms));
        assert_eq!(settings.layout, PointLayout::Legacy);
    }

    // ── load / save ───────────────────────────────────────────────────────────

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");
        let cfg = load_config_from(&path).expect("missing file is not an error");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let path = temp_config_path("roundtrip");
        let mut cfg = AppConfig::default();
        cfg.network.read_timeout_ms = 350;
        cfg.client.log_level = "debug".to_string();
        cfg.stream.autoplay = true;

        // Act
        save_config_to(&cfg, &path).expect("save creates directory");
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_load_config_from_malformed_file_returns_parse_error() {
        let path = temp_config_path("malformed");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("dacstream/config.toml") || path.ends_with("config.toml"));
        }
    }
}
