//! Configuration management (emufleet.toml)
//!
//! Handles loading, saving, and providing defaults for fleet settings.
//! Every field has a serde default so a partial file (or no file at all)
//! yields a usable configuration. Durations are stored as milliseconds.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "emufleet.toml";

/// Fleet configuration.
///
/// Serialized to/from TOML format for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Emulator binary and what it loads
    #[serde(default)]
    pub emulator: EmulatorConfig,
    /// Key event defaults
    #[serde(default)]
    pub input: InputConfig,
    /// Control socket settings
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Fan-out settings
    #[serde(default)]
    pub fleet: FleetConfig,
    /// Scratch files
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Delays after fire-and-forget requests
    #[serde(default)]
    pub timings: TimingConfig,
}

/// Emulator launch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulatorConfig {
    /// Emulator executable (default: mgba-qt, resolved through PATH)
    #[serde(default = "default_exe")]
    pub exe: PathBuf,
    /// ROM or other content passed as the last argument
    #[serde(default)]
    pub content: PathBuf,
    /// Scripts attached with `--script`, in order
    #[serde(default)]
    pub scripts: Vec<PathBuf>,
}

/// Input configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Press width for pushes that don't name one (default: 100)
    #[serde(default = "default_push_ms")]
    pub default_push_ms: u64,
}

/// Control connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Host the emulator scripts listen on (default: localhost)
    #[serde(default = "default_host")]
    pub host: String,
    /// Connect timeout (default: 5000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Receive timeout while listening (default: 100)
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Keep-alive ping interval (default: 2000)
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Start keep-alive as soon as the fleet connects instead of only
    /// while listening (default: false)
    #[serde(default)]
    pub keepalive_on_connect: bool,
}

/// Fan-out configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Number of emulator instances (default: 1)
    #[serde(default = "default_instances")]
    pub instances: usize,
    /// Port of instance 0; instance `i` uses `base_port + i` (default: 8888)
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Delay between process launches (default: 500)
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
    /// Wait after all launches before connecting (default: 10000)
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Coordinator polling interval (default: 100)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Connect attempts per instance before it is declared dead (default: 5)
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Delay between connect attempts (default: 1000)
    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,
    /// Wait after an interrupt before processes are force-killed (default: 2000)
    #[serde(default = "default_interrupt_grace_ms")]
    pub interrupt_grace_ms: u64,
}

/// Runtime scratch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directory for screenshots and the ledger (default: temp)
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Ledger file name inside `temp_dir` (default: state.json)
    #[serde(default = "default_ledger_file")]
    pub ledger_file: String,
}

/// Waits inserted after requests that have no acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// After a reset request (default: 700)
    #[serde(default = "default_reset_settle_ms")]
    pub reset_settle_ms: u64,
    /// After a screenshot request (default: 1000)
    #[serde(default = "default_screenshot_settle_ms")]
    pub screenshot_settle_ms: u64,
}

fn default_exe() -> PathBuf {
    PathBuf::from("mgba-qt")
}
fn default_push_ms() -> u64 {
    100
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_receive_timeout_ms() -> u64 {
    100
}
fn default_keepalive_interval_ms() -> u64 {
    2000
}
fn default_instances() -> usize {
    1
}
fn default_base_port() -> u16 {
    8888
}
fn default_stagger_ms() -> u64 {
    500
}
fn default_settle_ms() -> u64 {
    10_000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_connect_attempts() -> u32 {
    5
}
fn default_connect_retry_ms() -> u64 {
    1000
}
fn default_interrupt_grace_ms() -> u64 {
    2000
}
fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}
fn default_ledger_file() -> String {
    "state.json".to_string()
}
fn default_reset_settle_ms() -> u64 {
    700
}
fn default_screenshot_settle_ms() -> u64 {
    1000
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            exe: default_exe(),
            content: PathBuf::new(),
            scripts: Vec::new(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            default_push_ms: default_push_ms(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            connect_timeout_ms: default_connect_timeout_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            keepalive_on_connect: false,
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            instances: default_instances(),
            base_port: default_base_port(),
            stagger_ms: default_stagger_ms(),
            settle_ms: default_settle_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            connect_attempts: default_connect_attempts(),
            connect_retry_ms: default_connect_retry_ms(),
            interrupt_grace_ms: default_interrupt_grace_ms(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            ledger_file: default_ledger_file(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reset_settle_ms: default_reset_settle_ms(),
            screenshot_settle_ms: default_screenshot_settle_ms(),
        }
    }
}

impl InputConfig {
    pub fn default_push_time(&self) -> Duration {
        Duration::from_millis(self.default_push_ms)
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

impl FleetConfig {
    /// Port for instance `index`. The only addressing scheme there is.
    ///
    /// Fails when `base_port + index` does not fit in a port number.
    pub fn port_for(&self, index: usize) -> Result<u16, ConfigError> {
        u16::try_from(index)
            .ok()
            .and_then(|offset| self.base_port.checked_add(offset))
            .ok_or(ConfigError::PortOutOfRange {
                base_port: self.base_port,
                index,
            })
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }
}

impl RuntimeConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.temp_dir.join(&self.ledger_file)
    }
}

impl TimingConfig {
    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    pub fn screenshot_settle(&self) -> Duration {
        Duration::from_millis(self.screenshot_settle_ms)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("instance {index} has no port: base_port {base_port} + {index} exceeds {}", u16::MAX)]
    PortOutOfRange { base_port: u16, index: usize },
}

impl Config {
    /// Parse a TOML string
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Loads the configuration from `path`.
    ///
    /// Returns defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        std::fs::write(path, content).map_err(io_err)
    }

    /// Checks the settings a fleet run cannot do without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.emulator.content.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "emulator.content must name the ROM to load".to_string(),
            ));
        }
        if self.fleet.instances == 0 {
            return Err(ConfigError::Invalid(
                "fleet.instances must be at least 1".to_string(),
            ));
        }
        self.fleet.port_for(self.fleet.instances - 1)?;
        if self.connection.receive_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection.receive_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\emufleet\config`
/// On macOS: `~/Library/Application Support/dev.emufleet.emufleet`
/// On Linux: `~/.config/emufleet`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev.emufleet", "", "emufleet")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// `emufleet.toml` in the working directory if present, otherwise
/// `config.toml` in the platform config directory if present, otherwise
/// the working-directory path.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    config_dir()
        .map(|dir| dir.join("config.toml"))
        .filter(|path| path.exists())
        .unwrap_or(local)
}
