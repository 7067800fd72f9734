//! TOML Configuration File Support
//!
//! Centralized configuration loading, with an optional TOML file at
//! `~/.config/paperclip/paperclip.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`PAPERCLIP_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! agents_dir = "/usr/share/paperclip/agents"
//!
//! [display]
//! host = "172.23.42.29"
//! port = 2342
//!
//! [pixelflut]
//! host = "pixelflut.local"
//! port = 1234
//! x = 100
//! y = 40
//! width = 320
//! height = 240
//! reps = 2
//!
//! [terminal]
//! cols = 80
//! rows = 24
//!
//! [server]
//! bind = "0.0.0.0:2323"
//! lifetime_secs = 300
//!
//! [rotation]
//! wait_secs = 300
//! skip_probability = 0.2
//! idle_pause_ms = 1000
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::render::{DisplayGeometry, PixelGeometry, TerminalGeometry};
use crate::scheduler::RotationConfig;
use crate::server::ServerConfig;

/// Default LED display address
pub const DEFAULT_DISPLAY_HOST: &str = "172.23.42.29";

/// Default LED display port
pub const DEFAULT_DISPLAY_PORT: u16 = 2342;

/// Default pixel service port
pub const DEFAULT_PIXEL_PORT: u16 = 1234;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[display]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayToml {
    /// Display host
    pub host: Option<String>,
    /// Display UDP port
    pub port: Option<u16>,
    /// Panel width in pixels
    pub width: Option<u32>,
    /// Panel height in pixels, including hidden rows
    pub height: Option<u32>,
}

/// `[pixelflut]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelToml {
    /// Service host
    pub host: Option<String>,
    /// Service TCP port
    pub port: Option<u16>,
    /// Canvas x offset
    pub x: Option<u32>,
    /// Canvas y offset
    pub y: Option<u32>,
    /// Drawn width
    pub width: Option<u32>,
    /// Drawn height
    pub height: Option<u32>,
    /// Times each frame is sent
    pub reps: Option<u32>,
}

/// `[terminal]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalToml {
    /// Columns
    pub cols: Option<u32>,
    /// Rows
    pub rows: Option<u32>,
}

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address
    pub bind: Option<String>,
    /// Session lifetime in seconds
    pub lifetime_secs: Option<u64>,
}

/// `[rotation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationToml {
    /// Budget per agent in seconds
    pub wait_secs: Option<u64>,
    /// Chance of an idle tick
    pub skip_probability: Option<f64>,
    /// Pause between ticks in milliseconds
    pub idle_pause_ms: Option<u64>,
}

/// Root of the TOML file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperclipToml {
    /// Directory holding agent bundles
    pub agents_dir: Option<PathBuf>,
    /// LED display
    pub display: DisplayToml,
    /// Pixel service
    pub pixelflut: PixelToml,
    /// Local terminal
    pub terminal: TerminalToml,
    /// Session server
    pub server: ServerToml,
    /// Endless rotation
    pub rotation: RotationToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Where and how to draw on the pixel service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelTarget {
    /// Service host
    pub host: String,
    /// Service port
    pub port: u16,
    /// Canvas rectangle
    pub geometry: PixelGeometry,
    /// Times each frame is sent
    pub reps: u32,
}

impl Default for PixelTarget {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PIXEL_PORT,
            geometry: PixelGeometry {
                x: 0,
                y: 0,
                width: 320,
                height: 240,
            },
            reps: 1,
        }
    }
}

impl FromStr for PixelTarget {
    type Err = ConfigError;

    /// Parse `host:port[@x,y[,width,height[,reps]]]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::ValidationError(format!("invalid pixel target '{s}'"));
        let mut target = Self::default();

        let (address, placement) = match s.split_once('@') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        target.host = host.to_string();
        target.port = port.parse().map_err(|_| invalid())?;

        if let Some(placement) = placement {
            let fields = placement
                .split(',')
                .map(|f| f.trim().parse::<u32>().map_err(|_| invalid()))
                .collect::<Result<Vec<_>, _>>()?;
            let placed = |x: u32, y: u32, width: u32, height: u32| PixelGeometry {
                x,
                y,
                width,
                height,
            };
            match *fields.as_slice() {
                [x, y] => {
                    target.geometry.x = x;
                    target.geometry.y = y;
                }
                [x, y, w, h] => target.geometry = placed(x, y, w, h),
                [x, y, w, h, reps] => {
                    target.geometry = placed(x, y, w, h);
                    target.reps = reps;
                }
                _ => return Err(invalid()),
            }
        }
        Ok(target)
    }
}

/// Fully resolved configuration
#[derive(Clone, Debug)]
pub struct PaperclipConfig {
    /// Directory holding agent bundles
    pub agents_dir: PathBuf,
    /// Display host
    pub display_host: String,
    /// Display port
    pub display_port: u16,
    /// Display geometry
    pub display: DisplayGeometry,
    /// Pixel service target
    pub pixel: PixelTarget,
    /// Local terminal geometry
    pub terminal: TerminalGeometry,
    /// Session server settings
    pub server: ServerConfig,
    /// Endless rotation timing
    pub rotation: RotationConfig,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for PaperclipConfig {
    fn default() -> Self {
        Self {
            agents_dir: PathBuf::from("agents"),
            display_host: DEFAULT_DISPLAY_HOST.to_string(),
            display_port: DEFAULT_DISPLAY_PORT,
            display: DisplayGeometry::default(),
            pixel: PixelTarget::default(),
            terminal: TerminalGeometry::default(),
            server: ServerConfig::default(),
            rotation: RotationConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl PaperclipConfig {
    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Reject values no sink can work with
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));
        if self.display.width % 8 != 0 || self.display.width == 0 {
            return invalid("display width must be a positive multiple of 8");
        }
        if self.display.height == 0 {
            return invalid("display height must be positive");
        }
        if self.terminal.cols == 0 || self.terminal.rows == 0 {
            return invalid("terminal size must be positive");
        }
        if self.server.geometry.cols == 0 || self.server.geometry.rows == 0 {
            return invalid("viewer terminal size must be positive");
        }
        if self.pixel.geometry.width == 0 || self.pixel.geometry.height == 0 {
            return invalid("pixel rectangle must be non-empty");
        }
        if !(0.0..=1.0).contains(&self.rotation.skip_probability) {
            return invalid("skip probability must be within 0..=1");
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/paperclip/paperclip.toml` or
/// `~/.config/paperclip/paperclip.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("paperclip").join("paperclip.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
pub fn load_config() -> Result<PaperclipConfig, ConfigError> {
    load_config_from_path(default_config_path().as_deref())
}

/// Load configuration from a specific path and the process environment
///
/// A missing file is not an error; defaults are used.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or an environment
/// variable holds an unparseable value.
pub fn load_config_from_path(path: Option<&Path>) -> Result<PaperclipConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading variables through `env`
///
/// # Errors
///
/// See [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<&Path>, env: F) -> Result<PaperclipConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = PaperclipConfig::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.to_path_buf(),
                    source: e,
                })?;

            let toml_config: PaperclipToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.to_path_buf());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(path = %config_path.display(), "Config file not found, using defaults");
        }
    }

    apply_env_config(&mut config, env)?;
    Ok(config)
}

fn apply_toml_config(config: &mut PaperclipConfig, toml: &PaperclipToml) {
    if let Some(dir) = &toml.agents_dir {
        config.agents_dir.clone_from(dir);
    }

    if let Some(host) = &toml.display.host {
        config.display_host.clone_from(host);
    }
    if let Some(port) = toml.display.port {
        config.display_port = port;
    }
    if let Some(width) = toml.display.width {
        config.display.width = width;
    }
    if let Some(height) = toml.display.height {
        config.display.height = height;
    }

    let pixel = &mut config.pixel;
    if let Some(host) = &toml.pixelflut.host {
        pixel.host.clone_from(host);
    }
    if let Some(port) = toml.pixelflut.port {
        pixel.port = port;
    }
    if let Some(x) = toml.pixelflut.x {
        pixel.geometry.x = x;
    }
    if let Some(y) = toml.pixelflut.y {
        pixel.geometry.y = y;
    }
    if let Some(width) = toml.pixelflut.width {
        pixel.geometry.width = width;
    }
    if let Some(height) = toml.pixelflut.height {
        pixel.geometry.height = height;
    }
    if let Some(reps) = toml.pixelflut.reps {
        pixel.reps = reps;
    }

    if let Some(cols) = toml.terminal.cols {
        config.terminal.cols = cols;
        config.server.geometry.cols = cols;
    }
    if let Some(rows) = toml.terminal.rows {
        config.terminal.rows = rows;
        config.server.geometry.rows = rows;
    }

    if let Some(bind) = &toml.server.bind {
        config.server.bind.clone_from(bind);
    }
    if let Some(secs) = toml.server.lifetime_secs {
        config.server.lifetime = Duration::from_secs(secs);
    }

    if let Some(secs) = toml.rotation.wait_secs {
        config.rotation.wait = Duration::from_secs(secs);
    }
    if let Some(p) = toml.rotation.skip_probability {
        config.rotation.skip_probability = p;
    }
    if let Some(ms) = toml.rotation.idle_pause_ms {
        config.rotation.idle_pause = Duration::from_millis(ms);
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key}: cannot parse '{value}'")))
}

fn apply_env_config<F>(config: &mut PaperclipConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut seen = false;

    if let Some(dir) = env("PAPERCLIP_AGENTS_DIR") {
        config.agents_dir = PathBuf::from(dir);
        seen = true;
    }
    if let Some(target) = env("PAPERCLIP_DISPLAY") {
        let (host, port) = target.rsplit_once(':').ok_or_else(|| {
            ConfigError::ValidationError(format!("PAPERCLIP_DISPLAY: expected host:port, got '{target}'"))
        })?;
        config.display_host = host.to_string();
        config.display_port = parse_env("PAPERCLIP_DISPLAY", port)?;
        seen = true;
    }
    if let Some(target) = env("PAPERCLIP_PIXELFLUT") {
        config.pixel = target.parse()?;
        seen = true;
    }
    if let Some(bind) = env("PAPERCLIP_BIND") {
        config.server.bind = bind;
        seen = true;
    }
    if let Some(secs) = env("PAPERCLIP_LIFETIME") {
        config.server.lifetime = Duration::from_secs(parse_env("PAPERCLIP_LIFETIME", &secs)?);
        seen = true;
    }
    if let Some(secs) = env("PAPERCLIP_WAIT") {
        config.rotation.wait = Duration::from_secs(parse_env("PAPERCLIP_WAIT", &secs)?);
        seen = true;
    }

    if seen {
        config.source = ConfigSource::Env;
    }
    Ok(())
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Overrides collected from the command line
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Agents directory override
    pub agents_dir: Option<PathBuf>,
    /// Pixel target override
    pub pixel: Option<PixelTarget>,
    /// Terminal size override, for the local terminal and viewers
    pub terminal: Option<TerminalGeometry>,
    /// Listen address override
    pub bind: Option<String>,
    /// Session lifetime override
    pub lifetime: Option<Duration>,
    /// Rotation budget override
    pub wait: Option<Duration>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set agents directory override
    #[must_use]
    pub fn with_agents_dir(mut self, dir: PathBuf) -> Self {
        self.agents_dir = Some(dir);
        self
    }

    /// Set pixel target override
    #[must_use]
    pub fn with_pixel(mut self, target: PixelTarget) -> Self {
        self.pixel = Some(target);
        self
    }

    /// Set terminal size override
    #[must_use]
    pub fn with_terminal(mut self, geometry: TerminalGeometry) -> Self {
        self.terminal = Some(geometry);
        self
    }

    /// Set listen address override
    #[must_use]
    pub fn with_bind(mut self, bind: String) -> Self {
        self.bind = Some(bind);
        self
    }

    /// Set session lifetime override
    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Set rotation budget override
    #[must_use]
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    fn is_empty(&self) -> bool {
        self.agents_dir.is_none()
            && self.pixel.is_none()
            && self.terminal.is_none()
            && self.bind.is_none()
            && self.lifetime.is_none()
            && self.wait.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut PaperclipConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if let Some(dir) = &self.agents_dir {
            config.agents_dir.clone_from(dir);
        }
        if let Some(target) = &self.pixel {
            config.pixel = target.clone();
        }
        if let Some(geometry) = self.terminal {
            config.terminal = geometry;
            config.server.geometry = geometry;
        }
        if let Some(bind) = &self.bind {
            config.server.bind.clone_from(bind);
        }
        if let Some(lifetime) = self.lifetime {
            config.server.lifetime = lifetime;
        }
        if let Some(wait) = self.wait {
            config.rotation.wait = wait;
        }
    }
}

/// Parse a `COLSxROWS` terminal size
///
/// # Errors
///
/// Returns `ValidationError` for anything but two positive integers.
pub fn parse_terminal_size(s: &str) -> Result<TerminalGeometry, ConfigError> {
    let invalid = || ConfigError::ValidationError(format!("invalid terminal size '{s}'"));
    let (cols, rows) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
    let cols: u32 = cols.trim().parse().map_err(|_| invalid())?;
    let rows: u32 = rows.trim().parse().map_err(|_| invalid())?;
    if cols == 0 || rows == 0 {
        return Err(invalid());
    }
    Ok(TerminalGeometry { cols, rows })
}
