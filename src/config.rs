//! Configuration loading using Figment
//!
//! Settings are loaded from:
//! 1. `config/ccd_daq.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `CCD_DAQ_`
//!
//! Every field has a default, so an empty file yields a runnable server.
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! CCD_DAQ_SERVER__PORT=6502
//! CCD_DAQ_APPLICATION__LOG_LEVEL=debug
//! CCD_DAQ_STORAGE__DATA_DIR=/data/ccd
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::driver::SimulatedCcdConfig;
use crate::error::{AppResult, DaqError};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/ccd_daq.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "CCD_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Command listener
    #[serde(default)]
    pub server: ServerConfig,
    /// Detector control
    #[serde(default)]
    pub camera: CameraConfig,
    /// Frame output
    #[serde(default)]
    pub storage: StorageConfig,
    /// FITS header site metadata
    #[serde(default)]
    pub fits: FitsConfig,
    /// Simulated detector used when no hardware backend is linked
    #[serde(default)]
    pub simulator: SimulatedCcdConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (text, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Command listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// Command port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on concurrently dispatched commands
    #[serde(default = "default_max_blocking_threads")]
    pub max_blocking_threads: usize,
}

/// Detector control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Vendor SDK configuration directory passed to `Initialize`
    #[serde(default = "default_sdk_config_dir")]
    pub sdk_config_dir: PathBuf,
    /// Camera selected on connect
    #[serde(default)]
    pub camera_index: u32,
    /// Pause between acquisition polls in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Give up on a frame this long after it was due (unset = wait forever)
    #[serde(default)]
    pub max_frame_wait_secs: Option<f64>,
    /// Horizontal speed index used for streaming
    #[serde(default = "default_streaming_readout_index")]
    pub streaming_readout_index: i32,
}

/// Frame output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for FITS files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Site metadata written into every FITS header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitsConfig {
    /// OBSERVAT card
    #[serde(default = "default_observatory")]
    pub observatory: String,
    /// INSTRUME card
    #[serde(default = "default_instrument")]
    pub instrument: String,
    /// LATITUDE card
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    /// LONGITUD card
    #[serde(default = "default_longitude")]
    pub longitude: f64,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "ccd_daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5502
}

fn default_max_blocking_threads() -> usize {
    30
}

fn default_sdk_config_dir() -> PathBuf {
    PathBuf::from("/usr/local/etc/andor")
}

fn default_poll_interval() -> u64 {
    10
}

fn default_streaming_readout_index() -> i32 {
    1
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_observatory() -> String {
    "mro".to_string()
}

fn default_instrument() -> String {
    "evora".to_string()
}

fn default_latitude() -> f64 {
    120.744466667
}

fn default_longitude() -> f64 {
    46.9528
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_blocking_threads: default_max_blocking_threads(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            sdk_config_dir: default_sdk_config_dir(),
            camera_index: 0,
            poll_interval_ms: default_poll_interval(),
            max_frame_wait_secs: None,
            streaming_readout_index: default_streaming_readout_index(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for FitsConfig {
    fn default() -> Self {
        Self {
            observatory: default_observatory(),
            instrument: default_instrument(),
            latitude: default_latitude(),
            longitude: default_longitude(),
        }
    }
}

impl CameraConfig {
    /// Pause between acquisition polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Extra time allowed for a frame beyond its nominal duration.
    pub fn max_frame_wait(&self) -> Option<Duration> {
        self.max_frame_wait_secs.map(Duration::from_secs_f64)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from `config/ccd_daq.toml` and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment overrides still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Provider chain: defaults, then the file, then the environment.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading.
    ///
    /// # Errors
    ///
    /// Returns `DaqError::Configuration` with a descriptive message for the first failure.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.server.max_blocking_threads == 0 {
            return Err(DaqError::Configuration(
                "server.max_blocking_threads must be > 0".to_string(),
            ));
        }

        if self.camera.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "camera.poll_interval_ms must be > 0".to_string(),
            ));
        }

        if let Some(wait) = self.camera.max_frame_wait_secs {
            if !wait.is_finite() || wait <= 0.0 {
                return Err(DaqError::Configuration(format!(
                    "Invalid camera.max_frame_wait_secs {wait}. Must be a positive number"
                )));
            }
        }

        if self.camera.streaming_readout_index < 0 {
            return Err(DaqError::Configuration(
                "camera.streaming_readout_index cannot be negative".to_string(),
            ));
        }

        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(DaqError::Configuration(
                "storage.data_dir cannot be empty".to_string(),
            ));
        }

        let sim = &self.simulator;
        if sim.width == 0 || sim.height == 0 {
            return Err(DaqError::Configuration(format!(
                "Invalid simulator geometry {}x{}",
                sim.width, sim.height
            )));
        }
        if !sim.time_scale.is_finite() || sim.time_scale <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "Invalid simulator.time_scale {}. Must be > 0",
                sim.time_scale
            )));
        }
        if sim.stream_cycle_len < 2 {
            return Err(DaqError::Configuration(
                "simulator.stream_cycle_len must be >= 2".to_string(),
            ));
        }

        Ok(())
    }

    /// Socket address the command listener binds to.
    ///
    /// # Errors
    ///
    /// Returns `DaqError::Configuration` if host and port do not form an address.
    pub fn bind_addr(&self) -> AppResult<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| {
                DaqError::Configuration(format!(
                    "Invalid bind address '{}:{}': {e}",
                    self.server.host, self.server.port
                ))
            })
    }
}
