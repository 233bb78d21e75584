//! Driver facade for the CCD acquisition SDK.
//!
//! The vendor SDK is a synchronous C API where every call returns a status code.
//! [`CcdDriver`] mirrors that surface one call at a time so the exposure logic can
//! be written against a trait and exercised with [`SimulatedCcd`] when no hardware
//! is attached.
//!
//! Nothing here is thread safe on its own. The single driver instance lives behind
//! the mutex owned by [`crate::camera::Camera`]; all callers go through it.

pub mod simulated;
mod status;

use std::path::Path;

use crate::session::ImageType;

pub use simulated::{SimulatedCcd, SimulatedCcdConfig, SimulatedProbe};
pub use status::{code_of, DriverResult, StatusCode};

/// Detector dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Geometry {
    /// Dimensions after symmetric on-chip binning.
    pub fn binned(self, binning: u32) -> Geometry {
        let binning = binning.max(1);
        Geometry {
            width: self.width / binning,
            height: self.height / binning,
        }
    }

    /// Number of pixels in a frame of this size.
    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Device state reported by `GetStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Waiting for instructions.
    Idle,
    /// Acquisition running.
    Acquiring,
    /// Any other state (temperature cycle, errors, ...).
    Other(StatusCode),
}

impl DeviceStatus {
    /// Interpret a raw status code.
    pub fn from_code(code: StatusCode) -> Self {
        match code {
            StatusCode::IDLE => DeviceStatus::Idle,
            StatusCode::ACQUIRING => DeviceStatus::Acquiring,
            other => DeviceStatus::Other(other),
        }
    }

    /// Raw status code.
    pub fn code(self) -> StatusCode {
        match self {
            DeviceStatus::Idle => StatusCode::IDLE,
            DeviceStatus::Acquiring => StatusCode::ACQUIRING,
            DeviceStatus::Other(code) => code,
        }
    }

    /// Whether an acquisition is in progress.
    pub fn is_acquiring(self) -> bool {
        self == DeviceStatus::Acquiring
    }
}

/// Readout mode. Only full-image readout is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Full image readout (SDK mode 4).
    Image,
}

impl ReadMode {
    /// SDK numeric value.
    pub fn code(self) -> i32 {
        match self {
            ReadMode::Image => 4,
        }
    }

    /// Label used in FITS headers.
    pub fn label(self) -> &'static str {
        match self {
            ReadMode::Image => "Image",
        }
    }
}

/// Hardware acquisition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// One frame per start (SDK mode 1).
    SingleScan,
    /// Fixed-length kinetic series (SDK mode 3).
    Kinetics,
    /// Acquire until aborted (SDK mode 5).
    RunTillAbort,
}

impl AcquisitionMode {
    /// SDK numeric value.
    pub fn code(self) -> i32 {
        match self {
            AcquisitionMode::SingleScan => 1,
            AcquisitionMode::Kinetics => 3,
            AcquisitionMode::RunTillAbort => 5,
        }
    }

    /// Label used in FITS headers.
    pub fn label(self) -> &'static str {
        match self {
            AcquisitionMode::SingleScan => "Single Scan",
            AcquisitionMode::Kinetics => "Kinetics",
            AcquisitionMode::RunTillAbort => "Run Till Abort",
        }
    }
}

/// Shutter operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterMode {
    /// Opens and closes with the exposure.
    Auto,
    /// Permanently open.
    Open,
    /// Permanently closed.
    Closed,
}

impl ShutterMode {
    /// SDK numeric value.
    pub fn code(self) -> i32 {
        match self {
            ShutterMode::Auto => 0,
            ShutterMode::Open => 1,
            ShutterMode::Closed => 2,
        }
    }
}

/// Arguments of `SetShutter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutterSettings {
    /// TTL high opens the shutter.
    pub ttl_high: bool,
    /// Operating mode
    pub mode: ShutterMode,
    /// Closing latency in milliseconds
    pub closing_ms: u32,
    /// Opening latency in milliseconds
    pub opening_ms: u32,
}

impl ShutterSettings {
    /// Shutter policy for an image type.
    ///
    /// Flats and science frames need light, so the shutter follows the exposure with a
    /// small latency. Everything else is taken dark.
    pub fn for_image_type(image_type: ImageType) -> Self {
        match image_type {
            ImageType::Flat | ImageType::Object => Self {
                ttl_high: true,
                mode: ShutterMode::Auto,
                closing_ms: 5,
                opening_ms: 5,
            },
            ImageType::Bias | ImageType::Dark | ImageType::Other => Self {
                ttl_high: true,
                mode: ShutterMode::Closed,
                closing_ms: 0,
                opening_ms: 0,
            },
        }
    }

    /// Shutter state applied when the camera is first connected.
    pub fn startup() -> Self {
        Self {
            ttl_high: true,
            mode: ShutterMode::Auto,
            closing_ms: 50,
            opening_ms: 50,
        }
    }
}

/// Trigger source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Internal trigger.
    Internal,
}

impl TriggerMode {
    /// SDK numeric value.
    pub fn code(self) -> i32 {
        match self {
            TriggerMode::Internal => 0,
        }
    }
}

/// Cooling fan speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    /// Full speed (SDK mode 0).
    Full,
    /// Low speed (SDK mode 1).
    Low,
    /// Fan off (SDK mode 2).
    Off,
}

impl FanMode {
    /// SDK numeric value.
    pub fn code(self) -> i32 {
        match self {
            FanMode::Full => 0,
            FanMode::Low => 1,
            FanMode::Off => 2,
        }
    }
}

/// Actual timings computed by the SDK for the current settings, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AcquisitionTimings {
    /// Effective exposure time
    pub exposure: f32,
    /// Accumulation cycle time
    pub accumulate: f32,
    /// Kinetic cycle time (exposure plus readout)
    pub kinetic: f32,
}

/// Result of `GetTemperatureF`: cooler state plus the current temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoolerReading {
    /// One of the `TEMPERATURE_*` codes
    pub state: StatusCode,
    /// Sensor temperature in Celsius
    pub celsius: f32,
}

/// Result of `GetTemperatureStatus`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureStatus {
    /// Sensor temperature
    pub sensor: f32,
    /// Current set point
    pub target: f32,
    /// Ambient (heat sink) temperature
    pub ambient: f32,
    /// Cooler drive voltage
    pub cooler_volts: f32,
}

/// Synchronous facade over the vendor acquisition SDK.
///
/// Every call blocks until the SDK returns. Configuration calls must precede
/// `start_acquisition`; frame fetches are only valid after
/// `acquisition_progress` reports a new index.
pub trait CcdDriver: Send {
    /// Make the camera at `index` the current device.
    fn select_camera(&mut self, index: u32) -> DriverResult<()>;

    /// Initialize the SDK from its configuration directory.
    fn initialize(&mut self, config_dir: &Path) -> DriverResult<()>;

    /// Power down the device.
    fn shutdown(&mut self) -> DriverResult<()>;

    /// Current device state.
    fn status(&mut self) -> DriverResult<DeviceStatus>;

    /// Sensor dimensions.
    fn detector(&mut self) -> DriverResult<Geometry>;

    /// Select the readout mode.
    fn set_read_mode(&mut self, mode: ReadMode) -> DriverResult<()>;

    /// Select the acquisition mode.
    fn set_acquisition_mode(&mut self, mode: AcquisitionMode) -> DriverResult<()>;

    /// Full-frame image area with symmetric binning.
    fn set_image(&mut self, binning: u32, geometry: Geometry) -> DriverResult<()>;

    /// Configure the shutter.
    fn set_shutter(&mut self, shutter: ShutterSettings) -> DriverResult<()>;

    /// Exposure time in seconds.
    fn set_exposure_time(&mut self, seconds: f32) -> DriverResult<()>;

    /// Horizontal shift speed by table index.
    fn set_hs_speed(&mut self, channel_type: i32, index: i32) -> DriverResult<()>;

    /// Kinetic cycle time in seconds.
    fn set_kinetic_cycle_time(&mut self, seconds: f32) -> DriverResult<()>;

    /// Frames summed into each kinetic frame.
    fn set_number_accumulations(&mut self, count: u32) -> DriverResult<()>;

    /// Accumulation cycle time in seconds.
    fn set_accumulation_cycle_time(&mut self, seconds: f32) -> DriverResult<()>;

    /// Frames in a kinetic series.
    fn set_number_kinetics(&mut self, count: u32) -> DriverResult<()>;

    /// Trigger source.
    fn set_trigger_mode(&mut self, mode: TriggerMode) -> DriverResult<()>;

    /// Timings the SDK computed for the current settings.
    fn acquisition_timings(&mut self) -> DriverResult<AcquisitionTimings>;

    /// Begin acquiring.
    fn start_acquisition(&mut self) -> DriverResult<()>;

    /// Index of the last completed frame in the current series.
    fn acquisition_progress(&mut self) -> DriverResult<u32>;

    /// Copy the full acquired frame into `buffer`.
    fn acquired_data16(&mut self, buffer: &mut [u16]) -> DriverResult<()>;

    /// Copy the most recently completed frame into `buffer`.
    fn most_recent_image16(&mut self, buffer: &mut [u16]) -> DriverResult<()>;

    /// Stop any running acquisition. Safe to call when idle.
    fn abort_acquisition(&mut self) -> DriverResult<()>;

    /// Cooler state and sensor temperature.
    fn temperature(&mut self) -> DriverResult<CoolerReading>;

    /// Detailed temperature readings.
    fn temperature_status(&mut self) -> DriverResult<TemperatureStatus>;

    /// Supported set point range `(min, max)` in Celsius.
    fn temperature_range(&mut self) -> DriverResult<(i32, i32)>;

    /// Cooler set point in Celsius.
    fn set_temperature(&mut self, celsius: i32) -> DriverResult<()>;

    /// Switch the cooler on.
    fn cooler_on(&mut self) -> DriverResult<()>;

    /// Switch the cooler off.
    fn cooler_off(&mut self) -> DriverResult<()>;

    /// Fan speed.
    fn set_fan_mode(&mut self, mode: FanMode) -> DriverResult<()>;

    /// Number of vertical shift speeds.
    fn number_vs_speeds(&mut self) -> DriverResult<i32>;

    /// Number of vertical clock amplitudes.
    fn number_vs_amplitudes(&mut self) -> DriverResult<i32>;

    /// Vertical shift speed at `index`, in microseconds per pixel shift.
    fn vs_speed(&mut self, index: i32) -> DriverResult<f32>;

    /// Fastest recommended vertical speed `(index, speed)`.
    fn fastest_recommended_vs_speed(&mut self) -> DriverResult<(i32, f32)>;

    /// Number of horizontal shift speeds for a channel and amplifier type.
    fn number_hs_speeds(&mut self, channel: i32, amp_type: i32) -> DriverResult<i32>;

    /// Horizontal shift speed in MHz.
    fn hs_speed(&mut self, channel: i32, amp_type: i32, index: i32) -> DriverResult<f32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutter_policy_by_image_type() {
        for dark in [ImageType::Bias, ImageType::Dark, ImageType::Other] {
            let shutter = ShutterSettings::for_image_type(dark);
            assert_eq!(shutter.mode, ShutterMode::Closed);
            assert_eq!(shutter.opening_ms, 0);
            assert_eq!(shutter.closing_ms, 0);
        }
        for lit in [ImageType::Flat, ImageType::Object] {
            let shutter = ShutterSettings::for_image_type(lit);
            assert_eq!(shutter.mode, ShutterMode::Auto);
            assert_eq!(shutter.opening_ms, 5);
        }
    }

    #[test]
    fn test_binned_geometry() {
        let geometry = Geometry {
            width: 2048,
            height: 2048,
        };
        assert_eq!(geometry.binned(2).width, 1024);
        assert_eq!(geometry.binned(2).pixel_count(), 1024 * 1024);
        assert_eq!(geometry.binned(0), geometry);
    }

    #[test]
    fn test_device_status_codes() {
        assert_eq!(DeviceStatus::from_code(StatusCode::ACQUIRING), DeviceStatus::Acquiring);
        assert_eq!(DeviceStatus::Idle.code(), StatusCode::IDLE);
        assert!(!DeviceStatus::Other(StatusCode::TEMP_CYCLE).is_acquiring());
    }
}
