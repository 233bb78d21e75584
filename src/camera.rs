//! Camera-level operations outside the exposure protocols.
//!
//! [`Camera`] owns the single driver instance and the process-wide [`CameraState`].
//! Every driver call in the crate goes through [`Camera::driver`], which serializes
//! access to the SDK.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::CameraConfig;
use crate::driver::{
    code_of, AcquisitionMode, AcquisitionTimings, CcdDriver, CoolerReading, FanMode,
    ShutterSettings, StatusCode, TemperatureStatus,
};
use crate::error::{AppResult, DaqError};
use crate::session::SetupWarning;

/// Process-wide camera bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraState {
    /// Whether the last `connect` initialized the SDK
    pub initialized: bool,
    /// Cooler set point requested through `setTEC`
    pub cooler_target: Option<i32>,
    /// Most recent device status reported to a client
    pub last_status: Option<StatusCode>,
}

/// Answer to the `temp` query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReport {
    /// Cooler state code
    pub state: StatusCode,
    /// Detailed readings
    pub status: TemperatureStatus,
}

/// Answer to the `vertStats` query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalSpeedStats {
    /// Number of vertical shift speeds
    pub speeds: i32,
    /// Number of clock amplitudes
    pub amplitudes: i32,
    /// Speed at the requested index
    pub speed: f32,
    /// Index of the fastest recommended speed
    pub fastest_index: i32,
    /// Fastest recommended speed
    pub fastest_speed: f32,
}

/// Answer to the `horzStats` query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizontalSpeedStats {
    /// Number of horizontal shift speeds for the channel and amplifier
    pub speeds: i32,
    /// Speed at the requested index, in MHz
    pub speed: f32,
}

/// The detector and its serialized driver.
pub struct Camera {
    driver: Mutex<Box<dyn CcdDriver>>,
    state: Mutex<CameraState>,
    config: CameraConfig,
}

impl Camera {
    /// Wrap a driver. The SDK is not touched until [`Camera::connect`].
    pub fn new(driver: Box<dyn CcdDriver>, config: CameraConfig) -> Self {
        Self {
            driver: Mutex::new(driver),
            state: Mutex::new(CameraState::default()),
            config,
        }
    }

    /// Camera configuration.
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Snapshot of the camera state.
    pub fn state(&self) -> CameraState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Exclusive access to the driver. Hold it for one call or one poll step only.
    pub(crate) fn driver(&self) -> MutexGuard<'_, Box<dyn CcdDriver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn update_state<F: FnOnce(&mut CameraState)>(&self, update: F) {
        update(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Start-up sequence. Returns the code of the `Initialize` call.
    ///
    /// Selects the configured camera, initializes the SDK, then leaves the device in
    /// single-scan mode with the shutter on auto, set point 0, fan full and cooler off.
    pub fn connect(&self) -> StatusCode {
        let mut driver = self.driver();
        let mut warnings = Vec::new();

        SetupWarning::check(
            "SetCurrentCamera",
            &driver.select_camera(self.config.camera_index),
            &mut warnings,
        );
        let init = driver.initialize(&self.config.sdk_config_dir);
        let init_code = code_of(&init);
        tracing::info!(
            code = init_code.code(),
            dir = %self.config.sdk_config_dir.display(),
            "Initialize"
        );

        let status = driver.status();
        tracing::debug!(status = ?status, "GetStatus");
        SetupWarning::check(
            "SetAcquisitionMode",
            &driver.set_acquisition_mode(AcquisitionMode::SingleScan),
            &mut warnings,
        );
        SetupWarning::check(
            "SetShutter",
            &driver.set_shutter(ShutterSettings::startup()),
            &mut warnings,
        );
        SetupWarning::check("SetTemperature", &driver.set_temperature(0), &mut warnings);
        SetupWarning::check("SetFanMode", &driver.set_fan_mode(FanMode::Full), &mut warnings);
        SetupWarning::check("CoolerOFF", &driver.cooler_off(), &mut warnings);
        drop(driver);

        self.update_state(|state| {
            state.initialized = init.is_ok();
            state.cooler_target = None;
            state.last_status = Some(match status {
                Ok(s) => s.code(),
                Err(code) => code,
            });
        });
        if !warnings.is_empty() {
            tracing::warn!(count = warnings.len(), "camera start-up finished with warnings");
        }
        init_code
    }

    /// Device status code, or the error code if the driver cannot answer.
    pub fn status(&self) -> StatusCode {
        let code = match self.driver().status() {
            Ok(status) => status.code(),
            Err(code) => code,
        };
        self.update_state(|state| state.last_status = Some(code));
        code
    }

    /// Cooler state plus detailed temperature readings.
    ///
    /// # Errors
    ///
    /// `DaqError::DriverFatal` if either reading fails.
    pub fn temperature(&self) -> AppResult<TemperatureReport> {
        let mut driver = self.driver();
        let status = driver
            .temperature_status()
            .map_err(|code| fatal("GetTemperatureStatus", code))?;
        let reading = driver
            .temperature()
            .map_err(|code| fatal("GetTemperatureF", code))?;
        Ok(TemperatureReport {
            state: reading.state,
            status,
        })
    }

    /// Supported set point range with the call's status code. `(0, 0)` on failure.
    pub fn temperature_range(&self) -> (StatusCode, i32, i32) {
        match self.driver().temperature_range() {
            Ok((min, max)) => (StatusCode::SUCCESS, min, max),
            Err(code) => (code, 0, 0),
        }
    }

    /// Cooler state and sensor temperature.
    ///
    /// # Errors
    ///
    /// `DaqError::DriverFatal` if the reading fails.
    pub fn cooler(&self) -> AppResult<CoolerReading> {
        self.driver()
            .temperature()
            .map_err(|code| fatal("GetTemperatureF", code))
    }

    /// Switch the cooler on if it is off, then move the set point.
    ///
    /// A set point the driver rejects is logged; the cooler state is left as is.
    ///
    /// # Errors
    ///
    /// `DaqError::DriverFatal` if the cooler state cannot be read.
    pub fn set_cooler_target(&self, celsius: i32) -> AppResult<()> {
        let mut driver = self.driver();
        let reading = driver
            .temperature()
            .map_err(|code| fatal("GetTemperatureF", code))?;
        let mut warnings = Vec::new();
        if reading.state == StatusCode::TEMPERATURE_OFF {
            SetupWarning::check("CoolerON", &driver.cooler_on(), &mut warnings);
        }
        let accepted = driver.set_temperature(celsius);
        SetupWarning::check("SetTemperature", &accepted, &mut warnings);
        drop(driver);

        if accepted.is_ok() {
            self.update_state(|state| state.cooler_target = Some(celsius));
        }
        tracing::info!(celsius, previous = ?reading.state.cooler_state_name(), "cooler set point requested");
        Ok(())
    }

    /// Set point 0, fan full, cooler off. `true` if both fan and cooler calls succeeded.
    pub fn warmup(&self) -> bool {
        let mut driver = self.driver();
        let mut warnings = Vec::new();
        SetupWarning::check("SetTemperature", &driver.set_temperature(0), &mut warnings);
        let fan = driver.set_fan_mode(FanMode::Full);
        let cooler = driver.cooler_off();
        SetupWarning::check("SetFanMode", &fan, &mut warnings);
        SetupWarning::check("CoolerOFF", &cooler, &mut warnings);
        drop(driver);

        let ok = fan.is_ok() && cooler.is_ok();
        if cooler.is_ok() {
            self.update_state(|state| state.cooler_target = None);
        }
        ok
    }

    /// Warm up, then power the device down.
    pub fn shutdown(&self) {
        self.warmup();
        match self.driver().temperature_status() {
            Ok(status) => tracing::info!(sensor = status.sensor, "temperature at shutdown"),
            Err(code) => tracing::debug!(code = code.code(), "temperature unavailable at shutdown"),
        }
        tracing::info!("closing down camera connection");
        let result = self.driver().shutdown();
        SetupWarning::check("ShutDown", &result, &mut Vec::new());
        self.update_state(|state| {
            state.initialized = false;
            state.cooler_target = None;
        });
    }

    /// Timings computed by the SDK for the current settings.
    ///
    /// # Errors
    ///
    /// `DaqError::DriverFatal` if the driver cannot answer.
    pub fn timings(&self) -> AppResult<AcquisitionTimings> {
        self.driver()
            .acquisition_timings()
            .map_err(|code| fatal("GetAcquisitionTimings", code))
    }

    /// Vertical shift speed diagnostics.
    ///
    /// # Errors
    ///
    /// `DaqError::DriverFatal` naming the first call that failed.
    pub fn vertical_speed_stats(&self, index: i32) -> AppResult<VerticalSpeedStats> {
        let mut driver = self.driver();
        let speeds = driver
            .number_vs_speeds()
            .map_err(|code| fatal("GetNumberVSSpeeds", code))?;
        let amplitudes = driver
            .number_vs_amplitudes()
            .map_err(|code| fatal("GetNumberVSAmplitudes", code))?;
        let speed = driver
            .vs_speed(index)
            .map_err(|code| fatal("GetVSSpeed", code))?;
        let (fastest_index, fastest_speed) = driver
            .fastest_recommended_vs_speed()
            .map_err(|code| fatal("GetFastestRecommendedVSSpeed", code))?;
        Ok(VerticalSpeedStats {
            speeds,
            amplitudes,
            speed,
            fastest_index,
            fastest_speed,
        })
    }

    /// Horizontal shift speed diagnostics.
    ///
    /// # Errors
    ///
    /// `DaqError::DriverFatal` naming the first call that failed.
    pub fn horizontal_speed_stats(
        &self,
        channel: i32,
        amp_type: i32,
        index: i32,
    ) -> AppResult<HorizontalSpeedStats> {
        let mut driver = self.driver();
        let speeds = driver
            .number_hs_speeds(channel, amp_type)
            .map_err(|code| fatal("GetNumberHSSpeeds", code))?;
        let speed = driver
            .hs_speed(channel, amp_type, index)
            .map_err(|code| fatal("GetHSSpeed", code))?;
        Ok(HorizontalSpeedStats { speeds, speed })
    }
}

pub(crate) fn fatal(call: &'static str, code: StatusCode) -> DaqError {
    DaqError::DriverFatal { call, code }
}
