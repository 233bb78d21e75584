//! Simulated CCD detector.
//!
//! Implements [`CcdDriver`] in-process so the server and its tests run without an SDK
//! or hardware. Acquisition progress is derived from wall-clock time since
//! `start_acquisition`, using a frame period of exposure plus readout scaled by
//! `time_scale`. Run-till-abort progress wraps modulo `stream_cycle_len`, the same way
//! the real SDK resets its series counter after each cycle.
//!
//! Every call is recorded; [`SimulatedProbe`] exposes the record to tests.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{
    AcquisitionMode, AcquisitionTimings, CcdDriver, CoolerReading, DeviceStatus, DriverResult,
    FanMode, Geometry, ReadMode, ShutterSettings, StatusCode, TemperatureStatus, TriggerMode,
};

const VS_SPEEDS_US: [f32; 5] = [0.3, 0.5, 0.9, 1.7, 3.3];
const HS_SPEEDS_MHZ: [f32; 4] = [5.0, 3.0, 1.0, 0.05];
const COOLER_STEP_CELSIUS: f32 = 5.0;
const BIAS_LEVEL: u16 = 500;

/// Simulated detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedCcdConfig {
    /// Sensor width in pixels
    #[serde(default = "default_width")]
    pub width: u32,
    /// Sensor height in pixels
    #[serde(default = "default_height")]
    pub height: u32,
    /// Multiplier applied to every simulated duration (1.0 = real time)
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
    /// Readout time for horizontal speed index 0; index `n` takes `(n + 1)` times this
    #[serde(default = "default_readout_secs")]
    pub readout_secs: f64,
    /// Lower bound on the frame period, so zero-second exposures still take time
    #[serde(default = "default_min_frame_secs")]
    pub min_frame_secs: f64,
    /// Frames per run-till-abort progress cycle before the index wraps to 0
    #[serde(default = "default_stream_cycle_len")]
    pub stream_cycle_len: u32,
    /// Heat sink temperature
    #[serde(default = "default_ambient")]
    pub ambient_celsius: f32,
    /// Fetch calls (1-based, counted across the process lifetime) that fail
    #[serde(default)]
    pub fail_fetches: Vec<u32>,
    /// Acquisitions start but never produce a frame
    #[serde(default)]
    pub wedged: bool,
}

fn default_width() -> u32 {
    2048
}

fn default_height() -> u32 {
    2048
}

fn default_time_scale() -> f64 {
    1.0
}

fn default_readout_secs() -> f64 {
    0.5
}

fn default_min_frame_secs() -> f64 {
    0.05
}

fn default_stream_cycle_len() -> u32 {
    4
}

fn default_ambient() -> f32 {
    20.0
}

impl Default for SimulatedCcdConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            time_scale: default_time_scale(),
            readout_secs: default_readout_secs(),
            min_frame_secs: default_min_frame_secs(),
            stream_cycle_len: default_stream_cycle_len(),
            ambient_celsius: default_ambient(),
            fail_fetches: Vec::new(),
            wedged: false,
        }
    }
}

#[derive(Debug)]
struct RunningAcquisition {
    mode: AcquisitionMode,
    started: Instant,
    period: Duration,
    kinetics: u32,
    /// Frames completed when the acquisition was aborted.
    stopped_at: Option<u32>,
}

impl RunningAcquisition {
    fn target(&self) -> Option<u32> {
        match self.mode {
            AcquisitionMode::SingleScan => Some(1),
            AcquisitionMode::Kinetics => Some(self.kinetics),
            AcquisitionMode::RunTillAbort => None,
        }
    }

    fn frames_done(&self, wedged: bool) -> u32 {
        if let Some(stopped) = self.stopped_at {
            return stopped;
        }
        if wedged {
            return 0;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let done = (elapsed / self.period.as_secs_f64()).floor() as u32;
        match self.target() {
            Some(target) => done.min(target),
            None => done,
        }
    }

    fn is_running(&self, wedged: bool) -> bool {
        if self.stopped_at.is_some() {
            return false;
        }
        match self.target() {
            Some(target) => self.frames_done(wedged) < target,
            None => true,
        }
    }
}

#[derive(Debug)]
struct SimState {
    config: SimulatedCcdConfig,
    initialized: bool,
    read_mode: Option<ReadMode>,
    acquisition_mode: AcquisitionMode,
    binning: u32,
    exposure: f32,
    hs_index: i32,
    kinetics: u32,
    shutter: Option<ShutterSettings>,
    acquisition: Option<RunningAcquisition>,
    cooler_on: bool,
    set_point: i32,
    sensor_celsius: f32,
    fan: FanMode,
    fetch_calls: u32,
    fetched_indices: Vec<u32>,
    calls: Vec<String>,
}

impl SimState {
    fn new(config: SimulatedCcdConfig) -> Self {
        let ambient = config.ambient_celsius;
        Self {
            config,
            initialized: false,
            read_mode: None,
            acquisition_mode: AcquisitionMode::SingleScan,
            binning: 1,
            exposure: 0.0,
            hs_index: 0,
            kinetics: 1,
            shutter: None,
            acquisition: None,
            cooler_on: false,
            set_point: 0,
            sensor_celsius: ambient,
            fan: FanMode::Full,
            fetch_calls: 0,
            fetched_indices: Vec::new(),
            calls: Vec::new(),
        }
    }

    fn record(&mut self, call: String) {
        tracing::trace!(call = %call, "simulated driver call");
        self.calls.push(call);
    }

    fn require_init(&self) -> DriverResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(StatusCode::NOT_INITIALIZED)
        }
    }

    fn require_idle(&self) -> DriverResult<()> {
        self.require_init()?;
        if self.is_acquiring() {
            Err(StatusCode::ACQUIRING)
        } else {
            Ok(())
        }
    }

    fn is_acquiring(&self) -> bool {
        self.acquisition
            .as_ref()
            .is_some_and(|acq| acq.is_running(self.config.wedged))
    }

    fn geometry(&self) -> Geometry {
        Geometry {
            width: self.config.width,
            height: self.config.height,
        }
    }

    fn readout_secs(&self) -> f64 {
        self.config.readout_secs * (self.hs_index.max(0) as f64 + 1.0)
    }

    fn frame_period(&self) -> Duration {
        let secs = (f64::from(self.exposure) + self.readout_secs()).max(self.config.min_frame_secs);
        Duration::from_secs_f64(secs * self.config.time_scale)
    }

    fn frames_done(&self) -> u32 {
        self.acquisition
            .as_ref()
            .map_or(0, |acq| acq.frames_done(self.config.wedged))
    }

    /// Count a fetch attempt and decide whether fault injection fails it.
    fn next_fetch_fails(&mut self) -> bool {
        self.fetch_calls += 1;
        self.config.fail_fetches.contains(&self.fetch_calls)
    }

    fn fill_frame(&self, buffer: &mut [u16], frame: u32) -> DriverResult<()> {
        let binned = self.geometry().binned(self.binning);
        if buffer.len() != binned.pixel_count() {
            return Err(StatusCode::P2_INVALID);
        }
        let signal = if self.shutter.is_some_and(|s| s.mode == super::ShutterMode::Auto) {
            (self.exposure * 100.0).min(20_000.0) as u16
        } else {
            0
        };
        let mut rng = rand::thread_rng();
        let width = binned.width.max(1) as usize;
        for (i, pixel) in buffer.iter_mut().enumerate() {
            let x = (i % width) as u32;
            let gradient = ((x + frame) % 256) as u16;
            *pixel = BIAS_LEVEL
                .saturating_add(signal)
                .saturating_add(gradient)
                .saturating_add(rng.gen_range(0..16));
        }
        Ok(())
    }

    fn step_temperature(&mut self) {
        let target = if self.cooler_on {
            self.set_point as f32
        } else {
            self.config.ambient_celsius
        };
        let delta = target - self.sensor_celsius;
        if delta.abs() <= COOLER_STEP_CELSIUS {
            self.sensor_celsius = target;
        } else {
            self.sensor_celsius += COOLER_STEP_CELSIUS * delta.signum();
        }
    }
}

/// In-process detector implementing the driver facade.
pub struct SimulatedCcd {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedCcd {
    /// Create an uninitialized simulated detector.
    pub fn new(config: SimulatedCcdConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(config))),
        }
    }

    /// Handle for inspecting the simulator from tests and diagnostics.
    pub fn probe(&self) -> SimulatedProbe {
        SimulatedProbe {
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimulatedCcd {
    fn default() -> Self {
        Self::new(SimulatedCcdConfig::default())
    }
}

impl CcdDriver for SimulatedCcd {
    fn select_camera(&mut self, index: u32) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("SetCurrentCamera({index})"));
        if index == 0 {
            Ok(())
        } else {
            Err(StatusCode::P1_INVALID)
        }
    }

    fn initialize(&mut self, config_dir: &Path) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("Initialize({})", config_dir.display()));
        state.initialized = true;
        tracing::info!(width = state.config.width, height = state.config.height, "Simulated CCD initialized");
        Ok(())
    }

    fn shutdown(&mut self) -> DriverResult<()> {
        let mut state = self.state();
        state.record("ShutDown".to_string());
        state.initialized = false;
        state.acquisition = None;
        state.cooler_on = false;
        tracing::info!("Simulated CCD shut down");
        Ok(())
    }

    fn status(&mut self) -> DriverResult<DeviceStatus> {
        let state = self.state();
        state.require_init()?;
        if state.is_acquiring() {
            Ok(DeviceStatus::Acquiring)
        } else {
            Ok(DeviceStatus::Idle)
        }
    }

    fn detector(&mut self) -> DriverResult<Geometry> {
        let state = self.state();
        state.require_init()?;
        Ok(state.geometry())
    }

    fn set_read_mode(&mut self, mode: ReadMode) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("SetReadMode({})", mode.code()));
        state.require_idle()?;
        state.read_mode = Some(mode);
        Ok(())
    }

    fn set_acquisition_mode(&mut self, mode: AcquisitionMode) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("SetAcquisitionMode({})", mode.code()));
        state.require_idle()?;
        state.acquisition_mode = mode;
        Ok(())
    }

    fn set_image(&mut self, binning: u32, geometry: Geometry) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!(
            "SetImage({binning},{binning},1,{},1,{})",
            geometry.width, geometry.height
        ));
        state.require_idle()?;
        if binning == 0 || binning > state.config.width {
            return Err(StatusCode::P1_INVALID);
        }
        state.binning = binning;
        Ok(())
    }

    fn set_shutter(&mut self, shutter: ShutterSettings) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!(
            "SetShutter({},{},{},{})",
            i32::from(shutter.ttl_high),
            shutter.mode.code(),
            shutter.closing_ms,
            shutter.opening_ms
        ));
        state.require_init()?;
        state.shutter = Some(shutter);
        Ok(())
    }

    fn set_exposure_time(&mut self, seconds: f32) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("SetExposureTime({seconds})"));
        state.require_idle()?;
        if seconds < 0.0 || !seconds.is_finite() {
            return Err(StatusCode::P1_INVALID);
        }
        state.exposure = seconds;
        Ok(())
    }

    fn set_hs_speed(&mut self, channel_type: i32, index: i32) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("SetHSSpeed({channel_type},{index})"));
        state.require_idle()?;
        if channel_type != 0 {
            return Err(StatusCode::P1_INVALID);
        }
        if index < 0 || index as usize >= HS_SPEEDS_MHZ.len() {
            return Err(StatusCode::P2_INVALID);
        }
        state.hs_index = index;
        Ok(())
    }

    fn set_kinetic_cycle_time(&mut self, seconds: f32) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("SetKineticCycleTime({seconds})"));
        state.require_idle()
    }

    fn set_number_accumulations(&mut self, count: u32) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("SetNumberAccumulations({count})"));
        state.require_idle()
    }

    fn set_accumulation_cycle_time(&mut self, seconds: f32) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("SetAccumulationCycleTime({seconds})"));
        state.require_idle()
    }

    fn set_number_kinetics(&mut self, count: u32) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("SetNumberKinetics({count})"));
        state.require_idle()?;
        if count == 0 {
            return Err(StatusCode::P1_INVALID);
        }
        state.kinetics = count;
        Ok(())
    }

    fn set_trigger_mode(&mut self, mode: TriggerMode) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("SetTriggerMode({})", mode.code()));
        state.require_idle()
    }

    fn acquisition_timings(&mut self) -> DriverResult<AcquisitionTimings> {
        let state = self.state();
        state.require_init()?;
        let kinetic = state.exposure + state.readout_secs() as f32;
        Ok(AcquisitionTimings {
            exposure: state.exposure,
            accumulate: kinetic,
            kinetic,
        })
    }

    fn start_acquisition(&mut self) -> DriverResult<()> {
        let mut state = self.state();
        state.record("StartAcquisition".to_string());
        state.require_idle()?;
        let acquisition = RunningAcquisition {
            mode: state.acquisition_mode,
            started: Instant::now(),
            period: state.frame_period(),
            kinetics: state.kinetics,
            stopped_at: None,
        };
        tracing::debug!(mode = ?acquisition.mode, period = ?acquisition.period, "Simulated acquisition started");
        state.acquisition = Some(acquisition);
        Ok(())
    }

    fn acquisition_progress(&mut self) -> DriverResult<u32> {
        let state = self.state();
        state.require_init()?;
        let done = state.frames_done();
        let cycle = state.config.stream_cycle_len.max(2);
        match state.acquisition.as_ref().map(|acq| acq.mode) {
            Some(AcquisitionMode::RunTillAbort) => Ok(done % cycle),
            _ => Ok(done),
        }
    }

    fn acquired_data16(&mut self, buffer: &mut [u16]) -> DriverResult<()> {
        let mut state = self.state();
        state.record("GetAcquiredData16".to_string());
        state.require_init()?;
        if state.is_acquiring() {
            return Err(StatusCode::ACQUIRING);
        }
        let done = state.frames_done();
        if done == 0 {
            return Err(StatusCode::NO_NEW_DATA);
        }
        state.fetched_indices.push(done);
        if state.next_fetch_fails() {
            return Err(StatusCode::NO_NEW_DATA);
        }
        state.fill_frame(buffer, done)
    }

    fn most_recent_image16(&mut self, buffer: &mut [u16]) -> DriverResult<()> {
        let mut state = self.state();
        state.record("GetMostRecentImage16".to_string());
        state.require_init()?;
        let done = state.frames_done();
        if done == 0 {
            return Err(StatusCode::NO_NEW_DATA);
        }
        state.fetched_indices.push(done);
        if state.next_fetch_fails() {
            return Err(StatusCode::NO_NEW_DATA);
        }
        state.fill_frame(buffer, done)
    }

    fn abort_acquisition(&mut self) -> DriverResult<()> {
        let mut state = self.state();
        state.record("AbortAcquisition".to_string());
        state.require_init()?;
        if !state.is_acquiring() {
            return Err(StatusCode::IDLE);
        }
        let wedged = state.config.wedged;
        if let Some(acq) = state.acquisition.as_mut() {
            acq.stopped_at = Some(acq.frames_done(wedged));
        }
        Ok(())
    }

    fn temperature(&mut self) -> DriverResult<CoolerReading> {
        let mut state = self.state();
        state.require_init()?;
        state.step_temperature();
        let reading_state = if !state.cooler_on {
            StatusCode::TEMPERATURE_OFF
        } else if (state.sensor_celsius - state.set_point as f32).abs() < 0.5 {
            StatusCode::TEMPERATURE_STABILIZED
        } else {
            StatusCode::TEMPERATURE_NOT_REACHED
        };
        Ok(CoolerReading {
            state: reading_state,
            celsius: state.sensor_celsius,
        })
    }

    fn temperature_status(&mut self) -> DriverResult<TemperatureStatus> {
        let state = self.state();
        state.require_init()?;
        Ok(TemperatureStatus {
            sensor: state.sensor_celsius,
            target: state.set_point as f32,
            ambient: state.config.ambient_celsius,
            cooler_volts: if state.cooler_on { 3.2 } else { 0.0 },
        })
    }

    fn temperature_range(&mut self) -> DriverResult<(i32, i32)> {
        let state = self.state();
        state.require_init()?;
        Ok((-100, 20))
    }

    fn set_temperature(&mut self, celsius: i32) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("SetTemperature({celsius})"));
        state.require_init()?;
        if !(-100..=20).contains(&celsius) {
            return Err(StatusCode::P1_INVALID);
        }
        state.set_point = celsius;
        Ok(())
    }

    fn cooler_on(&mut self) -> DriverResult<()> {
        let mut state = self.state();
        state.record("CoolerON".to_string());
        state.require_init()?;
        state.cooler_on = true;
        Ok(())
    }

    fn cooler_off(&mut self) -> DriverResult<()> {
        let mut state = self.state();
        state.record("CoolerOFF".to_string());
        state.require_init()?;
        state.cooler_on = false;
        Ok(())
    }

    fn set_fan_mode(&mut self, mode: FanMode) -> DriverResult<()> {
        let mut state = self.state();
        state.record(format!("SetFanMode({})", mode.code()));
        state.require_init()?;
        state.fan = mode;
        Ok(())
    }

    fn number_vs_speeds(&mut self) -> DriverResult<i32> {
        self.state().require_init()?;
        Ok(VS_SPEEDS_US.len() as i32)
    }

    fn number_vs_amplitudes(&mut self) -> DriverResult<i32> {
        self.state().require_init()?;
        Ok(5)
    }

    fn vs_speed(&mut self, index: i32) -> DriverResult<f32> {
        self.state().require_init()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| VS_SPEEDS_US.get(i).copied())
            .ok_or(StatusCode::P1_INVALID)
    }

    fn fastest_recommended_vs_speed(&mut self) -> DriverResult<(i32, f32)> {
        self.state().require_init()?;
        Ok((1, VS_SPEEDS_US[1]))
    }

    fn number_hs_speeds(&mut self, channel: i32, amp_type: i32) -> DriverResult<i32> {
        self.state().require_init()?;
        if channel != 0 {
            return Err(StatusCode::P1_INVALID);
        }
        if amp_type != 0 {
            return Err(StatusCode::P2_INVALID);
        }
        Ok(HS_SPEEDS_MHZ.len() as i32)
    }

    fn hs_speed(&mut self, channel: i32, amp_type: i32, index: i32) -> DriverResult<f32> {
        self.number_hs_speeds(channel, amp_type)?;
        usize::try_from(index)
            .ok()
            .and_then(|i| HS_SPEEDS_MHZ.get(i).copied())
            .ok_or(StatusCode::P3_INVALID)
    }
}

/// Read-only view of a [`SimulatedCcd`] that outlives the boxed driver.
#[derive(Clone)]
pub struct SimulatedProbe {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedProbe {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of recorded calls whose text starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Progress index observed by each frame fetch.
    pub fn fetched_indices(&self) -> Vec<u32> {
        self.state().fetched_indices.clone()
    }

    /// Whether `Initialize` has succeeded and no `ShutDown` followed.
    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    /// Whether the cooler is running.
    pub fn cooler_on(&self) -> bool {
        self.state().cooler_on
    }

    /// Current cooler set point.
    pub fn set_point(&self) -> i32 {
        self.state().set_point
    }

    /// Configured exposure time.
    pub fn exposure(&self) -> f32 {
        self.state().exposure
    }

    /// Configured binning.
    pub fn binning(&self) -> u32 {
        self.state().binning
    }

    /// Configured horizontal speed index.
    pub fn hs_index(&self) -> i32 {
        self.state().hs_index
    }

    /// Configured acquisition mode.
    pub fn acquisition_mode(&self) -> AcquisitionMode {
        self.state().acquisition_mode
    }

    /// Configured fan mode.
    pub fn fan_mode(&self) -> FanMode {
        self.state().fan
    }

    /// Configured shutter.
    pub fn shutter(&self) -> Option<ShutterSettings> {
        self.state().shutter
    }

    /// Whether the simulated device is currently acquiring.
    pub fn is_acquiring(&self) -> bool {
        self.state().is_acquiring()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn fast_config() -> SimulatedCcdConfig {
        SimulatedCcdConfig {
            width: 64,
            height: 32,
            readout_secs: 0.0,
            min_frame_secs: 0.01,
            stream_cycle_len: 3,
            ..Default::default()
        }
    }

    fn initialized(config: SimulatedCcdConfig) -> SimulatedCcd {
        let mut ccd = SimulatedCcd::new(config);
        ccd.initialize(Path::new("/tmp")).unwrap();
        ccd
    }

    #[test]
    fn test_uninitialized_calls_fail() {
        let mut ccd = SimulatedCcd::default();
        assert_eq!(ccd.status(), Err(StatusCode::NOT_INITIALIZED));
        assert_eq!(ccd.detector(), Err(StatusCode::NOT_INITIALIZED));
    }

    #[test]
    fn test_single_scan_completes() {
        let mut ccd = initialized(fast_config());
        ccd.set_acquisition_mode(AcquisitionMode::SingleScan).unwrap();
        ccd.set_exposure_time(0.0).unwrap();
        ccd.start_acquisition().unwrap();
        assert_eq!(ccd.status(), Ok(DeviceStatus::Acquiring));

        thread::sleep(Duration::from_millis(30));
        assert_eq!(ccd.status(), Ok(DeviceStatus::Idle));
        assert_eq!(ccd.acquisition_progress(), Ok(1));

        let mut buffer = vec![0u16; 64 * 32];
        ccd.acquired_data16(&mut buffer).unwrap();
        assert!(buffer.iter().all(|&p| p >= BIAS_LEVEL));
    }

    #[test]
    fn test_wrong_buffer_size_rejected() {
        let mut ccd = initialized(fast_config());
        let detector = ccd.detector().unwrap();
        ccd.set_image(2, detector).unwrap();
        ccd.start_acquisition().unwrap();
        thread::sleep(Duration::from_millis(30));

        let mut full = vec![0u16; 64 * 32];
        assert_eq!(ccd.acquired_data16(&mut full), Err(StatusCode::P2_INVALID));
    }

    #[test]
    fn test_run_till_abort_progress_wraps() {
        let mut ccd = initialized(fast_config());
        ccd.set_acquisition_mode(AcquisitionMode::RunTillAbort).unwrap();
        ccd.start_acquisition().unwrap();

        thread::sleep(Duration::from_millis(35));
        let index = ccd.acquisition_progress().unwrap();
        assert!(index < 3, "index {index} should wrap at cycle length");
        assert_eq!(ccd.status(), Ok(DeviceStatus::Acquiring));

        ccd.abort_acquisition().unwrap();
        assert_eq!(ccd.status(), Ok(DeviceStatus::Idle));
        assert_eq!(ccd.abort_acquisition(), Err(StatusCode::IDLE));
    }

    #[test]
    fn test_fault_injection() {
        let mut ccd = initialized(SimulatedCcdConfig {
            fail_fetches: vec![1],
            ..fast_config()
        });
        ccd.start_acquisition().unwrap();
        thread::sleep(Duration::from_millis(30));

        let mut buffer = vec![0u16; 64 * 32];
        assert_eq!(ccd.acquired_data16(&mut buffer), Err(StatusCode::NO_NEW_DATA));
        assert!(ccd.acquired_data16(&mut buffer).is_ok());
    }

    #[test]
    fn test_cooler_steps_towards_set_point() {
        let mut ccd = initialized(fast_config());
        assert_eq!(ccd.temperature().unwrap().state, StatusCode::TEMPERATURE_OFF);

        ccd.cooler_on().unwrap();
        ccd.set_temperature(-10).unwrap();
        let first = ccd.temperature().unwrap();
        assert_eq!(first.state, StatusCode::TEMPERATURE_NOT_REACHED);
        assert_eq!(first.celsius, 15.0);

        let mut reading = first;
        for _ in 0..10 {
            reading = ccd.temperature().unwrap();
        }
        assert_eq!(reading.state, StatusCode::TEMPERATURE_STABILIZED);
        assert_eq!(reading.celsius, -10.0);
    }

    #[test]
    fn test_set_temperature_out_of_range() {
        let mut ccd = initialized(fast_config());
        assert_eq!(ccd.set_temperature(60), Err(StatusCode::P1_INVALID));
    }

    #[test]
    fn test_probe_records_calls() {
        let mut ccd = initialized(fast_config());
        let probe = ccd.probe();
        ccd.set_fan_mode(FanMode::Off).unwrap();
        assert_eq!(probe.count("SetFanMode"), 1);
        assert_eq!(probe.fan_mode(), FanMode::Off);
        assert!(probe.is_initialized());
    }
}
