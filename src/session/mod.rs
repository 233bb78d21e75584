//! Exposure control.
//!
//! [`ExposureSession`] runs one acquisition at a time against the camera:
//!
//! ```text
//! Idle -> ConfiguringHardware -> Acquiring -> Completed | Aborted | Failed
//! ```
//!
//! Three protocols share the same skeleton. **Single** takes one full frame.
//! **Streaming** runs the device until aborted and forwards every new frame.
//! **Series** takes a fixed-length kinetic series. Each polls status and progress with a
//! pause of `poll_interval` between steps, and only holds the driver lock for the
//! duration of one step so `abort` can get in between.
//!
//! Setup calls never stop a session. A failed call is logged at `warn` and recorded as a
//! [`SetupWarning`] on the outcome.

mod progress;
mod request;
mod token;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::camera::{fatal, Camera};
use crate::driver::{
    AcquisitionMode, AcquisitionTimings, CcdDriver, DriverResult, Geometry, ReadMode,
    ShutterSettings, StatusCode, TriggerMode,
};
use crate::error::{AppResult, DaqError};
use crate::sink::{Frame, FrameHeader, FrameOrigin, FrameSink};

pub use progress::ProgressTracker;
pub use request::{ExposureRequest, ImageType};
pub use token::{CancelToken, SessionGuard, SessionSlot};

/// Receiver of interim lines produced while a session runs.
pub trait Notifier: Send + Sync {
    /// Deliver one line to every client.
    fn notify(&self, line: &str);
}

impl<F> Notifier for F
where
    F: Fn(&str) + Send + Sync,
{
    fn notify(&self, line: &str) {
        self(line);
    }
}

/// A driver setup call that did not return success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupWarning {
    /// SDK call name
    pub call: &'static str,
    /// Status it returned
    pub code: StatusCode,
}

impl SetupWarning {
    /// Log a setup call and record a warning if it failed. Returns whether it succeeded.
    pub fn check<T>(call: &'static str, result: &DriverResult<T>, warnings: &mut Vec<Self>) -> bool {
        match result {
            Ok(_) => {
                tracing::debug!(call, code = StatusCode::SUCCESS.code(), "driver call");
                true
            }
            Err(code) => {
                tracing::warn!(call, code = code.code(), name = ?code.name(), "driver setup call failed");
                warnings.push(SetupWarning { call, code: *code });
                false
            }
        }
    }
}

/// Acquisition protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// One frame
    Single,
    /// Run till abort
    Streaming,
    /// Kinetic series
    Series,
}

impl SessionMode {
    fn acquisition_mode(self) -> AcquisitionMode {
        match self {
            SessionMode::Single => AcquisitionMode::SingleScan,
            SessionMode::Streaming => AcquisitionMode::RunTillAbort,
            SessionMode::Series => AcquisitionMode::Kinetics,
        }
    }

    fn origin(self) -> FrameOrigin {
        match self {
            SessionMode::Single => FrameOrigin::Expose,
            SessionMode::Streaming => FrameOrigin::Real,
            SessionMode::Series => FrameOrigin::Series,
        }
    }
}

/// Lifecycle of the most recent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session has run yet
    Idle,
    /// Driver setup in progress
    ConfiguringHardware,
    /// Acquisition loop running
    Acquiring,
    /// Finished normally
    Completed,
    /// Stopped by `abort`
    Aborted,
    /// Stopped by an error
    Failed,
}

/// Result of one session.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Protocol that ran
    pub mode: SessionMode,
    /// Terminal phase
    pub phase: SessionPhase,
    /// Success flag reported to the client
    pub success: bool,
    /// Frames handed to the sink successfully
    pub frames_written: u32,
    /// Frames the device completed between two polls that could not be fetched
    pub frames_missed: u32,
    /// Path of the last frame written
    pub last_path: Option<PathBuf>,
    /// Exposure time reported to the client
    pub reported_exposure: f32,
    /// Wall-clock duration
    pub elapsed: Duration,
    /// Setup calls that failed
    pub warnings: Vec<SetupWarning>,
    /// Why the session failed
    pub error: Option<DaqError>,
}

/// Owner of the camera's acquisition capability.
pub struct ExposureSession {
    camera: Arc<Camera>,
    sink: Arc<dyn FrameSink>,
    slot: SessionSlot,
    phase: Mutex<SessionPhase>,
}

impl ExposureSession {
    /// Session runner writing frames to `sink`.
    pub fn new(camera: Arc<Camera>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            camera,
            sink,
            slot: SessionSlot::new(),
            phase: Mutex::new(SessionPhase::Idle),
        }
    }

    /// Camera this session drives.
    pub fn camera(&self) -> &Arc<Camera> {
        &self.camera
    }

    /// Phase of the current or most recent session.
    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a session, or a reservation, holds the camera.
    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// Hold the camera for a state-changing operation that is not an acquisition.
    ///
    /// # Errors
    ///
    /// `DaqError::SessionBusy` if an acquisition is running.
    pub fn reserve(&self) -> AppResult<SessionGuard<'_>> {
        self.slot.try_acquire()
    }

    /// Cancel the running session, if any, and abort the driver.
    ///
    /// The driver abort is issued even when nothing is running. Camera state is untouched.
    pub fn abort(&self) {
        let mut driver = self.camera.driver();
        if let Some(token) = self.slot.current() {
            token.cancel();
            tracing::info!(session_id = token.session_id(), "acquisition cancelled");
        }
        match driver.abort_acquisition() {
            Ok(()) => tracing::info!("AbortAcquisition"),
            Err(code) => tracing::debug!(code = code.code(), "AbortAcquisition with nothing running"),
        }
    }

    /// Run one acquisition to completion.
    ///
    /// # Errors
    ///
    /// `DaqError::SessionBusy` before any driver call if another session holds the camera;
    /// `DaqError::DriverFatal` if the device does not answer before configuration.
    /// Failures after the acquisition started are reported through the outcome.
    pub fn run(
        &self,
        mode: SessionMode,
        request: &ExposureRequest,
        notifier: &dyn Notifier,
    ) -> AppResult<SessionOutcome> {
        let guard = self.slot.try_acquire()?;
        let token = guard.token().clone();
        tracing::info!(
            session_id = token.session_id(),
            ?mode,
            image_type = %request.image_type(),
            count = request.exposure_count(),
            itime = request.integration_time(),
            binning = request.binning(),
            "session accepted"
        );
        self.set_phase(SessionPhase::ConfiguringHardware);

        let result = self.run_guarded(mode, request, notifier, &token);
        let phase = match &result {
            Ok(outcome) => outcome.phase,
            Err(_) => SessionPhase::Failed,
        };
        self.set_phase(phase);
        match &result {
            Ok(outcome) => tracing::info!(
                session_id = token.session_id(),
                ?phase,
                frames = outcome.frames_written,
                missed = outcome.frames_missed,
                elapsed = ?outcome.elapsed,
                "session finished"
            ),
            Err(e) => tracing::warn!(session_id = token.session_id(), error = %e, "session rejected"),
        }
        drop(guard);
        result
    }

    fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn run_guarded(
        &self,
        mode: SessionMode,
        request: &ExposureRequest,
        notifier: &dyn Notifier,
        token: &CancelToken,
    ) -> AppResult<SessionOutcome> {
        let started = Instant::now();
        let geometry = {
            let mut driver = self.camera.driver();
            driver.status().map_err(|code| fatal("GetStatus", code))?;
            driver.detector().map_err(|code| fatal("GetDetector", code))?
        };

        let mut run = Run {
            session: self,
            mode,
            request,
            notifier,
            token,
            geometry,
            timings: AcquisitionTimings::default(),
            warnings: Vec::new(),
            frames_written: 0,
            frames_missed: 0,
            last_path: None,
            started,
        };
        let started_ok = run.configure_and_start();
        if token.is_cancelled() {
            return Ok(run.finish(SessionPhase::Aborted, None));
        }
        if let Err(code) = started_ok {
            return Ok(run.finish(SessionPhase::Failed, Some(fatal("StartAcquisition", code))));
        }
        self.set_phase(SessionPhase::Acquiring);

        Ok(match mode {
            SessionMode::Single => run.single(),
            SessionMode::Streaming => run.streaming(),
            SessionMode::Series => run.series(),
        })
    }
}

/// State of one running acquisition.
struct Run<'a> {
    session: &'a ExposureSession,
    mode: SessionMode,
    request: &'a ExposureRequest,
    notifier: &'a dyn Notifier,
    token: &'a CancelToken,
    geometry: Geometry,
    timings: AcquisitionTimings,
    warnings: Vec<SetupWarning>,
    frames_written: u32,
    frames_missed: u32,
    last_path: Option<PathBuf>,
    started: Instant,
}

/// One poll of the device.
struct Poll {
    acquiring: bool,
    index: u32,
}

impl Run<'_> {
    fn config(&self) -> &crate::config::CameraConfig {
        self.session.camera.config()
    }

    /// Program the driver for this protocol and start it. Returns the start result.
    fn configure_and_start(&mut self) -> DriverResult<()> {
        let request = self.request;
        let hs_index = match self.mode {
            SessionMode::Streaming => self.config().streaming_readout_index,
            _ => request.readout_index(),
        };
        let mut driver = self.session.camera.driver();
        let w = &mut self.warnings;

        SetupWarning::check("SetReadMode", &driver.set_read_mode(ReadMode::Image), w);
        SetupWarning::check(
            "SetAcquisitionMode",
            &driver.set_acquisition_mode(self.mode.acquisition_mode()),
            w,
        );
        SetupWarning::check(
            "SetImage",
            &driver.set_image(request.binning(), self.geometry),
            w,
        );
        SetupWarning::check(
            "SetShutter",
            &driver.set_shutter(ShutterSettings::for_image_type(request.image_type())),
            w,
        );
        SetupWarning::check(
            "SetExposureTime",
            &driver.set_exposure_time(request.programmed_exposure()),
            w,
        );
        match self.mode {
            SessionMode::Single => {}
            SessionMode::Streaming => {
                SetupWarning::check("SetKineticCycleTime", &driver.set_kinetic_cycle_time(0.0), w);
            }
            SessionMode::Series => {
                SetupWarning::check(
                    "SetNumberAccumulations",
                    &driver.set_number_accumulations(1),
                    w,
                );
                SetupWarning::check(
                    "SetAccumulationCycleTime",
                    &driver.set_accumulation_cycle_time(0.0),
                    w,
                );
                SetupWarning::check(
                    "SetNumberKinetics",
                    &driver.set_number_kinetics(request.exposure_count()),
                    w,
                );
                SetupWarning::check("SetKineticCycleTime", &driver.set_kinetic_cycle_time(0.0), w);
                SetupWarning::check(
                    "SetTriggerMode",
                    &driver.set_trigger_mode(TriggerMode::Internal),
                    w,
                );
            }
        }
        SetupWarning::check("SetHSSpeed", &driver.set_hs_speed(0, hs_index), w);

        let timings = driver.acquisition_timings();
        SetupWarning::check("GetAcquisitionTimings", &timings, w);
        self.timings = timings.unwrap_or(AcquisitionTimings {
            exposure: request.programmed_exposure(),
            accumulate: request.programmed_exposure(),
            kinetic: request.programmed_exposure(),
        });
        tracing::debug!(timings = ?self.timings, "adjusted exposure timings");

        if self.token.is_cancelled() {
            return Ok(());
        }
        let started = driver.start_acquisition();
        tracing::debug!(code = crate::driver::code_of(&started).code(), "StartAcquisition");
        started
    }

    /// Read status then progress. Aborts the driver if cancelled while still acquiring.
    fn poll(&self, last_index: u32) -> Poll {
        let mut driver = self.session.camera.driver();
        let acquiring = matches!(driver.status(), Ok(status) if status.is_acquiring());
        let index = driver.acquisition_progress().unwrap_or(last_index);
        if acquiring && self.token.is_cancelled() {
            let _ = driver.abort_acquisition();
        }
        Poll { acquiring, index }
    }

    /// Account for `advanced` completed frames. Returns whether there is a frame to fetch.
    ///
    /// Only the most recent frame is retrievable, so every earlier one is counted as missed.
    fn advanced(&mut self, advanced: u32, index: u32) -> bool {
        if advanced > 1 {
            let skipped = advanced - 1;
            self.frames_missed += skipped;
            tracing::warn!(index, skipped, mode = ?self.mode, "progress jumped, earlier frames not fetched");
        }
        advanced > 0
    }

    fn pause(&self) {
        thread::sleep(self.config().poll_interval());
    }

    /// Deadline for the next frame, if a bound is configured.
    fn frame_deadline(&self, nominal: f32) -> Option<Instant> {
        self.config()
            .max_frame_wait()
            .map(|wait| Instant::now() + Duration::from_secs_f32(nominal.max(0.0)) + wait)
    }

    fn timed_out(&self, deadline: Option<Instant>) -> Option<SessionOutcome> {
        let deadline = deadline?;
        if Instant::now() < deadline {
            return None;
        }
        let _ = self.session.camera.driver().abort_acquisition();
        let wait = self.config().max_frame_wait().unwrap_or_default();
        tracing::warn!(?wait, frames = self.frames_written, "no frame before deadline, acquisition aborted");
        Some(self.finish(SessionPhase::Failed, Some(DaqError::AcquisitionTimeout(wait))))
    }

    /// Fetch the current frame and hand it to the sink.
    fn capture(&self, full_frame: bool) -> AppResult<PathBuf> {
        let binned = self.geometry.binned(self.request.binning());
        let mut pixels = vec![0u16; binned.pixel_count()];
        let header = {
            let mut driver = self.session.camera.driver();
            let (call, fetched) = if full_frame {
                ("GetAcquiredData16", driver.acquired_data16(&mut pixels))
            } else {
                ("GetMostRecentImage16", driver.most_recent_image16(&mut pixels))
            };
            fetched.map_err(|code| DaqError::FrameFetch { call, code })?;
            self.header(&mut **driver)
        };
        let frame = Frame {
            origin: self.mode.origin(),
            width: binned.width,
            height: binned.height,
            pixels,
            header,
        };
        self.session.sink.write(&frame)
    }

    fn header(&self, driver: &mut dyn CcdDriver) -> FrameHeader {
        let temperature = driver.temperature().ok().map(|reading| reading.celsius);
        FrameHeader {
            timestamp: Utc::now(),
            image_type: self.request.image_type(),
            filter: self.request.filter().map(str::to_string),
            binning: self.request.binning(),
            exposure: self.request.programmed_exposure(),
            acquisition_mode: self.mode.acquisition_mode(),
            read_mode: ReadMode::Image,
            temperature,
            readout_time: (self.timings.kinetic - self.timings.exposure).max(0.0),
        }
    }

    fn single(mut self) -> SessionOutcome {
        let deadline =
            self.frame_deadline(self.timings.kinetic.max(self.request.programmed_exposure()));
        loop {
            if !self.poll(0).acquiring {
                break;
            }
            if let Some(outcome) = self.timed_out(deadline) {
                return outcome;
            }
            self.pause();
        }

        if self.token.is_cancelled() {
            return self.finish(SessionPhase::Aborted, None);
        }
        match self.capture(true) {
            Ok(path) => {
                self.frames_written = 1;
                self.last_path = Some(path);
                self.finish(SessionPhase::Completed, None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "single exposure failed");
                self.finish(SessionPhase::Failed, Some(e))
            }
        }
    }

    fn streaming(mut self) -> SessionOutcome {
        let mut tracker = ProgressTracker::new();
        let mut deadline = self.frame_deadline(self.timings.kinetic);
        loop {
            let poll = self.poll(tracker.last_index());
            if self.token.is_cancelled() {
                return self.finish(SessionPhase::Aborted, None);
            }
            if !poll.acquiring {
                let code = self.session.camera.status();
                tracing::warn!(code = code.code(), "stream stopped without abort");
                return self.finish(SessionPhase::Failed, Some(fatal("GetStatus", code)));
            }
            if self.advanced(tracker.observe(poll.index), poll.index) {
                deadline = self.frame_deadline(self.timings.kinetic);
                match self.capture(false) {
                    Ok(path) => {
                        self.frames_written += 1;
                        let line = format!("realSent {}", path.display());
                        self.token.emit_unless_cancelled(|| self.notifier.notify(&line));
                        self.last_path = Some(path);
                    }
                    Err(e) => {
                        tracing::warn!(index = poll.index, error = %e, "stream frame skipped");
                    }
                }
            }
            if let Some(outcome) = self.timed_out(deadline) {
                return outcome;
            }
            self.pause();
        }
    }

    fn series(mut self) -> SessionOutcome {
        let target = self.request.exposure_count();
        let mut tracker = ProgressTracker::new();
        let mut deadline = self.frame_deadline(self.timings.kinetic);
        loop {
            let poll = self.poll(tracker.last_index());
            let cancelled = self.token.is_cancelled();
            if self.advanced(tracker.observe(poll.index), poll.index)
                && self.frames_written < target
                && !(cancelled && !poll.acquiring)
            {
                deadline = self.frame_deadline(self.timings.kinetic);
                match self.capture(false) {
                    Ok(path) => {
                        self.frames_written += 1;
                        let n = self.frames_written;
                        let line = format!(
                            "seriesSent{n} {n},{target},{},{}",
                            format_float(self.request.programmed_exposure()),
                            path.display()
                        );
                        self.token.emit_unless_cancelled(|| self.notifier.notify(&line));
                        self.last_path = Some(path);
                    }
                    Err(e) => {
                        tracing::warn!(index = poll.index, error = %e, "series frame skipped");
                    }
                }
                if self.frames_written == target {
                    self.token.cancel();
                    return self.finish(SessionPhase::Completed, None);
                }
            }
            if !poll.acquiring {
                let phase = if cancelled {
                    SessionPhase::Aborted
                } else {
                    SessionPhase::Completed
                };
                return self.finish(phase, None);
            }
            if let Some(outcome) = self.timed_out(deadline) {
                return outcome;
            }
            self.pause();
        }
    }

    fn finish(&self, phase: SessionPhase, error: Option<DaqError>) -> SessionOutcome {
        let success = match self.mode {
            SessionMode::Single => phase == SessionPhase::Completed,
            SessionMode::Streaming | SessionMode::Series => phase != SessionPhase::Failed,
        };
        let reported_exposure = if self.request.image_type() == ImageType::Bias {
            self.timings.exposure
        } else {
            self.request.integration_time()
        };
        SessionOutcome {
            mode: self.mode,
            phase,
            success,
            frames_written: self.frames_written,
            frames_missed: self.frames_missed,
            last_path: self.last_path.clone(),
            reported_exposure,
            elapsed: self.started.elapsed(),
            warnings: self.warnings.clone(),
            error,
        }
    }
}

/// Render a float the way clients expect it: always with a decimal point.
pub fn format_float(seconds: f32) -> String {
    format!("{seconds:?}")
}
