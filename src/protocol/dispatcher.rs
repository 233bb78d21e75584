//! Routes parsed commands to the camera and the exposure session.

use std::sync::Arc;

use super::command::Command;
use crate::camera::Camera;
use crate::error::AppResult;
use crate::session::{format_float, ExposureSession, Notifier, SessionMode};

/// Long-lived command router shared by every connection.
#[derive(Clone)]
pub struct Dispatcher {
    camera: Arc<Camera>,
    session: Arc<ExposureSession>,
}

impl Dispatcher {
    /// Router over `session` and the camera it drives.
    pub fn new(session: Arc<ExposureSession>) -> Self {
        Self {
            camera: Arc::clone(session.camera()),
            session,
        }
    }

    /// Exposure session this dispatcher routes to.
    pub fn session(&self) -> &Arc<ExposureSession> {
        &self.session
    }

    /// Handle one request line.
    ///
    /// Returns the terminal reply, or `None` for a blank line. Streaming and series
    /// commands send interim lines through `notifier` before returning. Blocks for the
    /// duration of an acquisition.
    pub fn dispatch(&self, line: &str, notifier: &dyn Notifier) -> Option<String> {
        let command = match Command::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(rejected) => {
                tracing::debug!(line, error = %rejected.error, "request rejected");
                return Some(rejected.reply());
            }
        };
        let name = command.name();
        tracing::debug!(command = name, "dispatching");
        let reply = match self.execute(command, notifier) {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_request_error() {
                    tracing::info!(command = name, error = %e, "command refused");
                } else {
                    tracing::warn!(command = name, error = %e, "command failed");
                }
                format!("{name} error {e}")
            }
        };
        Some(reply)
    }

    fn execute(&self, command: Command, notifier: &dyn Notifier) -> AppResult<String> {
        let camera = &self.camera;
        let reply = match command {
            Command::Connect => {
                let _reserved = self.session.reserve()?;
                format!("connect {}", camera.connect())
            }
            Command::Status => format!("status {}", camera.status()),
            Command::Temp => {
                let report = camera.temperature()?;
                format!(
                    "temp {},{},{},{},{}",
                    report.state,
                    format_float(report.status.sensor),
                    format_float(report.status.target),
                    format_float(report.status.ambient),
                    format_float(report.status.cooler_volts)
                )
            }
            Command::TempRange => {
                let (code, min, max) = camera.temperature_range();
                format!("tempRange {code},{min},{max}")
            }
            Command::SetTec(celsius) => {
                let _reserved = self.session.reserve()?;
                camera.set_cooler_target(celsius)?;
                format!("setTEC {celsius}")
            }
            Command::GetTec => {
                let reading = camera.cooler()?;
                format!("getTEC {},{}", reading.state, format_float(reading.celsius))
            }
            Command::Warmup => {
                let _reserved = self.session.reserve()?;
                format!("warmup {}", u8::from(camera.warmup()))
            }
            Command::Shutdown => {
                let _reserved = self.session.reserve()?;
                camera.shutdown();
                "shutdown 1".to_string()
            }
            Command::Timings => {
                let t = camera.timings()?;
                format!(
                    "timings {},{},{}",
                    format_float(t.exposure),
                    format_float(t.accumulate),
                    format_float(t.kinetic)
                )
            }
            Command::VertStats(index) => {
                let s = camera.vertical_speed_stats(index)?;
                format!(
                    "vertStats {},{},{},{},{}",
                    s.speeds,
                    s.amplitudes,
                    format_float(s.speed),
                    s.fastest_index,
                    format_float(s.fastest_speed)
                )
            }
            Command::HorzStats {
                channel,
                amp_type,
                index,
            } => {
                let s = camera.horizontal_speed_stats(channel, amp_type, index)?;
                format!("horzStats {},{}", s.speeds, format_float(s.speed))
            }
            Command::Abort => {
                self.session.abort();
                "abort 1".to_string()
            }
            Command::Expose(request) => {
                let outcome = self.session.run(SessionMode::Single, &request, notifier)?;
                let path = outcome
                    .last_path
                    .as_ref()
                    .map_or_else(|| "None".to_string(), |p| p.display().to_string());
                format!(
                    "expose {},{},{}",
                    u8::from(outcome.success),
                    path,
                    format_float(outcome.reported_exposure)
                )
            }
            Command::Real(request) => {
                let outcome = self.session.run(SessionMode::Streaming, &request, notifier)?;
                format!("real {}", u8::from(outcome.success))
            }
            Command::Series(request) => {
                let outcome = self.session.run(SessionMode::Series, &request, notifier)?;
                format!(
                    "series {},{}",
                    u8::from(outcome.success),
                    outcome.frames_written
                )
            }
        };
        Ok(reply)
    }
}
