//! Shared fixtures: a simulated 16x16 detector running at 1/100 real time.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ccd_daq::camera::Camera;
use ccd_daq::config::CameraConfig;
use ccd_daq::driver::{SimulatedCcd, SimulatedCcdConfig, SimulatedProbe};
use ccd_daq::protocol::{Dispatcher, Notifier};
use ccd_daq::session::ExposureSession;
use ccd_daq::sink::MemorySink;

/// Simulated detector with 10 ms of wall time per simulated second and no readout.
pub fn fast_ccd() -> SimulatedCcdConfig {
    SimulatedCcdConfig {
        width: 16,
        height: 16,
        time_scale: 0.01,
        readout_secs: 0.0,
        ..Default::default()
    }
}

pub fn fast_camera() -> CameraConfig {
    CameraConfig {
        poll_interval_ms: 5,
        ..Default::default()
    }
}

/// Everything a test needs to drive and inspect one server instance.
pub struct Rig {
    pub dispatcher: Dispatcher,
    pub probe: SimulatedProbe,
    pub sink: Arc<MemorySink>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with(fast_ccd(), fast_camera(), MemorySink::new())
    }

    pub fn with(ccd: SimulatedCcdConfig, camera: CameraConfig, sink: MemorySink) -> Self {
        let ccd = SimulatedCcd::new(ccd);
        let probe = ccd.probe();
        let camera = Arc::new(Camera::new(Box::new(ccd), camera));
        let sink = Arc::new(sink);
        let session = Arc::new(ExposureSession::new(camera, Arc::clone(&sink) as _));
        Self {
            dispatcher: Dispatcher::new(session),
            probe,
            sink,
        }
    }

    /// Rig with the camera already connected.
    pub fn connected() -> Self {
        Self::connected_with(fast_ccd(), fast_camera(), MemorySink::new())
    }

    pub fn connected_with(ccd: SimulatedCcdConfig, camera: CameraConfig, sink: MemorySink) -> Self {
        let rig = Self::with(ccd, camera, sink);
        assert_eq!(rig.send("connect"), "connect 20002");
        rig
    }

    /// Dispatch a line, discarding interim lines.
    pub fn send(&self, line: &str) -> String {
        self.dispatcher
            .dispatch(line, &|_: &str| {})
            .unwrap_or_default()
    }

    /// Dispatch a line on a background thread, collecting interim lines.
    pub fn spawn(&self, line: &str, lines: &Collector) -> thread::JoinHandle<Option<String>> {
        let dispatcher = self.dispatcher.clone();
        let lines = lines.clone();
        let line = line.to_string();
        thread::spawn(move || dispatcher.dispatch(&line, &lines))
    }
}

/// Notifier that records every line it is given.
#[derive(Clone, Default)]
pub struct Collector {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Collector {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }
}

impl Notifier for Collector {
    fn notify(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// Poll `condition` every millisecond for up to five seconds.
pub fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached within 5s");
        thread::sleep(Duration::from_millis(1));
    }
}
