//! Frame persistence.
//!
//! The exposure session hands every finished frame to a [`FrameSink`] and reports the
//! returned path to clients. [`FitsSink`] is the production sink; [`MemorySink`] keeps
//! frames in memory and can be told to fail, which is what the session tests use.

mod fits;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::driver::{AcquisitionMode, ReadMode};
use crate::error::{AppResult, DaqError};
use crate::session::ImageType;

pub use fits::{FitsSink, PathAllocator};

/// Which protocol produced a frame. Used as the file name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Single exposure
    Expose,
    /// Run-till-abort stream
    Real,
    /// Kinetic series
    Series,
}

impl FrameOrigin {
    /// File name prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            FrameOrigin::Expose => "expose",
            FrameOrigin::Real => "real",
            FrameOrigin::Series => "series",
        }
    }
}

/// Per-frame header metadata, captured just before the frame is written.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    /// Acquisition timestamp
    pub timestamp: DateTime<Utc>,
    /// Kind of frame
    pub image_type: ImageType,
    /// Filter in the beam
    pub filter: Option<String>,
    /// Symmetric binning
    pub binning: u32,
    /// Exposure time in seconds
    pub exposure: f32,
    /// Hardware acquisition mode
    pub acquisition_mode: AcquisitionMode,
    /// Readout mode
    pub read_mode: ReadMode,
    /// Sensor temperature in Celsius, if the driver answered
    pub temperature: Option<f32>,
    /// Kinetic cycle minus exposure, in seconds
    pub readout_time: f32,
}

/// One finished frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Producing protocol
    pub origin: FrameOrigin,
    /// Width after binning
    pub width: u32,
    /// Height after binning
    pub height: u32,
    /// Row-major 16-bit samples
    pub pixels: Vec<u16>,
    /// Header metadata
    pub header: FrameHeader,
}

/// Destination for finished frames.
pub trait FrameSink: Send + Sync {
    /// Persist `frame` and return where it went.
    ///
    /// # Errors
    ///
    /// `DaqError::Sink` or `DaqError::Io` if the frame could not be stored.
    fn write(&self, frame: &Frame) -> AppResult<PathBuf>;
}

/// Sink that keeps frames in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: Mutex<Vec<Frame>>,
    attempts: AtomicUsize,
    fail_writes: Vec<usize>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the given 1-based write attempts fail.
    pub fn failing_writes(fail_writes: Vec<usize>) -> Self {
        Self {
            fail_writes,
            ..Self::default()
        }
    }

    /// Frames stored so far.
    pub fn frames(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of frames stored so far.
    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSink for MemorySink {
    fn write(&self, frame: &Frame) -> AppResult<PathBuf> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_writes.contains(&attempt) {
            return Err(DaqError::Sink(format!("write {attempt} rejected")));
        }
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        frames.push(frame.clone());
        Ok(PathBuf::from(format!(
            "memory/{}_{}.fits",
            frame.origin.as_str(),
            frames.len()
        )))
    }
}
