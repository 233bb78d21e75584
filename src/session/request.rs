//! Validated exposure parameters.

use std::fmt;
use std::str::FromStr;

use crate::error::{AppResult, DaqError};

/// Kind of frame being taken. Decides the shutter policy and the IMAGETYP card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    /// Zero-second dark frame
    Bias,
    /// Illuminated calibration frame
    Flat,
    /// Science frame
    Object,
    /// Shutter-closed frame with integration time
    Dark,
    /// Anything else; taken dark
    Other,
}

impl ImageType {
    /// Protocol token for this type.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageType::Bias => "bias",
            ImageType::Flat => "flat",
            ImageType::Object => "object",
            ImageType::Dark => "dark",
            ImageType::Other => "other",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageType {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bias" => Ok(ImageType::Bias),
            "flat" => Ok(ImageType::Flat),
            "object" => Ok(ImageType::Object),
            "dark" => Ok(ImageType::Dark),
            "other" => Ok(ImageType::Other),
            _ => Err(DaqError::Parse(format!("unknown image type '{s}'"))),
        }
    }
}

/// Longest filter name that fits a FITS string value.
pub const MAX_FILTER_LEN: usize = 68;

/// One accepted exposure command. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureRequest {
    image_type: ImageType,
    exposure_count: u32,
    integration_time: f32,
    binning: u32,
    readout_index: i32,
    filter: Option<String>,
}

impl ExposureRequest {
    /// Validate and build a request.
    ///
    /// # Errors
    ///
    /// `DaqError::Parse` if the count or binning is zero, the integration time is
    /// negative or not finite, or the readout index is negative.
    pub fn new(
        image_type: ImageType,
        exposure_count: u32,
        integration_time: f32,
        binning: u32,
        readout_index: i32,
        filter: Option<String>,
    ) -> AppResult<Self> {
        if exposure_count == 0 {
            return Err(DaqError::Parse("exposure count must be >= 1".to_string()));
        }
        if !integration_time.is_finite() || integration_time < 0.0 {
            return Err(DaqError::Parse(format!(
                "integration time {integration_time} must be a non-negative number"
            )));
        }
        if binning == 0 {
            return Err(DaqError::Parse("binning must be >= 1".to_string()));
        }
        if readout_index < 0 {
            return Err(DaqError::Parse(format!(
                "readout index {readout_index} cannot be negative"
            )));
        }
        let filter = filter.filter(|f| !f.is_empty());
        if let Some(name) = &filter {
            if !name.bytes().all(|b| b.is_ascii_graphic()) {
                return Err(DaqError::Parse(format!(
                    "filter name '{name}' must be printable ASCII"
                )));
            }
            if name.len() > MAX_FILTER_LEN {
                return Err(DaqError::Parse(format!(
                    "filter name longer than {MAX_FILTER_LEN} characters"
                )));
            }
        }
        Ok(Self {
            image_type,
            exposure_count,
            integration_time,
            binning,
            readout_index,
            filter,
        })
    }

    /// Kind of frame.
    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    /// Frames requested (series length).
    pub fn exposure_count(&self) -> u32 {
        self.exposure_count
    }

    /// Requested integration time in seconds.
    pub fn integration_time(&self) -> f32 {
        self.integration_time
    }

    /// Exposure time actually programmed; bias frames are always zero.
    pub fn programmed_exposure(&self) -> f32 {
        if self.image_type == ImageType::Bias {
            0.0
        } else {
            self.integration_time
        }
    }

    /// Symmetric on-chip binning.
    pub fn binning(&self) -> u32 {
        self.binning
    }

    /// Horizontal readout speed index.
    pub fn readout_index(&self) -> i32 {
        self.readout_index
    }

    /// Filter name for the FILTER card.
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }
}
