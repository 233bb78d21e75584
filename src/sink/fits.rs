//! FITS primary-HDU writer and output path allocation.
//!
//! Frames are written as unsigned 16-bit images using the standard BITPIX 16 /
//! BZERO 32768 convention. Header and data units are padded to 2880-byte blocks.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};

use super::{Frame, FrameOrigin, FrameSink};
use crate::config::FitsConfig;
use crate::error::{AppResult, DaqError};

const BLOCK: usize = 2880;
const CARD: usize = 80;

/// Allocates unique, date-partitioned output paths.
///
/// Layout: `<root>/<YYYYMMDD>/<origin>_<YYYYMMDD_HHMMSS>_<seq>.fits`.
#[derive(Debug)]
pub struct PathAllocator {
    root: PathBuf,
    seq: AtomicU32,
}

impl PathAllocator {
    /// Allocator rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seq: AtomicU32::new(0),
        }
    }

    /// Candidate path for a frame taken at `when`. Each call returns a new sequence number.
    pub fn next_path(&self, origin: FrameOrigin, when: DateTime<Utc>) -> PathBuf {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.root
            .join(when.format("%Y%m%d").to_string())
            .join(format!(
                "{}_{}_{:04}.fits",
                origin.as_str(),
                when.format("%Y%m%d_%H%M%S"),
                seq
            ))
    }

    /// Create the directory and a new, empty file for the frame.
    ///
    /// # Errors
    ///
    /// `DaqError::Io` if the directory or file cannot be created.
    pub fn create(&self, origin: FrameOrigin, when: DateTime<Utc>) -> AppResult<(PathBuf, File)> {
        loop {
            let path = self.next_path(origin, when);
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Writes frames as FITS files under the data directory.
#[derive(Debug)]
pub struct FitsSink {
    paths: PathAllocator,
    site: FitsConfig,
}

impl FitsSink {
    /// Sink writing under `data_dir` with the given site metadata.
    pub fn new(data_dir: impl Into<PathBuf>, site: FitsConfig) -> Self {
        Self {
            paths: PathAllocator::new(data_dir),
            site,
        }
    }

    fn header_cards(&self, frame: &Frame) -> Vec<String> {
        let h = &frame.header;
        let mut cards = vec![
            card_logical("SIMPLE", true, "conforms to FITS standard"),
            card_int("BITPIX", 16, "array data type"),
            card_int("NAXIS", 2, "number of array dimensions"),
            card_int("NAXIS1", i64::from(frame.width), ""),
            card_int("NAXIS2", i64::from(frame.height), ""),
            card_int("BZERO", 32768, "offset data range to that of unsigned short"),
            card_int("BSCALE", 1, "default scaling factor"),
            card_str(
                "DATE-OBS",
                &h.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
                "Date at start of exposure",
            ),
            card_str("UT", &h.timestamp.format("%H:%M:%S%.3f").to_string(), "Universal time"),
            card_str("OBSERVAT", &self.site.observatory, "per the iraf list"),
            card_str("IMAGETYP", h.image_type.as_str(), ""),
            card_str("FILTER", h.filter.as_deref().unwrap_or(""), ""),
            card_int("BINX", i64::from(h.binning), "Horizontal binning"),
            card_int("BINY", i64::from(h.binning), "Vertical binning"),
            card_float("EXPTIME", f64::from(h.exposure), "Total exposure time"),
            card_str("ACQMODE", h.acquisition_mode.label(), "Acquisition mode"),
            card_str("READMODE", h.read_mode.label(), "Readout mode"),
            card_str("INSTRUME", &self.site.instrument, "Instrument used for imaging"),
            card_float("LATITUDE", self.site.latitude, "Decimal degrees of MRO latitude"),
            card_float("LONGITUD", self.site.longitude, "Decimal degrees of MRO longitude"),
        ];
        if let Some(temp) = h.temperature {
            cards.push(card_float("TEMP", f64::from(temp), "Temperature"));
        }
        cards.push(card_float(
            "READTIME",
            f64::from(h.readout_time),
            "Pixel readout time",
        ));
        cards.push(format!("{:<80}", "END"));
        cards
    }
}

impl FrameSink for FitsSink {
    fn write(&self, frame: &Frame) -> AppResult<PathBuf> {
        let expected = frame.width as usize * frame.height as usize;
        if frame.pixels.len() != expected {
            return Err(DaqError::Sink(format!(
                "frame has {} pixels, expected {}x{}",
                frame.pixels.len(),
                frame.width,
                frame.height
            )));
        }

        let (path, file) = self.paths.create(frame.origin, frame.header.timestamp)?;
        let mut out = BufWriter::new(file);

        let mut header = String::with_capacity(BLOCK);
        for card in self.header_cards(frame) {
            header.push_str(&card);
        }
        write_padded(&mut out, header.as_bytes(), b' ')?;

        let mut data = Vec::with_capacity(frame.pixels.len() * 2);
        for &pixel in &frame.pixels {
            data.extend_from_slice(&(pixel ^ 0x8000).to_be_bytes());
        }
        write_padded(&mut out, &data, 0)?;
        out.flush()?;

        tracing::debug!(path = %path.display(), width = frame.width, height = frame.height, "wrote FITS frame");
        Ok(path)
    }
}

fn write_padded(out: &mut impl Write, bytes: &[u8], fill: u8) -> std::io::Result<()> {
    out.write_all(bytes)?;
    let rem = bytes.len() % BLOCK;
    if rem != 0 {
        out.write_all(&vec![fill; BLOCK - rem])?;
    }
    Ok(())
}

fn card(keyword: &str, value: &str, comment: &str) -> String {
    let mut card = format!("{keyword:<8}= {value}");
    if !comment.is_empty() {
        card.push_str(" / ");
        card.push_str(comment);
    }
    // Header records are 7-bit printable ASCII.
    let mut card: String = card
        .chars()
        .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { '?' })
        .collect();
    card.truncate(CARD);
    format!("{card:<80}")
}

fn card_logical(keyword: &str, value: bool, comment: &str) -> String {
    card(keyword, &format!("{:>20}", if value { "T" } else { "F" }), comment)
}

fn card_int(keyword: &str, value: i64, comment: &str) -> String {
    card(keyword, &format!("{value:>20}"), comment)
}

fn card_float(keyword: &str, value: f64, comment: &str) -> String {
    card(keyword, &format!("{:>20}", format!("{value:?}")), comment)
}

fn card_str(keyword: &str, value: &str, comment: &str) -> String {
    let quoted = format!("'{:<8}'", value.replace('\'', "''"));
    card(keyword, &format!("{quoted:<20}"), comment)
}
