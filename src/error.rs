//! Custom error types for the application.
//!
//! `DaqError` is the single error type of the crate. Every dispatch path turns it into a
//! reply line, so the `Display` text of the client-facing variants doubles as the wire
//! format after the `<command> error ` prefix.
//!
//! - **`Parse`** / **`UnknownCommand`**: a request line that could not be turned into a command.
//! - **`SessionBusy`**: an acquisition already owns the camera.
//! - **`FrameFetch`** / **`AcquisitionTimeout`**: a frame could not be retrieved.
//! - **`DriverFatal`**: the driver refused a call the operation cannot proceed without.
//! - **`Sink`** / **`Io`**: persisting a frame failed.
//! - **`Config`** / **`Configuration`**: loading or validating settings failed.
//!
//! Non-fatal driver setup failures are not errors; see [`crate::session::SetupWarning`].

use std::time::Duration;

use thiserror::Error;

use crate::driver::StatusCode;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("parse: {0}")]
    Parse(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("session busy: an acquisition is already running")]
    SessionBusy,

    #[error("frame fetch: {call} returned {code}")]
    FrameFetch { call: &'static str, code: StatusCode },

    #[error("acquisition timeout: no frame within {0:?}")]
    AcquisitionTimeout(Duration),

    #[error("driver: {call} returned {code}")]
    DriverFatal { call: &'static str, code: StatusCode },

    #[error("sink: {0}")]
    Sink(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl DaqError {
    /// Whether the error comes from a rejected request rather than from the hardware.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            DaqError::Parse(_) | DaqError::UnknownCommand(_) | DaqError::SessionBusy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::DriverFatal {
            call: "GetStatus",
            code: StatusCode::NOT_INITIALIZED,
        };
        assert_eq!(err.to_string(), "driver: GetStatus returned 20075");
        assert_eq!(
            DaqError::UnknownCommand("frobnicate".into()).to_string(),
            "unknown command 'frobnicate'"
        );
    }

    #[test]
    fn test_request_errors() {
        assert!(DaqError::SessionBusy.is_request_error());
        assert!(DaqError::Parse("bad".into()).is_request_error());
        assert!(!DaqError::Sink("disk full".into()).is_request_error());
    }
}
