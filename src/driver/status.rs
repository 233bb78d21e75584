//! Vendor status codes returned by every driver call.
//!
//! The acquisition SDK answers each call with a numeric code. `20002` is the
//! success sentinel; everything else is either a device state (idle, acquiring,
//! cooler state) or an error. Codes are kept numeric on the wire because clients
//! already understand them.

use std::fmt;

/// Numeric status code reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Unspecified error.
    pub const ERROR_CODES: Self = Self(20001);
    /// Call succeeded.
    pub const SUCCESS: Self = Self(20002);
    /// Kernel driver missing.
    pub const VXD_NOT_INSTALLED: Self = Self(20003);
    /// Configuration file could not be loaded.
    pub const ERROR_FILELOAD: Self = Self(20006);
    /// Device did not acknowledge.
    pub const ERROR_ACK: Self = Self(20013);
    /// Acquisition buffer problem.
    pub const ACQ_BUFFER: Self = Self(20018);
    /// Kinetic cycle time could not be met.
    pub const KINETIC_TIME_NOT_MET: Self = Self(20022);
    /// No new frame is available.
    pub const NO_NEW_DATA: Self = Self(20024);
    /// Cooler is switched off.
    pub const TEMPERATURE_OFF: Self = Self(20034);
    /// Set point reached but not yet stable.
    pub const TEMPERATURE_NOT_STABILIZED: Self = Self(20035);
    /// Set point reached and stable.
    pub const TEMPERATURE_STABILIZED: Self = Self(20036);
    /// Cooler is running towards the set point.
    pub const TEMPERATURE_NOT_REACHED: Self = Self(20037);
    /// Temperature outside the supported range.
    pub const TEMPERATURE_OUT_RANGE: Self = Self(20038);
    /// Detector has no temperature control.
    pub const TEMPERATURE_NOT_SUPPORTED: Self = Self(20039);
    /// Was stable, now drifting.
    pub const TEMPERATURE_DRIFT: Self = Self(20040);
    /// First parameter invalid.
    pub const P1_INVALID: Self = Self(20066);
    /// Second parameter invalid.
    pub const P2_INVALID: Self = Self(20067);
    /// Third parameter invalid.
    pub const P3_INVALID: Self = Self(20068);
    /// Fourth parameter invalid.
    pub const P4_INVALID: Self = Self(20069);
    /// Error reading the detector ini file.
    pub const INI_ERROR: Self = Self(20070);
    /// Acquisition in progress.
    pub const ACQUIRING: Self = Self(20072);
    /// Device idle.
    pub const IDLE: Self = Self(20073);
    /// Device is executing a temperature cycle.
    pub const TEMP_CYCLE: Self = Self(20074);
    /// `Initialize` has not been called, or failed.
    pub const NOT_INITIALIZED: Self = Self(20075);
    /// Mode not valid for this call.
    pub const INVALID_MODE: Self = Self(20078);
    /// I2C device not found.
    pub const I2C_DEV_NOT_FOUND: Self = Self(20081);
    /// I2C bus timeout.
    pub const I2C_TIMEOUT: Self = Self(20082);
    /// No camera attached.
    pub const ERROR_NOCAMERA: Self = Self(20990);
    /// Feature not supported by this detector.
    pub const NOT_SUPPORTED: Self = Self(20991);

    /// Whether this is the success sentinel.
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Raw numeric value.
    pub fn code(self) -> u32 {
        self.0
    }

    /// Symbolic name, if the code is known.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::ERROR_CODES => "DRV_ERROR_CODES",
            Self::SUCCESS => "DRV_SUCCESS",
            Self::VXD_NOT_INSTALLED => "DRV_VXDNOTINSTALLED",
            Self::ERROR_FILELOAD => "DRV_ERROR_FILELOAD",
            Self::ERROR_ACK => "DRV_ERROR_ACK",
            Self::ACQ_BUFFER => "DRV_ACQ_BUFFER",
            Self::KINETIC_TIME_NOT_MET => "DRV_KINETIC_TIME_NOT_MET",
            Self::NO_NEW_DATA => "DRV_NO_NEW_DATA",
            Self::TEMPERATURE_OFF => "DRV_TEMPERATURE_OFF",
            Self::TEMPERATURE_NOT_STABILIZED => "DRV_TEMPERATURE_NOT_STABILIZED",
            Self::TEMPERATURE_STABILIZED => "DRV_TEMPERATURE_STABILIZED",
            Self::TEMPERATURE_NOT_REACHED => "DRV_TEMPERATURE_NOT_REACHED",
            Self::TEMPERATURE_OUT_RANGE => "DRV_TEMPERATURE_OUT_RANGE",
            Self::TEMPERATURE_NOT_SUPPORTED => "DRV_TEMPERATURE_NOT_SUPPORTED",
            Self::TEMPERATURE_DRIFT => "DRV_TEMPERATURE_DRIFT",
            Self::P1_INVALID => "DRV_P1INVALID",
            Self::P2_INVALID => "DRV_P2INVALID",
            Self::P3_INVALID => "DRV_P3INVALID",
            Self::P4_INVALID => "DRV_P4INVALID",
            Self::INI_ERROR => "DRV_INIERROR",
            Self::ACQUIRING => "DRV_ACQUIRING",
            Self::IDLE => "DRV_IDLE",
            Self::TEMP_CYCLE => "DRV_TEMPCYCLE",
            Self::NOT_INITIALIZED => "DRV_NOT_INITIALIZED",
            Self::INVALID_MODE => "DRV_INVALID_MODE",
            Self::I2C_DEV_NOT_FOUND => "DRV_I2CDEVNOTFOUND",
            Self::I2C_TIMEOUT => "DRV_I2CTIMEOUT",
            Self::ERROR_NOCAMERA => "DRV_ERROR_NOCAMERA",
            Self::NOT_SUPPORTED => "DRV_NOT_SUPPORTED",
            _ => return None,
        };
        Some(name)
    }

    /// Human readable cooler state for the temperature codes.
    pub fn cooler_state_name(self) -> Option<&'static str> {
        match self {
            Self::TEMPERATURE_OFF => Some("Off"),
            Self::TEMPERATURE_NOT_STABILIZED => Some("NotStabilized"),
            Self::TEMPERATURE_STABILIZED => Some("Stabilized"),
            Self::TEMPERATURE_NOT_REACHED => Some("NotReached"),
            Self::TEMPERATURE_OUT_RANGE => Some("OutOfRange"),
            Self::TEMPERATURE_NOT_SUPPORTED => Some("NotSupported"),
            Self::TEMPERATURE_DRIFT => Some("WasStableNowDrifting"),
            _ => None,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StatusCode {}

/// Outcome of a single driver call.
pub type DriverResult<T> = Result<T, StatusCode>;

/// Collapse a driver result back into the raw code the SDK would have returned.
pub fn code_of<T>(result: &DriverResult<T>) -> StatusCode {
    match result {
        Ok(_) => StatusCode::SUCCESS,
        Err(code) => *code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_sentinel() {
        assert!(StatusCode::SUCCESS.is_success());
        assert!(!StatusCode::IDLE.is_success());
        assert_eq!(StatusCode::SUCCESS.to_string(), "20002");
    }

    #[test]
    fn test_names() {
        assert_eq!(StatusCode(20075).name(), Some("DRV_NOT_INITIALIZED"));
        assert_eq!(StatusCode(12345).name(), None);
        assert_eq!(StatusCode::TEMPERATURE_OFF.cooler_state_name(), Some("Off"));
        assert_eq!(StatusCode::IDLE.cooler_state_name(), None);
    }

    #[test]
    fn test_code_of() {
        let ok: DriverResult<u32> = Ok(3);
        let err: DriverResult<u32> = Err(StatusCode::P1_INVALID);
        assert_eq!(code_of(&ok), StatusCode::SUCCESS);
        assert_eq!(code_of(&err), StatusCode::P1_INVALID);
    }
}
