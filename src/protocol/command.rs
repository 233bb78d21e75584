//! Request line parsing.
//!
//! A line is split on whitespace. The first token selects an entry of [`COMMANDS`],
//! which carries the accepted argument count; the remaining tokens are converted into a
//! typed [`Command`].

use std::str::FromStr;

use crate::error::DaqError;
use crate::session::{ExposureRequest, ImageType};

/// Parsed request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start-up sequence
    Connect,
    /// Device status code
    Status,
    /// Temperature readings
    Temp,
    /// Supported set point range
    TempRange,
    /// Cooler on (if off) and new set point
    SetTec(i32),
    /// Cooler state and sensor temperature
    GetTec,
    /// Cooler off, fan full, set point 0
    Warmup,
    /// Warm up and power down
    Shutdown,
    /// Current acquisition timings
    Timings,
    /// Vertical shift speed diagnostics for an index
    VertStats(i32),
    /// Horizontal shift speed diagnostics
    HorzStats {
        /// AD channel
        channel: i32,
        /// Amplifier type
        amp_type: i32,
        /// Speed index
        index: i32,
    },
    /// Stop the running acquisition
    Abort,
    /// Single exposure
    Expose(ExposureRequest),
    /// Run-till-abort stream
    Real(ExposureRequest),
    /// Kinetic series
    Series(ExposureRequest),
}

/// Name and arity of one command.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// First token of the line
    pub name: &'static str,
    /// Fewest arguments accepted
    pub min_args: usize,
    /// Most arguments accepted
    pub max_args: usize,
}

const fn spec(name: &'static str, min_args: usize, max_args: usize) -> CommandSpec {
    CommandSpec {
        name,
        min_args,
        max_args,
    }
}

/// Every command the server understands.
pub const COMMANDS: &[CommandSpec] = &[
    spec("connect", 0, 0),
    spec("status", 0, 0),
    spec("temp", 0, 0),
    spec("tempRange", 0, 0),
    spec("setTEC", 1, 1),
    spec("getTEC", 0, 0),
    spec("warmup", 0, 0),
    spec("shutdown", 0, 0),
    spec("timings", 0, 0),
    spec("vertStats", 1, 1),
    spec("horzStats", 3, 3),
    spec("abort", 0, 0),
    spec("expose", 5, 6),
    spec("real", 4, 4),
    spec("series", 5, 6),
];

/// A line that could not be turned into a command.
#[derive(Debug)]
pub struct Rejected {
    /// Command name, when the first token was recognised
    pub command: Option<&'static str>,
    /// Reason
    pub error: DaqError,
}

impl Rejected {
    /// Reply line for this rejection.
    pub fn reply(&self) -> String {
        match self.command {
            Some(name) => format!("{name} error {}", self.error),
            None => format!("error {}", self.error),
        }
    }
}

impl Command {
    /// Parse one request line. Blank lines yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// `Rejected` carrying `DaqError::UnknownCommand` or `DaqError::Parse`.
    pub fn parse(line: &str) -> Result<Option<Command>, Rejected> {
        let mut tokens = line.split_whitespace();
        let Some(head) = tokens.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = tokens.collect();

        let Some(spec) = COMMANDS.iter().find(|spec| spec.name == head) else {
            return Err(Rejected {
                command: None,
                error: DaqError::UnknownCommand(head.to_string()),
            });
        };
        let reject = |error: DaqError| Rejected {
            command: Some(spec.name),
            error,
        };

        if args.len() < spec.min_args || args.len() > spec.max_args {
            let expected = if spec.min_args == spec.max_args {
                spec.min_args.to_string()
            } else {
                format!("{} to {}", spec.min_args, spec.max_args)
            };
            return Err(reject(DaqError::Parse(format!(
                "expected {expected} arguments, got {}",
                args.len()
            ))));
        }

        Self::build(spec.name, &args).map(Some).map_err(reject)
    }

    fn build(name: &str, args: &[&str]) -> Result<Command, DaqError> {
        let command = match name {
            "connect" => Command::Connect,
            "status" => Command::Status,
            "temp" => Command::Temp,
            "tempRange" => Command::TempRange,
            "setTEC" => Command::SetTec(arg(args, 0, "set point")?),
            "getTEC" => Command::GetTec,
            "warmup" => Command::Warmup,
            "shutdown" => Command::Shutdown,
            "timings" => Command::Timings,
            "vertStats" => Command::VertStats(arg(args, 0, "index")?),
            "horzStats" => Command::HorzStats {
                channel: arg(args, 0, "channel")?,
                amp_type: arg(args, 1, "type")?,
                index: arg(args, 2, "index")?,
            },
            "abort" => Command::Abort,
            "expose" => Command::Expose(exposure(args, true)?),
            "real" => Command::Real(exposure(args, false)?),
            "series" => Command::Series(exposure(args, true)?),
            other => return Err(DaqError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    /// Name of the command, as used in reply lines.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect => "connect",
            Command::Status => "status",
            Command::Temp => "temp",
            Command::TempRange => "tempRange",
            Command::SetTec(_) => "setTEC",
            Command::GetTec => "getTEC",
            Command::Warmup => "warmup",
            Command::Shutdown => "shutdown",
            Command::Timings => "timings",
            Command::VertStats(_) => "vertStats",
            Command::HorzStats { .. } => "horzStats",
            Command::Abort => "abort",
            Command::Expose(_) => "expose",
            Command::Real(_) => "real",
            Command::Series(_) => "series",
        }
    }
}

fn arg<T: FromStr>(args: &[&str], position: usize, what: &str) -> Result<T, DaqError> {
    let token = args
        .get(position)
        .ok_or_else(|| DaqError::Parse(format!("missing {what}")))?;
    token
        .parse()
        .map_err(|_| DaqError::Parse(format!("invalid {what} '{token}'")))
}

/// `<type> <count> <itime> <bin> [<readout> [<filter>]]`
fn exposure(args: &[&str], with_readout: bool) -> Result<ExposureRequest, DaqError> {
    let image_type: ImageType = args
        .first()
        .ok_or_else(|| DaqError::Parse("missing image type".to_string()))?
        .parse()?;
    let itime = arg(args, 2, "integration time")?;
    let binning = arg(args, 3, "binning")?;
    // `real` runs until aborted; its count field is positional only.
    let (count, readout, filter) = if with_readout {
        (
            arg(args, 1, "exposure count")?,
            arg(args, 4, "readout index")?,
            args.get(5).map(|f| (*f).to_string()),
        )
    } else {
        (1, 0, None)
    };
    ExposureRequest::new(image_type, count, itime, binning, readout, filter)
}
