//! Line protocol: parsing and dispatch.
//!
//! One command per line, one terminal reply per command:
//!
//! ```text
//! > expose object 1 20 2 3 g
//! < expose 1,data/20240309/expose_20240309_040506_0001.fits,20.0
//! > series flat 2 10 2 1
//! < seriesSent1 1,2,10.0,data/20240309/series_20240309_040530_0002.fits
//! < seriesSent2 2,2,10.0,data/20240309/series_20240309_040541_0003.fits
//! < series 1,2
//! ```

mod command;
mod dispatcher;

pub use command::{Command, CommandSpec, Rejected, COMMANDS};
pub use dispatcher::Dispatcher;
pub use crate::session::Notifier;
