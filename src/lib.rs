//! Core library for the ccd_daq server.
//!
//! Drives a cooled scientific CCD through a synchronous vendor driver facade and
//! exposes it over a newline-delimited TCP protocol. The pieces, leaves first:
//!
//! - [`driver`]: the driver facade and a simulated detector
//! - [`sink`]: frame persistence (FITS)
//! - [`camera`]: start-up, cooler and diagnostic operations
//! - [`session`]: the exposure state machine (single, streaming, series)
//! - [`protocol`]: command parsing and dispatch
//! - [`server`]: connection handling and reply broadcast

pub mod app;
pub mod camera;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;
pub mod sink;
