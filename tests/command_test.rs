//! Camera queries, cooler control and request validation through the dispatcher.

mod common;

use ccd_daq::app;
use ccd_daq::config::Settings;
use ccd_daq::driver::SimulatedCcd;
use common::{fast_ccd, Rig};

#[test]
fn test_status_before_and_after_connect() {
    let rig = Rig::new();
    assert_eq!(rig.send("status"), "status 20075");
    assert_eq!(rig.send("connect"), "connect 20002");
    assert_eq!(rig.send("status"), "status 20073");
    assert!(rig.probe.is_initialized());
}

#[test]
fn test_set_tec_turns_cooler_on_once() {
    let rig = Rig::connected();

    assert_eq!(rig.send("setTEC -40"), "setTEC -40");
    assert_eq!(rig.send("setTEC -60"), "setTEC -60");
    assert_eq!(rig.probe.count("CoolerON"), 1);
    assert_eq!(rig.probe.set_point(), -60);
    assert_eq!(
        rig.dispatcher.session().camera().state().cooler_target,
        Some(-60)
    );

    // Sensor steps 5 degrees per reading from 20 C ambient.
    let reply = rig.send("getTEC");
    assert!(reply.starts_with("getTEC 20037,"), "{reply}");
}

#[test]
fn test_warmup_turns_cooler_off() {
    let rig = Rig::connected();
    rig.send("setTEC -20");

    assert_eq!(rig.send("warmup"), "warmup 1");
    assert!(!rig.probe.cooler_on());
    assert_eq!(rig.dispatcher.session().camera().state().cooler_target, None);
    assert_eq!(rig.send("getTEC"), "getTEC 20034,20.0");
}

#[test]
fn test_temperature_queries() {
    let rig = Rig::connected();
    assert_eq!(rig.send("tempRange"), "tempRange 20002,-100,20");
    assert_eq!(rig.send("temp"), "temp 20034,20.0,0.0,20.0,0.0");
}

#[test]
fn test_temperature_queries_before_connect() {
    let rig = Rig::new();
    assert_eq!(rig.send("tempRange"), "tempRange 20075,0,0");
    assert_eq!(
        rig.send("temp"),
        "temp error driver: GetTemperatureStatus returned 20075"
    );
}

#[test]
fn test_speed_and_timing_queries() {
    let rig = Rig::connected();
    assert_eq!(rig.send("vertStats 2"), "vertStats 5,5,0.9,1,0.5");
    assert_eq!(rig.send("horzStats 0 0 1"), "horzStats 4,3.0");
    assert_eq!(
        rig.send("horzStats 1 0 0"),
        "horzStats error driver: GetNumberHSSpeeds returned 20066"
    );
    assert_eq!(rig.send("timings"), "timings 0.0,0.0,0.0");
}

#[test]
fn test_shutdown_releases_camera() {
    let rig = Rig::connected();
    rig.send("setTEC -30");

    assert_eq!(rig.send("shutdown"), "shutdown 1");
    assert!(!rig.probe.is_initialized());
    assert!(!rig.probe.cooler_on());
    assert_eq!(rig.probe.calls().last().map(String::as_str), Some("ShutDown"));
    assert!(!rig.dispatcher.session().camera().state().initialized);
}

#[test]
fn test_rejected_requests() {
    let rig = Rig::connected();
    assert_eq!(rig.send("focus 3"), "error unknown command 'focus'");
    assert!(rig.send("expose object 1 20").starts_with("expose error parse:"));
    assert!(rig.send("expose galaxy 1 20 1 0").starts_with("expose error parse:"));
    assert!(rig.send("series object 0 20 1 0").starts_with("series error parse:"));
    assert!(rig.send("setTEC cold").starts_with("setTEC error parse:"));
    assert!(rig.sink.is_empty());
    assert_eq!(rig.probe.count("StartAcquisition"), 0);
}

#[test]
fn test_blank_line_has_no_reply() {
    let rig = Rig::new();
    assert_eq!(rig.dispatcher.dispatch("   ", &|_: &str| {}), None);
}

#[test]
fn test_expose_writes_fits_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.storage.data_dir = dir.path().to_path_buf();
    settings.camera.poll_interval_ms = 5;
    let dispatcher = app::dispatcher_with(&settings, Box::new(SimulatedCcd::new(fast_ccd())));

    assert_eq!(dispatcher.dispatch("connect", &|_: &str| {}).as_deref(), Some("connect 20002"));
    let reply = dispatcher
        .dispatch("expose object 1 5 1 0 r", &|_: &str| {})
        .unwrap_or_default();

    let fields: Vec<&str> = reply
        .strip_prefix("expose ")
        .unwrap()
        .split(',')
        .collect();
    assert_eq!(fields[0], "1");
    assert_eq!(fields[2], "5.0");
    let path = std::path::Path::new(fields[1]);
    assert!(path.starts_with(dir.path()));
    assert!(path.file_name().unwrap().to_string_lossy().starts_with("expose_"));

    let bytes = std::fs::read(path).unwrap();
    assert_eq!(bytes.len() % 2880, 0);
    let header = String::from_utf8_lossy(&bytes[..2880]);
    assert!(header.starts_with("SIMPLE  ="));
    assert!(header.contains("FILTER  = 'r"));
    assert!(header.contains("IMAGETYP= 'object"));
}

#[test]
fn test_non_ascii_filter_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.storage.data_dir = dir.path().to_path_buf();
    settings.camera.poll_interval_ms = 5;
    let dispatcher = app::dispatcher_with(&settings, Box::new(SimulatedCcd::new(fast_ccd())));
    dispatcher.dispatch("connect", &|_: &str| {});

    let filter = "\u{e9}".repeat(40);
    let reply = dispatcher
        .dispatch(&format!("expose object 1 0 1 0 {filter}"), &|_: &str| {})
        .unwrap_or_default();
    assert_eq!(
        reply,
        format!("expose error parse: filter name '{filter}' must be printable ASCII")
    );
    assert!(!dispatcher.session().is_busy());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    let reply = dispatcher
        .dispatch("expose object 1 0 1 0 Halpha", &|_: &str| {})
        .unwrap_or_default();
    assert!(reply.starts_with("expose 1,"), "{reply}");
}
