//! End-to-end exposure protocols against the simulated detector.

mod common;

use std::thread;
use std::time::Duration;

use ccd_daq::camera::CameraState;
use ccd_daq::config::CameraConfig;
use ccd_daq::driver::{AcquisitionMode, SimulatedCcdConfig};
use ccd_daq::session::{ExposureRequest, ImageType, SessionMode, SessionPhase};
use ccd_daq::sink::{FrameOrigin, MemorySink};
use common::{fast_camera, fast_ccd, Collector, Rig};

#[test]
fn test_single_object_exposure() {
    let rig = Rig::connected();

    let reply = rig.send("expose object 1 20 2 3 g");
    assert_eq!(reply, "expose 1,memory/expose_1.fits,20.0");

    let frames = rig.sink.frames();
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame.origin, FrameOrigin::Expose);
    assert_eq!((frame.width, frame.height), (8, 8));
    assert_eq!(frame.pixels.len(), 64);
    assert_eq!(frame.header.filter.as_deref(), Some("g"));
    assert_eq!(frame.header.binning, 2);
    assert_eq!(frame.header.exposure, 20.0);
    assert_eq!(frame.header.acquisition_mode, AcquisitionMode::SingleScan);

    let calls = rig.probe.calls();
    for expected in [
        "SetReadMode(4)",
        "SetAcquisitionMode(1)",
        "SetImage(2,2,1,16,1,16)",
        "SetShutter(1,0,5,5)",
        "SetExposureTime(20)",
        "SetHSSpeed(0,3)",
        "StartAcquisition",
        "GetAcquiredData16",
    ] {
        assert!(calls.iter().any(|c| c == expected), "missing {expected} in {calls:?}");
    }
    assert_eq!(rig.probe.count("GetAcquiredData16"), 1);
    assert_eq!(rig.dispatcher.session().phase(), SessionPhase::Completed);
    assert!(!rig.dispatcher.session().is_busy());
}

#[test]
fn test_bias_reports_driver_exposure() {
    let rig = Rig::connected();

    let reply = rig.send("expose bias 1 3 1 0");
    assert_eq!(reply, "expose 1,memory/expose_1.fits,0.0");
    assert!(rig.probe.calls().iter().any(|c| c == "SetExposureTime(0)"));
    assert!(rig.probe.calls().iter().any(|c| c == "SetShutter(1,2,0,0)"));
    assert_eq!(rig.sink.frames()[0].header.exposure, 0.0);
}

#[test]
fn test_expose_before_connect_is_rejected() {
    let rig = Rig::new();
    assert_eq!(
        rig.send("expose object 1 1 1 0"),
        "expose error driver: GetStatus returned 20075"
    );
    assert_eq!(rig.probe.count("SetReadMode"), 0);
    assert!(rig.sink.is_empty());
}

#[test]
fn test_series_sends_every_frame() {
    let rig = Rig::connected();
    let lines = Collector::default();

    let reply = rig.spawn("series flat 5 10 2 1", &lines).join().unwrap();
    assert_eq!(reply.as_deref(), Some("series 1,5"));

    let expected: Vec<String> = (1..=5)
        .map(|n| format!("seriesSent{n} {n},5,10.0,memory/series_{n}.fits"))
        .collect();
    assert_eq!(lines.lines(), expected);
    assert_eq!(rig.probe.fetched_indices(), vec![1, 2, 3, 4, 5]);
    assert_eq!(rig.probe.count("GetMostRecentImage16"), 5);
    assert!(rig.probe.calls().iter().any(|c| c == "SetNumberKinetics(5)"));
    assert!(rig.probe.calls().iter().any(|c| c == "SetAcquisitionMode(3)"));
    assert!(rig.probe.calls().iter().any(|c| c == "SetHSSpeed(0,1)"));
    assert!(rig.sink.frames().iter().all(|f| f.width == 8 && f.origin == FrameOrigin::Series));
    assert_eq!(rig.dispatcher.session().phase(), SessionPhase::Completed);
}

#[test]
fn test_series_skips_failed_fetch() {
    let rig = Rig::connected_with(
        SimulatedCcdConfig {
            fail_fetches: vec![2],
            ..fast_ccd()
        },
        fast_camera(),
        MemorySink::new(),
    );
    let lines = Collector::default();

    let reply = rig.spawn("series object 3 10 1 0", &lines).join().unwrap();
    assert_eq!(reply.as_deref(), Some("series 1,2"));
    assert_eq!(
        lines.lines(),
        vec![
            "seriesSent1 1,3,10.0,memory/series_1.fits",
            "seriesSent2 2,3,10.0,memory/series_2.fits",
        ]
    );
    assert_eq!(rig.probe.fetched_indices(), vec![1, 2, 3]);
}

#[test]
fn test_single_fetch_failure() {
    let rig = Rig::connected_with(
        SimulatedCcdConfig {
            fail_fetches: vec![1],
            ..fast_ccd()
        },
        fast_camera(),
        MemorySink::new(),
    );

    assert_eq!(rig.send("expose dark 1 5 1 0"), "expose 0,None,5.0");
    assert_eq!(rig.dispatcher.session().phase(), SessionPhase::Failed);
    assert!(rig.sink.is_empty());
}

#[test]
fn test_sink_failure_fails_single() {
    let rig = Rig::connected_with(fast_ccd(), fast_camera(), MemorySink::failing_writes(vec![1]));
    assert_eq!(rig.send("expose object 1 5 1 0"), "expose 0,None,5.0");
    assert_eq!(rig.send("expose object 1 5 1 0"), "expose 1,memory/expose_1.fits,5.0");
}

#[test]
fn test_abort_stops_streaming() {
    let rig = Rig::connected();
    let lines = Collector::default();

    let running = rig.spawn("real object 1 10 1", &lines);
    common::wait_for(|| lines.len() >= 2);

    assert_eq!(rig.send("abort"), "abort 1");
    let sent_before_ack = lines.len();

    assert_eq!(running.join().unwrap().as_deref(), Some("real 1"));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(lines.len(), sent_before_ack);
    for (i, line) in lines.lines().iter().enumerate() {
        assert_eq!(line, &format!("realSent memory/real_{}.fits", i + 1));
    }
    assert_eq!(rig.dispatcher.session().phase(), SessionPhase::Aborted);
    assert!(rig.probe.calls().iter().any(|c| c == "SetAcquisitionMode(5)"));
    assert!(rig.probe.calls().iter().any(|c| c == "SetHSSpeed(0,1)"));
    assert!(!rig.probe.is_acquiring());
}

#[test]
fn test_streaming_survives_index_wrap() {
    let rig = Rig::connected();
    let lines = Collector::default();

    let running = rig.spawn("real object 1 10 1", &lines);
    // Progress wraps to 0 after four frames.
    common::wait_for(|| lines.len() >= 6);
    rig.send("abort");
    assert_eq!(running.join().unwrap().as_deref(), Some("real 1"));
    assert!(rig.probe.fetched_indices().len() >= 6);
}

#[test]
fn test_abort_with_nothing_running() {
    let rig = Rig::connected();
    let before: CameraState = rig.dispatcher.session().camera().state();

    assert_eq!(rig.send("abort"), "abort 1");
    assert_eq!(rig.probe.count("AbortAcquisition"), 1);
    assert_eq!(rig.dispatcher.session().camera().state(), before);
    assert_eq!(rig.dispatcher.session().phase(), SessionPhase::Idle);
}

#[test]
fn test_busy_session_rejects_without_driver_calls() {
    let rig = Rig::connected();
    let lines = Collector::default();

    let running = rig.spawn("series object 50 10 1 0", &lines);
    common::wait_for(|| rig.probe.count("StartAcquisition") == 1);
    let setup_calls = rig.probe.count("SetReadMode");

    assert_eq!(
        rig.send("expose object 1 1 1 0"),
        "expose error session busy: an acquisition is already running"
    );
    assert_eq!(
        rig.send("setTEC -40"),
        "setTEC error session busy: an acquisition is already running"
    );
    assert_eq!(rig.probe.count("SetReadMode"), setup_calls);
    assert_eq!(rig.probe.count("SetTemperature"), 1);

    assert_eq!(rig.send("abort"), "abort 1");
    let reply = running.join().unwrap().unwrap_or_default();
    assert!(reply.starts_with("series 1,"), "{reply}");
    assert_eq!(rig.dispatcher.session().phase(), SessionPhase::Aborted);
}

#[test]
fn test_wedged_acquisition_times_out() {
    let rig = Rig::connected_with(
        SimulatedCcdConfig {
            wedged: true,
            ..fast_ccd()
        },
        CameraConfig {
            max_frame_wait_secs: Some(0.1),
            ..fast_camera()
        },
        MemorySink::new(),
    );

    assert_eq!(rig.send("expose object 1 0 1 0"), "expose 0,None,0.0");
    assert_eq!(rig.dispatcher.session().phase(), SessionPhase::Failed);
    assert!(rig.probe.count("AbortAcquisition") >= 1);
    assert!(!rig.probe.is_acquiring());
    assert!(!rig.dispatcher.session().is_busy());
}

#[test]
fn test_next_session_after_abort() {
    let rig = Rig::connected();
    let lines = Collector::default();

    let running = rig.spawn("real object 1 10 1", &lines);
    common::wait_for(|| lines.len() >= 1);
    rig.send("abort");
    running.join().unwrap();

    let streamed = rig.sink.len();
    assert_eq!(
        rig.send("expose object 1 5 1 0"),
        format!("expose 1,memory/expose_{}.fits,5.0", streamed + 1)
    );
    assert_eq!(rig.dispatcher.session().phase(), SessionPhase::Completed);
}

#[test]
fn test_series_counts_frames_missed_between_polls() {
    // 10 ms frames polled every 35 ms
    let rig = Rig::connected_with(
        fast_ccd(),
        CameraConfig {
            poll_interval_ms: 35,
            ..fast_camera()
        },
        MemorySink::new(),
    );
    let lines = Collector::default();
    let request = ExposureRequest::new(ImageType::Flat, 20, 1.0, 1, 0, None).unwrap();

    let outcome = rig
        .dispatcher
        .session()
        .run(SessionMode::Series, &request, &lines)
        .unwrap();

    assert_eq!(outcome.phase, SessionPhase::Completed);
    assert!(outcome.success);
    assert!(outcome.frames_missed > 0, "{outcome:?}");
    assert!(outcome.frames_written < 20);
    assert_eq!(outcome.frames_written + outcome.frames_missed, 20);
    assert_eq!(lines.len(), outcome.frames_written as usize);
    assert_eq!(rig.probe.fetched_indices().len(), outcome.frames_written as usize);
}

#[test]
fn test_second_expose_leaves_running_setup_alone() {
    let rig = Rig::connected();
    let lines = Collector::default();

    let running = rig.spawn("expose object 1 20 2 3", &lines);
    common::wait_for(|| rig.probe.count("StartAcquisition") == 1);
    let programmed = (rig.probe.exposure(), rig.probe.binning(), rig.probe.hs_index());
    assert_eq!(programmed, (20.0, 2, 3));

    assert_eq!(
        rig.send("expose dark 1 5 1 0"),
        "expose error session busy: an acquisition is already running"
    );
    assert_eq!(
        (rig.probe.exposure(), rig.probe.binning(), rig.probe.hs_index()),
        programmed
    );

    assert_eq!(
        running.join().unwrap().as_deref(),
        Some("expose 1,memory/expose_1.fits,20.0")
    );
    assert_eq!(rig.sink.frames()[0].header.binning, 2);
    assert_eq!(rig.probe.count("StartAcquisition"), 1);
}
