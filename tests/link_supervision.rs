use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use proximity_warner::config::{FocalLength, LinkSettings, ProximityConfig};
use proximity_warner::{
    AlertLevel, AlertTransmitter, BoundingBox, CaptureDevice, Detection, Frame, FrameSource,
    Health, LinkState, LinkSupervisor, Pipeline, ScriptedBackend, SimulatedLink,
};

fn frame(sequence: u64) -> Frame {
    Frame::new(vec![0; 3], 1, 1, sequence)
}

/// Opens fine but never delivers a frame.
struct BlindCamera;

impl CaptureDevice for BlindCamera {
    fn describe(&self) -> String {
        "blind".to_string()
    }

    fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn capture(&mut self) -> anyhow::Result<Frame> {
        std::thread::sleep(Duration::from_millis(10));
        Err(anyhow!("lens covered"))
    }
}

#[test]
fn supervisor_recovers_after_peer_returns() {
    let settings = LinkSettings::default();
    let link = SimulatedLink::new(settings.peer_address.clone(), true);
    let peer = link.peer();
    let mut supervisor = LinkSupervisor::new(Box::new(link), &settings);
    let transmitter = AlertTransmitter::new(settings.characteristic_uuid.clone());

    let mut handle = supervisor.connect_until_ready(&AtomicBool::new(false));
    assert!(handle.is_some());
    assert_eq!(transmitter.dispatch(AlertLevel::Yellow, &mut handle), Some(2));

    peer.set_in_range(false);
    assert_eq!(transmitter.dispatch(AlertLevel::Red, &mut handle), None);
    assert!(handle.is_none());
    assert_eq!(supervisor.check_health(&mut handle), Health::NotReady);
    assert_eq!(supervisor.state(), LinkState::Disconnected);

    peer.set_in_range(true);
    assert_eq!(supervisor.check_health(&mut handle), Health::NotReady);
    assert_eq!(supervisor.state(), LinkState::Connected);
    assert_eq!(supervisor.check_health(&mut handle), Health::Ready);
    assert_eq!(transmitter.dispatch(AlertLevel::Red, &mut handle), Some(1));

    // GREEN prime, YELLOW, GREEN prime after reconnect, RED.
    assert_eq!(peer.written_bytes(), vec![3, 2, 3, 1]);
}

#[test]
fn pipeline_reconnects_on_health_cadence() {
    let mut cfg = ProximityConfig::with_focal_length(FocalLength::new(800.0).unwrap());
    cfg.estimation.window_size = 2;
    cfg.link.connect_attempts = Some(1);
    cfg.link.health_interval = Duration::from_millis(5_000);

    let link = SimulatedLink::new(cfg.link.peer_address.clone(), false);
    let peer = link.peer();
    let mut pipeline = Pipeline::new(&cfg, Box::new(link));
    assert!(!pipeline.connect(&AtomicBool::new(false)));

    let mut detector = ScriptedBackend::repeating(vec![Detection::new(
        "side_view_car",
        BoundingBox::new(0.0, 0.0, 200.0, 80.0),
        0.95,
    )]);
    pipeline.process_frame(&frame(1), &mut detector);
    let dropped = pipeline.process_frame(&frame(2), &mut detector).unwrap();
    assert_eq!(dropped.level, AlertLevel::Red);
    assert_eq!(dropped.sent, None);

    peer.set_in_range(true);
    // Too early: the check is not due yet.
    pipeline.poll_link(Instant::now());
    assert!(!pipeline.is_linked());

    pipeline.poll_link(Instant::now() + Duration::from_millis(5_001));
    assert!(pipeline.is_linked());

    pipeline.process_frame(&frame(3), &mut detector);
    let sent = pipeline.process_frame(&frame(4), &mut detector).unwrap();
    assert_eq!(sent.sent, Some(1));
    assert_eq!(pipeline.stats().alerts_dropped, 1);
    assert_eq!(pipeline.stats().alerts_sent, 1);
    assert_eq!(peer.written_bytes(), vec![3, 1]);
}

#[test]
fn connect_without_peer_does_not_panic_and_is_retriable() {
    let settings = LinkSettings::default();
    let link = SimulatedLink::new(settings.peer_address.clone(), false);
    let mut supervisor = LinkSupervisor::new(Box::new(link), &settings);
    for _ in 0..5 {
        assert!(supervisor.connect().is_err());
        assert_eq!(supervisor.state(), LinkState::Disconnected);
    }
}

#[test]
fn health_checks_run_while_no_frame_arrives() {
    let mut cfg = ProximityConfig::with_focal_length(FocalLength::new(800.0).unwrap());
    cfg.link.connect_attempts = Some(1);
    cfg.link.health_interval = Duration::from_millis(50);

    let link = SimulatedLink::new(cfg.link.peer_address.clone(), false);
    let peer = link.peer();
    let mut pipeline = Pipeline::new(&cfg, Box::new(link));
    let mut source = FrameSource::start(BlindCamera).unwrap();
    let mut detector = ScriptedBackend::new(Vec::new());

    let shutdown = Arc::new(AtomicBool::new(false));
    let stopper = {
        let shutdown = Arc::clone(&shutdown);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(500));
            shutdown.store(true, Ordering::SeqCst);
        })
    };
    let stats = pipeline.run(&mut source, &mut detector, &shutdown).unwrap();
    stopper.join().unwrap();

    assert_eq!(stats.frames_processed, 0);
    // One startup attempt, then roughly one check per 50 ms.
    assert!(peer.scans() > 2, "only {} scans", peer.scans());
    assert_eq!(pipeline.link_state(), LinkState::Disconnected);
}
