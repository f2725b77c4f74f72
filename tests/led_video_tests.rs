use crossbeam_channel::unbounded;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tankd::hardware::{SimulatedCamera, SimulatedLedStrip, StripLog};
use tankd::led::*;
use tankd::supervisor::RunFlag;
use tankd::video::*;

fn consumer() -> (crossbeam_channel::Sender<LedCommand>, LedConsumer, StripLog) {
    let strip = SimulatedLedStrip::new(4);
    let log = strip.log();
    let renderer = LedRenderer::new(strip.into_shared(), LedTiming::instant());
    let (tx, rx) = unbounded();
    (tx, LedConsumer::new(rx, renderer), log)
}

#[test]
fn test_solid_pattern_uses_mask() {
    let (tx, mut consumer, log) = consumer();
    tx.send(LedCommand::new(1, Rgb::RED, 0b0101)).unwrap();

    assert!(consumer.poll_once(&RunFlag::new()));
    assert_eq!(log.shown(), vec![Rgb::RED, Rgb::OFF, Rgb::RED, Rgb::OFF]);
}

#[test]
fn test_off_and_unknown_modes_darken_the_strip() {
    let (tx, mut consumer, log) = consumer();
    let flag = RunFlag::new();

    tx.send(LedCommand::new(1, Rgb::BLUE, 0x0f)).unwrap();
    consumer.poll_once(&flag);
    assert!(!log.is_dark());

    tx.send(LedCommand::off()).unwrap();
    assert!(consumer.poll_once(&flag));
    assert!(log.is_dark());

    tx.send(LedCommand::new(1, Rgb::BLUE, 0x0f)).unwrap();
    consumer.poll_once(&flag);
    tx.send(LedCommand::new(42, Rgb::BLUE, 0x0f)).unwrap();
    consumer.poll_once(&flag);
    assert!(log.is_dark());
}

#[test]
fn test_idle_strip_is_cleared_once() {
    let (_tx, mut consumer, log) = consumer();
    let flag = RunFlag::new();

    for _ in 0..3 {
        assert!(consumer.poll_once(&flag));
    }
    assert_eq!(log.frames(), 1);
}

#[test]
fn test_queue_is_drained_before_rendering() {
    let (tx, mut consumer, log) = consumer();
    let flag = RunFlag::new();
    let wipe = LedCommand::new(2, Rgb::OFF, 0);
    let solid = LedCommand::new(1, Rgb::GREEN, 0x0f);
    tx.send(wipe).unwrap();
    tx.send(solid).unwrap();

    consumer.poll_once(&flag);
    assert_eq!(consumer.current(), solid);
    // Only the solid frame was drawn, the stale wipe never ran
    assert_eq!(log.frames(), 1);
    assert_eq!(log.shown(), vec![Rgb::GREEN; 4]);

    // No new command: keep the last one
    consumer.poll_once(&flag);
    assert_eq!(consumer.current(), solid);
}

#[test]
fn test_wipe_runs_a_full_pass_and_ends_dark() {
    let (tx, mut consumer, log) = consumer();
    tx.send(LedCommand::new(2, Rgb::OFF, 0)).unwrap();

    consumer.poll_once(&RunFlag::new());
    // Four colours, one frame per pixel
    assert_eq!(log.frames(), 16);
    assert!(log.is_dark());
}

#[test]
fn test_rainbow_and_breathe_frame_counts() {
    let strip = SimulatedLedStrip::new(8);
    let log = strip.log();
    let renderer = LedRenderer::new(strip.into_shared(), LedTiming::instant());
    let flag = RunFlag::new();

    assert_eq!(renderer.render(&LedCommand::new(5, Rgb::OFF, 0), &flag), Ok(true));
    assert_eq!(log.frames(), 64);

    assert_eq!(renderer.render(&LedCommand::new(4, Rgb::GREEN, 0), &flag), Ok(true));
    // 0..=255 step 5, up then down
    assert_eq!(log.frames(), 64 + 52 + 52);
    assert!(log.is_dark());
}

#[test]
fn test_stopped_flag_ends_pattern_at_frame_boundary() {
    let strip = SimulatedLedStrip::new(4);
    let log = strip.log();
    let renderer = LedRenderer::new(strip.into_shared(), LedTiming::instant());
    let flag = RunFlag::new();
    flag.stop();

    assert_eq!(renderer.render(&LedCommand::new(2, Rgb::OFF, 0), &flag), Ok(false));
    assert_eq!(log.frames(), 1);
}

#[test]
fn test_consumer_exits_when_queue_closes() {
    let (tx, mut consumer, _log) = consumer();
    drop(tx);
    assert!(!consumer.poll_once(&RunFlag::new()));
}

#[test]
fn test_run_turns_strip_off_on_stop() {
    let (tx, consumer, log) = consumer();
    let flag = RunFlag::new();
    let worker_flag = flag.clone();
    let handle = thread::spawn(move || consumer.run(worker_flag));

    tx.send(LedCommand::new(1, Rgb::RED, 0x0f)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while log.is_dark() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(!log.is_dark());

    flag.stop();
    handle.join().unwrap();
    assert!(log.is_dark());
}

#[test]
fn test_write_frame_layout() {
    let mut out = Vec::new();
    write_frame(&mut out, &[0xAA, 0xBB, 0xCC]).unwrap();
    assert_eq!(out, vec![3, 0, 0, 0, 0xAA, 0xBB, 0xCC]);

    let mut out = Vec::new();
    write_frame(&mut out, &[]).unwrap();
    assert_eq!(out, vec![0, 0, 0, 0]);
}

/// Accepts up to `limit` bytes, then fails like a reset socket.
#[derive(Clone)]
struct CappedWriter {
    written: Arc<Mutex<Vec<u8>>>,
    limit: usize,
}

impl CappedWriter {
    fn new(limit: usize) -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
            limit,
        }
    }
}

impl Write for CappedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = self.written.lock();
        if written.len() + buf.len() > self.limit {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer gone"));
        }
        written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// "P6\n8 8\n255\n" plus 8x8 RGB
const SIM_FRAME_LEN: usize = 11 + 8 * 8 * 3;

#[test]
fn test_stream_ends_on_write_failure() {
    let camera = SimulatedCamera::new().into_shared();
    let (_clients_tx, clients_rx) = unbounded();
    let worker = VideoWorker::new(clients_rx, Arc::clone(&camera));

    let client = CappedWriter::new((4 + SIM_FRAME_LEN) * 3);
    let written = Arc::clone(&client.written);
    let mut pending = None;

    let (end, frames) = worker.stream(Box::new(client), &RunFlag::new(), &mut pending);
    assert_eq!(end, StreamEnd::WriteFailed);
    assert_eq!(frames, 3);

    let bytes = written.lock();
    assert_eq!(&bytes[..4], &(SIM_FRAME_LEN as u32).to_le_bytes());
    assert_eq!(&bytes[4..6], b"P6");

    // Camera is released when the stream ends
    assert!(camera.lock().capture().is_err());
}

#[test]
fn test_newer_client_replaces_current_stream() {
    let camera = SimulatedCamera::new().into_shared();
    let (clients_tx, clients_rx) = unbounded::<VideoClient>();
    let worker = VideoWorker::new(clients_rx, camera);

    clients_tx.send(Box::new(io::sink())).unwrap();
    let mut pending = None;
    let (end, _) = worker.stream(Box::new(io::sink()), &RunFlag::new(), &mut pending);

    assert_eq!(end, StreamEnd::Replaced);
    assert!(pending.is_some());
}

#[test]
fn test_stream_stops_with_worker() {
    let camera = SimulatedCamera::new().into_shared();
    let (_clients_tx, clients_rx) = unbounded();
    let worker = VideoWorker::new(clients_rx, camera);
    let flag = RunFlag::new();
    flag.stop();

    let mut pending = None;
    let (end, frames) = worker.stream(Box::new(io::sink()), &flag, &mut pending);
    assert_eq!(end, StreamEnd::Stopped);
    assert_eq!(frames, 0);
}
