//! Worker lifecycle: cooperative run flags and a supervisor with bounded joins.
//!
//! Every long-running loop in the daemon runs on its own named thread and polls a
//! [`RunFlag`] once per iteration. Stopping a worker clears its flag, wakes any
//! pacing sleep, and waits at most `stop_timeout` for the thread to finish. A
//! worker that is still blocked in device I/O after the timeout is detached; its
//! handle is discarded and the shutdown carries on.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(300);

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Cooperative cancellation flag shared between a worker and its supervisor.
#[derive(Debug, Clone)]
pub struct RunFlag {
    inner: Arc<RunFlagInner>,
}

#[derive(Debug)]
struct RunFlagInner {
    running: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl RunFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RunFlagInner {
                running: AtomicBool::new(true),
                lock: Mutex::new(()),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Request the worker to stop and wake it if it is sleeping.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.wake.notify_all();
    }

    /// Sleep for `duration` or until stopped. Returns whether still running.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.lock.lock();
        while self.is_running() {
            if self.inner.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_running()
    }

    /// Sleep out the rest of a fixed-rate period that began at `started`.
    ///
    /// Overruns are not caught up; the next period simply starts late.
    pub fn sleep_remaining(&self, started: Instant, period: Duration) -> bool {
        let elapsed = started.elapsed();
        match period.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => self.sleep(remaining),
            _ => self.is_running(),
        }
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// The fixed set of workers owned by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerKind {
    CommandReceive,
    VideoSend,
    CarTask,
    LedConsumer,
    GamepadControl,
    GamepadReader,
    Lidar,
}

/// Order in which [`WorkerSupervisor::stop_all`] winds workers down.
pub const SHUTDOWN_ORDER: [WorkerKind; 7] = [
    WorkerKind::CommandReceive,
    WorkerKind::VideoSend,
    WorkerKind::CarTask,
    WorkerKind::LedConsumer,
    WorkerKind::GamepadControl,
    WorkerKind::GamepadReader,
    WorkerKind::Lidar,
];

impl WorkerKind {
    pub fn name(self) -> &'static str {
        match self {
            WorkerKind::CommandReceive => "cmd-receive",
            WorkerKind::VideoSend => "video-send",
            WorkerKind::CarTask => "car-task",
            WorkerKind::LedConsumer => "led-consumer",
            WorkerKind::GamepadControl => "gamepad-control",
            WorkerKind::GamepadReader => "gamepad-reader",
            WorkerKind::Lidar => "lidar",
        }
    }
}

impl core::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopOutcome {
    NotRunning,
    Joined,
    /// The worker outlived the timeout and was detached.
    TimedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to spawn worker {kind}: {source}")]
    Spawn {
        kind: WorkerKind,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
struct WorkerHandle {
    flag: RunFlag,
    thread: JoinHandle<()>,
}

#[derive(Debug)]
pub struct WorkerSupervisor {
    workers: HashMap<WorkerKind, WorkerHandle>,
    stop_timeout: Duration,
}

impl WorkerSupervisor {
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            workers: HashMap::new(),
            stop_timeout,
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    pub fn is_running(&self, kind: WorkerKind) -> bool {
        self.workers
            .get(&kind)
            .map_or(false, |handle| !handle.thread.is_finished())
    }

    /// Start `kind` unless it is already running.
    ///
    /// Returns `Ok(false)` when the call was a no-op.
    pub fn start<F>(&mut self, kind: WorkerKind, body: F) -> Result<bool, SupervisorError>
    where
        F: FnOnce(RunFlag) + Send + 'static,
    {
        if self.is_running(kind) {
            debug!("Worker {} already running", kind);
            return Ok(false);
        }

        let flag = RunFlag::new();
        let worker_flag = flag.clone();
        let thread = thread::Builder::new()
            .name(kind.name().to_string())
            .spawn(move || body(worker_flag))
            .map_err(|source| SupervisorError::Spawn { kind, source })?;

        self.workers.insert(kind, WorkerHandle { flag, thread });
        info!("Worker {} started", kind);
        Ok(true)
    }

    /// Clear the worker's flag and join it within the stop timeout.
    pub fn stop(&mut self, kind: WorkerKind) -> StopOutcome {
        let Some(handle) = self.workers.remove(&kind) else {
            return StopOutcome::NotRunning;
        };

        handle.flag.stop();

        let deadline = Instant::now() + self.stop_timeout;
        while !handle.thread.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        if handle.thread.is_finished() {
            if handle.thread.join().is_err() {
                warn!("Worker {} panicked before shutdown", kind);
            }
            info!("Worker {} stopped", kind);
            StopOutcome::Joined
        } else {
            warn!(
                "Worker {} did not stop within {:?}, detaching",
                kind, self.stop_timeout
            );
            StopOutcome::TimedOut
        }
    }

    /// Stop every worker in [`SHUTDOWN_ORDER`].
    pub fn stop_all(&mut self) -> Vec<(WorkerKind, StopOutcome)> {
        SHUTDOWN_ORDER
            .iter()
            .map(|&kind| (kind, self.stop(kind)))
            .filter(|(_, outcome)| *outcome != StopOutcome::NotRunning)
            .collect()
    }
}

impl Default for WorkerSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_TIMEOUT)
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        for handle in self.workers.values() {
            handle.flag.stop();
        }
    }
}
