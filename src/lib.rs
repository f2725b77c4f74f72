//! # tankd
//!
//! Onboard control daemon for a teleoperated tracked robot. Motion requests
//! arrive concurrently from a TCP command channel and a USB gamepad, pass
//! through a LiDAR-fed safety arbiter, and reach the actuators through a single
//! router. Every producer and consumer runs as a supervised worker with a
//! cooperative stop flag and a bounded join.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tankd::config::DaemonConfig;
//! use tankd::daemon::{Daemon, Hardware};
//!
//! # async fn run() -> Result<(), tankd::daemon::DaemonError> {
//! let mut daemon = Daemon::new(DaemonConfig::default(), Hardware::simulated())?;
//! daemon.bind_transport().await?;
//! daemon.start_workers()?;
//! // ... wait for a shutdown signal ...
//! daemon.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - `#`-separated wire lines and replies
//! - [`mode`] - operating-mode state machine
//! - [`state`] - shared ranging, gamepad, mode and wheel-speed cells
//! - [`arbiter`] - forward-motion limiting from the latest ranging sample
//! - [`router`] - capability check, arbitration and dispatch
//! - [`lidar`] - TF-Mini-S ingestion with a consecutive-failure fail-safe
//! - [`gamepad`] - controller discovery, normalization and the 50 Hz control loop
//! - [`led`], [`video`], [`car_task`] - simple dedicated loops
//! - [`supervisor`] - worker start/stop with bounded joins
//! - [`net`] - tokio TCP transport
//! - [`daemon`] - wiring and ordered shutdown

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod arbiter;
pub mod car_task;
pub mod config;
pub mod daemon;
pub mod gamepad;
pub mod hardware;
pub mod led;
pub mod lidar;
pub mod mode;
pub mod net;
pub mod protocol;
pub mod router;
pub mod state;
pub mod supervisor;
pub mod video;

pub use arbiter::{arbitrate, MotorCommand, RangingReading, RangingSample};
pub use daemon::{Daemon, Hardware};
pub use mode::CarMode;
pub use protocol::Command;
pub use router::CommandRouter;
pub use state::SharedState;
