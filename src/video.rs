//! Length-prefixed video streaming.
//!
//! Each frame goes out as a 4-byte little-endian length followed by the encoded
//! frame. A write failure ends the stream; the next client attachment starts a
//! new one.

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::io::{self, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::hardware::SharedCamera;
use crate::supervisor::RunFlag;

pub type VideoClient = Box<dyn Write + Send>;

const ATTACH_POLL: Duration = Duration::from_millis(100);

pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame larger than 4 GiB"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    WriteFailed,
    CaptureFailed,
    /// A newer client attached and takes over the stream.
    Replaced,
    Stopped,
}

pub struct VideoWorker {
    clients: Receiver<VideoClient>,
    camera: SharedCamera,
    frame_pause: Duration,
}

impl VideoWorker {
    pub fn new(clients: Receiver<VideoClient>, camera: SharedCamera) -> Self {
        Self {
            clients,
            camera,
            frame_pause: Duration::ZERO,
        }
    }

    /// Pause between frames, for capture sources that return immediately.
    pub fn with_frame_pause(mut self, frame_pause: Duration) -> Self {
        self.frame_pause = frame_pause;
        self
    }

    pub fn run(self, flag: RunFlag) {
        info!("Video worker running");
        let mut pending: Option<VideoClient> = None;

        while flag.is_running() {
            let client = match pending.take() {
                Some(client) => client,
                None => match self.clients.recv_timeout(ATTACH_POLL) {
                    Ok(client) => client,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };

            let (end, frames) = self.stream(client, &flag, &mut pending);
            info!("Video stream ended after {} frames: {:?}", frames, end);
        }
        info!("Video worker stopped");
    }

    /// Stream to one client until it fails, is replaced, or the worker stops.
    pub fn stream(
        &self,
        mut client: VideoClient,
        flag: &RunFlag,
        replacement: &mut Option<VideoClient>,
    ) -> (StreamEnd, u64) {
        if let Err(e) = self.camera.lock().start() {
            warn!("Camera failed to start: {}", e);
            return (StreamEnd::CaptureFailed, 0);
        }

        let mut frames = 0u64;
        let end = loop {
            if !flag.is_running() {
                break StreamEnd::Stopped;
            }
            match self.clients.try_recv() {
                Ok(newer) => {
                    *replacement = Some(newer);
                    break StreamEnd::Replaced;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }

            let frame = self.camera.lock().capture();
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Frame capture failed: {}", e);
                    break StreamEnd::CaptureFailed;
                }
            };

            if let Err(e) = write_frame(&mut client, &frame) {
                debug!("Video client write failed: {}", e);
                break StreamEnd::WriteFailed;
            }
            frames += 1;

            if !self.frame_pause.is_zero() {
                flag.sleep(self.frame_pause);
            }
        };

        self.camera.lock().stop();
        (end, frames)
    }
}
