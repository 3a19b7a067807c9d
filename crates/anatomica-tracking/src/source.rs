//! Landmark sources - adapters around an external skeletal pose tracker
//!
//! A source publishes the latest [`LandmarkFrame`] on a watch channel. Three
//! backends are supported:
//! - `idle`: synthetic upright pose with zero visibility, at a fixed rate
//! - `replay`: JSON-lines recording of landmark sets, looped
//! - `udp`: JSON landmark sets pushed by a tracker process
//!
//! When the configured backend cannot be opened the source falls back to
//! `idle`, so the pipeline always has a well-formed frame and simply reports
//! zero confidence.

use anatomica_core::{LandmarkError, LandmarkSet, TrackingWriter};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Largest datagram accepted from a tracker process
const MAX_DATAGRAM: usize = 16 * 1024;

/// Minimum confidence change written back to the shared state
const CONFIDENCE_EPSILON: f32 = 0.01;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid landmark JSON on line {line}: {source}")]
    JsonError {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid landmark set: {0}")]
    LandmarkError(#[from] LandmarkError),
    #[error("Recording {0} contains no frames")]
    EmptyRecording(PathBuf),
}

/// Which tracker backend feeds the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceKind {
    Idle,
    Replay { path: PathBuf },
    Udp { bind: SocketAddr },
}

impl Default for SourceKind {
    fn default() -> Self {
        Self::Idle
    }
}

/// Source configuration
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Frame rate of the idle and replay backends
    pub fps: u32,
    /// UDP: fall back to an idle frame after this long without data
    pub stale_after: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Idle,
            fps: 30,
            stale_after: Duration::from_secs(1),
        }
    }
}

/// One published tracking frame
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFrame {
    pub landmarks: LandmarkSet,
    /// Mean visibility; 0 for synthetic frames
    pub confidence: f32,
    /// Monotonic frame counter
    pub sequence: u64,
    /// Whether the frame came from a real tracker
    pub live: bool,
}

impl LandmarkFrame {
    pub fn idle(sequence: u64) -> Self {
        Self {
            landmarks: LandmarkSet::idle(),
            confidence: 0.0,
            sequence,
            live: false,
        }
    }

    pub fn live(landmarks: LandmarkSet, sequence: u64) -> Self {
        let confidence = landmarks.confidence();
        Self {
            landmarks,
            confidence,
            sequence,
            live: true,
        }
    }
}

/// Tracker adapter with start/stop lifecycle
pub struct LandmarkSource {
    config: SourceConfig,
    frames_tx: watch::Sender<LandmarkFrame>,
    frames_rx: watch::Receiver<LandmarkFrame>,
    task: Option<JoinHandle<()>>,
    tracking: TrackingWriter,
}

impl LandmarkSource {
    pub fn new(config: SourceConfig, tracking: TrackingWriter) -> Self {
        let (frames_tx, frames_rx) = watch::channel(LandmarkFrame::idle(0));
        Self {
            config,
            frames_tx,
            frames_rx,
            task: None,
            tracking,
        }
    }

    /// Receiver that observes every published frame
    pub fn subscribe(&self) -> watch::Receiver<LandmarkFrame> {
        self.frames_rx.clone()
    }

    pub fn latest(&self) -> LandmarkFrame {
        self.frames_rx.borrow().clone()
    }

    pub fn confidence(&self) -> f32 {
        self.frames_rx.borrow().confidence
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Open the configured backend and start publishing frames.
    ///
    /// Never fails: an unavailable backend degrades to the idle generator.
    pub async fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let fps = self.config.fps.max(1);
        let tx = self.frames_tx.clone();
        let tracking = self.tracking.clone();

        let task = match &self.config.kind {
            SourceKind::Idle => {
                info!(fps = fps, "Starting idle landmark source");
                tokio::spawn(run_idle(tx, fps))
            }
            SourceKind::Replay { path } => match load_recording(path) {
                Ok(frames) => {
                    info!(path = %path.display(), frames = frames.len(), fps = fps, "Starting landmark replay");
                    tokio::spawn(run_replay(tx, tracking, frames, fps))
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Landmark recording unavailable, using idle source");
                    tokio::spawn(run_idle(tx, fps))
                }
            },
            SourceKind::Udp { bind } => match UdpSocket::bind(bind).await {
                Ok(socket) => {
                    info!(bind = %bind, "Listening for tracker landmarks");
                    tokio::spawn(run_udp(tx, tracking, socket, fps, self.config.stale_after))
                }
                Err(e) => {
                    warn!(bind = %bind, error = %e, "Tracker socket unavailable, using idle source");
                    tokio::spawn(run_idle(tx, fps))
                }
            },
        };

        self.task = Some(task);
        self.tracking.set_tracking(true, 0.0);
    }

    /// Stop publishing and release the backend (socket or file handle).
    ///
    /// Returns once the reader task has been dropped, so the backend can be
    /// reopened immediately.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            info!("Landmark source stopped");
        }
        self.tracking.set_tracking(false, 0.0);
    }
}

impl Drop for LandmarkSource {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Parse a JSON-lines recording; each non-empty line is one landmark set
pub fn load_recording(path: &Path) -> Result<Vec<LandmarkSet>, SourceError> {
    let content = std::fs::read_to_string(path)?;
    let mut frames = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let set: LandmarkSet =
            serde_json::from_str(line).map_err(|source| SourceError::JsonError { line: i + 1, source })?;
        frames.push(set);
    }
    if frames.is_empty() {
        return Err(SourceError::EmptyRecording(path.to_path_buf()));
    }
    Ok(frames)
}

fn frame_period(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps as f64)
}

async fn run_idle(tx: watch::Sender<LandmarkFrame>, fps: u32) {
    let mut ticker = interval(frame_period(fps));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sequence = 0u64;
    loop {
        ticker.tick().await;
        sequence += 1;
        if tx.send(LandmarkFrame::idle(sequence)).is_err() {
            break;
        }
    }
}

async fn run_replay(
    tx: watch::Sender<LandmarkFrame>,
    tracking: TrackingWriter,
    frames: Vec<LandmarkSet>,
    fps: u32,
) {
    let mut ticker = interval(frame_period(fps));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sequence = 0u64;
    let mut reported = 0.0f32;
    for set in frames.iter().cycle() {
        ticker.tick().await;
        sequence += 1;
        let frame = LandmarkFrame::live(set.clone(), sequence);
        reported = report_confidence(&tracking, reported, frame.confidence);
        if tx.send(frame).is_err() {
            break;
        }
    }
}

async fn run_udp(
    tx: watch::Sender<LandmarkFrame>,
    tracking: TrackingWriter,
    socket: UdpSocket,
    fps: u32,
    stale_after: Duration,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut sequence = 0u64;
    let mut reported = 0.0f32;
    let idle_period = frame_period(fps);
    let mut last_live = tokio::time::Instant::now();

    loop {
        // Keep ticking with idle frames while the tracker is silent
        match timeout(idle_period, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, peer))) => match serde_json::from_slice::<LandmarkSet>(&buf[..len]) {
                Ok(set) => {
                    sequence += 1;
                    last_live = tokio::time::Instant::now();
                    let frame = LandmarkFrame::live(set, sequence);
                    reported = report_confidence(&tracking, reported, frame.confidence);
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Dropping malformed landmark datagram");
                }
            },
            Ok(Err(e)) => {
                warn!(error = %e, "Tracker socket receive failed");
            }
            Err(_) => {
                if last_live.elapsed() >= stale_after {
                    sequence += 1;
                    reported = report_confidence(&tracking, reported, 0.0);
                    if tx.send(LandmarkFrame::idle(sequence)).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

fn report_confidence(tracking: &TrackingWriter, reported: f32, confidence: f32) -> f32 {
    if (confidence - reported).abs() >= CONFIDENCE_EPSILON {
        tracking.set_confidence(confidence);
        confidence
    } else {
        reported
    }
}
