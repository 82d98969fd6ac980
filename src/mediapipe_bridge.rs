// src/mediapipe_bridge.rs - hand landmark frames from the pose estimator
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::depth::DepthRecord;

/// Landmarks per hand in the MediaPipe hand model.
pub const HAND_LANDMARK_COUNT: usize = 21;

/// One hand as reported by the estimator: x,y normalized to [0,1], z relative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandLandmarks {
    pub landmarks: Vec<[f64; 3]>,
}

impl HandLandmarks {
    pub fn new(landmarks: Vec<[f64; 3]>) -> Self {
        Self { landmarks }
    }

    pub fn is_complete(&self) -> bool {
        self.landmarks.len() >= HAND_LANDMARK_COUNT
    }
}

/// Everything the core needs from one camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    /// Seconds since the start of the stream.
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub hands: Vec<HandLandmarks>,
    #[serde(default)]
    pub depth: DepthRecord,
}

/// Source of landmark frames. `Ok(None)` marks the end of the stream.
pub trait LandmarkSource {
    fn next_frame(&mut self) -> Result<Option<LandmarkFrame>>;
}

/// Replays a JSON-lines recording, one `LandmarkFrame` per line.
///
/// Relative depth image paths are resolved against the recording's directory.
pub struct ReplaySource {
    path: PathBuf,
    base_dir: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    line_number: usize,
}

impl ReplaySource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("opening replay {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Ok(Self {
            path,
            base_dir,
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }
}

impl LandmarkSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<LandmarkFrame>> {
        for line in self.lines.by_ref() {
            self.line_number += 1;
            let line = line.with_context(|| format!("reading {}", self.path.display()))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut frame: LandmarkFrame = serde_json::from_str(trimmed).with_context(|| {
                format!("{}:{}: bad landmark frame", self.path.display(), self.line_number)
            })?;
            frame.depth.resolve_relative(&self.base_dir);
            return Ok(Some(frame));
        }
        Ok(None)
    }
}

/// In-memory source, mostly for tests and scripted demos.
pub struct VecSource {
    frames: std::vec::IntoIter<LandmarkFrame>,
}

impl VecSource {
    pub fn new(frames: Vec<LandmarkFrame>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl LandmarkSource for VecSource {
    fn next_frame(&mut self) -> Result<Option<LandmarkFrame>> {
        Ok(self.frames.next())
    }
}
