// src/tracking.rs - fingertip tracking: pixel conversion, filtering, depth lookup
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::{FilterConfig, TrackingConfig};
use crate::depth::DepthSource;
use crate::error::SensorError;
use crate::filter::PixelFilter;
use crate::mediapipe_bridge::{HandLandmarks, LandmarkFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    /// Tip index in the MediaPipe hand landmark layout.
    pub fn tip_landmark(self) -> usize {
        match self {
            Finger::Thumb => 4,
            Finger::Index => 8,
            Finger::Middle => 12,
            Finger::Ring => 16,
            Finger::Pinky => 20,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Finger::Thumb => "thumb",
            Finger::Index => "index",
            Finger::Middle => "middle",
            Finger::Ring => "ring",
            Finger::Pinky => "pinky",
        }
    }
}

impl fmt::Display for Finger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A hand slot and finger. Slots are positions in the estimator's hand list, not identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FingerId {
    pub hand: usize,
    pub finger: Finger,
}

impl FingerId {
    pub fn new(hand: usize, finger: Finger) -> Self {
        Self { hand, finger }
    }
}

impl fmt::Display for FingerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hand{}/{}", self.hand, self.finger)
    }
}

/// One fingertip in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerObservation {
    pub id: FingerId,
    pub timestamp: f64,
    /// Filtered position used for hit-testing.
    pub position: Point2<i32>,
    /// Clamped, unfiltered position the depth was read at.
    pub raw_position: Point2<u32>,
    /// Unfiltered depth in meters, or why there is none this frame.
    pub depth: Result<f32, SensorError>,
}

impl FingerObservation {
    pub fn valid_depth(&self) -> Option<f32> {
        self.depth.as_ref().ok().copied()
    }
}

#[derive(Debug, Clone)]
pub struct TrackedPoint {
    filter: PixelFilter,
    pub position: Option<Point2<i32>>,
    pub depth: Option<f32>,
}

impl TrackedPoint {
    fn new(config: &FilterConfig) -> Self {
        Self {
            filter: PixelFilter::from_config(config),
            position: None,
            depth: None,
        }
    }
}

/// Normalized coordinate to a pixel index clamped into `[0, dim - 1]`.
pub fn to_pixel(normalized: f64, dim: u32) -> u32 {
    if dim == 0 {
        return 0;
    }
    let pixel = (normalized * dim as f64) as i64;
    pixel.clamp(0, dim as i64 - 1) as u32
}

/// Validates a raw depth reading: positive and closer than `max_valid_depth`.
pub fn check_depth(depth: f32, x: u32, y: u32, max_valid_depth: f32) -> Result<f32, SensorError> {
    if !(depth > 0.0) {
        return Err(SensorError::NoDepth { x, y });
    }
    if !depth.is_finite() || depth >= max_valid_depth {
        return Err(SensorError::ImplausibleDepth { x, y, depth });
    }
    Ok(depth)
}

/// Owns the per-(hand slot, finger) filter arena.
pub struct FingertipTracker {
    config: TrackingConfig,
    filter_config: FilterConfig,
    points: HashMap<FingerId, TrackedPoint>,
    missed_frames: HashMap<usize, u32>,
}

impl FingertipTracker {
    pub fn new(config: TrackingConfig, filter_config: FilterConfig) -> Self {
        Self {
            config,
            filter_config,
            points: HashMap::new(),
            missed_frames: HashMap::new(),
        }
    }

    /// Converts, filters and depth-samples every tracked fingertip of the frame.
    ///
    /// Fingers of hands absent from the frame produce no observation. A slot absent
    /// for more than `filter_reset_after_missed` frames loses its filter state.
    pub fn observe(&mut self, frame: &LandmarkFrame, depth: &dyn DepthSource) -> Vec<FingerObservation> {
        let mut observations = Vec::new();
        let mut present = Vec::new();
        let fingers = self.config.fingers.clone();

        for (slot, hand) in frame.hands.iter().enumerate().take(self.config.max_hands) {
            if !hand.is_complete() {
                tracing::trace!(slot, landmarks = hand.landmarks.len(), "incomplete hand skipped");
                continue;
            }
            present.push(slot);
            for finger in fingers.iter().copied() {
                let id = FingerId::new(slot, finger);
                observations.push(self.observe_finger(id, hand, frame, depth));
            }
        }

        self.age_slots(&present);
        observations
    }

    fn observe_finger(
        &mut self,
        id: FingerId,
        hand: &HandLandmarks,
        frame: &LandmarkFrame,
        depth: &dyn DepthSource,
    ) -> FingerObservation {
        let [nx, ny, _] = hand.landmarks[id.finger.tip_landmark()];
        let raw_x = to_pixel(nx, frame.width);
        let raw_y = to_pixel(ny, frame.height);

        let reading = check_depth(
            depth.depth_at(raw_x, raw_y),
            raw_x,
            raw_y,
            self.config.max_valid_depth,
        );
        if let Err(e) = &reading {
            tracing::trace!(finger = %id, "{e}");
        }

        let filter_config = self.filter_config;
        let point = self
            .points
            .entry(id)
            .or_insert_with(|| TrackedPoint::new(&filter_config));
        let (fx, fy) = point
            .filter
            .filter((raw_x as f64, raw_y as f64), frame.timestamp);
        let position = Point2::new(fx.round() as i32, fy.round() as i32);
        point.position = Some(position);
        point.depth = reading.as_ref().ok().copied();

        FingerObservation {
            id,
            timestamp: frame.timestamp,
            position,
            raw_position: Point2::new(raw_x, raw_y),
            depth: reading,
        }
    }

    fn age_slots(&mut self, present: &[usize]) {
        for slot in 0..self.config.max_hands {
            if present.contains(&slot) {
                self.missed_frames.insert(slot, 0);
                continue;
            }
            let missed = self.missed_frames.entry(slot).or_insert(0);
            *missed = missed.saturating_add(1);
            if *missed > self.config.filter_reset_after_missed {
                let before = self.points.len();
                self.points.retain(|id, _| id.hand != slot);
                if self.points.len() != before {
                    tracing::debug!(slot, "hand slot empty, filter state reset");
                }
            }
        }
    }

    pub fn point(&self, id: FingerId) -> Option<&TrackedPoint> {
        self.points.get(&id)
    }
}
