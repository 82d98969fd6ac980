// src/depth.rs - depth lookup for aligned depth frames
use anyhow::{Context, Result};
use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Meters per z16 unit on the D405 (0.1 mm).
pub const DEFAULT_DEPTH_SCALE: f32 = 0.0001;

/// Depth at a pixel of the depth frame aligned to the color frame.
///
/// Returns meters; 0.0 means the sensor has no reading there.
pub trait DepthSource {
    fn depth_at(&self, x: u32, y: u32) -> f32;
}

impl<F> DepthSource for F
where
    F: Fn(u32, u32) -> f32,
{
    fn depth_at(&self, x: u32, y: u32) -> f32 {
        self(x, y)
    }
}

/// No depth data anywhere.
pub struct NoDepth;

impl DepthSource for NoDepth {
    fn depth_at(&self, _x: u32, _y: u32) -> f32 {
        0.0
    }
}

/// 16-bit depth image with a per-unit scale, as delivered by z16 streams.
pub struct DepthImage {
    pixels: ImageBuffer<Luma<u16>, Vec<u16>>,
    scale: f32,
}

impl DepthImage {
    pub fn new(pixels: ImageBuffer<Luma<u16>, Vec<u16>>, scale: f32) -> Self {
        Self { pixels, scale }
    }

    pub fn open(path: impl AsRef<Path>, scale: f32) -> Result<Self> {
        let path = path.as_ref();
        let pixels = image::open(path)
            .with_context(|| format!("loading depth image {}", path.display()))?
            .into_luma16();
        Ok(Self::new(pixels, scale))
    }
}

impl DepthSource for DepthImage {
    fn depth_at(&self, x: u32, y: u32) -> f32 {
        if x >= self.pixels.width() || y >= self.pixels.height() {
            return 0.0;
        }
        let Luma([raw]) = *self.pixels.get_pixel(x, y);
        raw as f32 * self.scale
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthSample {
    pub x: u32,
    pub y: u32,
    pub meters: f32,
}

/// A handful of depth readings, e.g. at recorded fingertips.
///
/// A lookup returns the nearest sample within `radius` pixels (Chebyshev distance).
pub struct SparseDepth {
    samples: HashMap<(u32, u32), f32>,
    radius: u32,
}

impl SparseDepth {
    pub fn new(samples: &[DepthSample], radius: u32) -> Self {
        Self {
            samples: samples.iter().map(|s| ((s.x, s.y), s.meters)).collect(),
            radius,
        }
    }
}

impl DepthSource for SparseDepth {
    fn depth_at(&self, x: u32, y: u32) -> f32 {
        if let Some(depth) = self.samples.get(&(x, y)) {
            return *depth;
        }
        if self.radius == 0 {
            return 0.0;
        }
        self.samples
            .iter()
            .map(|(&(sx, sy), &depth)| (sx.abs_diff(x).max(sy.abs_diff(y)), depth))
            .filter(|(dist, _)| *dist <= self.radius)
            .min_by_key(|(dist, _)| *dist)
            .map(|(_, depth)| depth)
            .unwrap_or(0.0)
    }
}

fn default_scale() -> f32 {
    DEFAULT_DEPTH_SCALE
}

/// How a recorded frame carries its depth.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthRecord {
    #[default]
    None,
    Image {
        path: PathBuf,
        #[serde(default = "default_scale")]
        scale: f32,
    },
    Samples {
        #[serde(default)]
        radius: u32,
        points: Vec<DepthSample>,
    },
}

impl DepthRecord {
    pub(crate) fn resolve_relative(&mut self, base_dir: &Path) {
        if let DepthRecord::Image { path, .. } = self {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }

    /// Materializes the record into something the pipeline can query.
    pub fn load(&self) -> Result<Box<dyn DepthSource>> {
        Ok(match self {
            DepthRecord::None => Box::new(NoDepth),
            DepthRecord::Image { path, scale } => Box::new(DepthImage::open(path, *scale)?),
            DepthRecord::Samples { radius, points } => Box::new(SparseDepth::new(points, *radius)),
        })
    }
}
