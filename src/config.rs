// src/config.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::tracking::Finger;

pub const CONFIG_FILE: &str = "tapboard.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TapboardConfig {
    pub filter: FilterConfig,
    pub tracking: TrackingConfig,
    pub touch: TouchConfig,
    pub dispatch: DispatchConfig,
    pub calibration: CalibrationPaths,
    pub session: SessionConfig,
}

/// One-euro parameters shared by every fingertip axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub min_cutoff: f64,
    pub beta: f64,
    pub d_cutoff: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_cutoff: 4.5,
            beta: 1.5,
            d_cutoff: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackingConfig {
    pub max_hands: usize,
    pub fingers: Vec<Finger>,
    /// Depth readings at or beyond this are treated as no observation.
    pub max_valid_depth: f32,
    /// Consecutive empty frames a hand slot tolerates before its filters reset.
    pub filter_reset_after_missed: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_hands: 2,
            fingers: Finger::ALL.to_vec(),
            max_valid_depth: 5.0,
            filter_reset_after_missed: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Fire on release with lift velocity.
    TouchTap,
    /// Fire the moment a key is entered at touching depth.
    DepthCrossing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContactPolicy {
    /// One key down system-wide.
    Single,
    /// One key per (hand, finger).
    Multi,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TouchConfig {
    pub mode: DetectionMode,
    pub contact: ContactPolicy,
    /// m/s. Lifting toward the camera is negative; a tap needs velocity below this.
    pub tap_velocity_threshold: f32,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::TouchTap,
            contact: ContactPolicy::Single,
            tap_velocity_threshold: -0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTarget {
    Text,
    Os,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    pub target: DispatchTarget,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            target: DispatchTarget::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationPaths {
    pub regions: PathBuf,
    pub thresholds: PathBuf,
}

impl Default for CalibrationPaths {
    fn default() -> Self {
        Self {
            regions: PathBuf::from("assets/keyboard_annotations.json"),
            thresholds: PathBuf::from("assets/depth_thresholds.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub record: bool,
    pub output_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            record: false,
            output_dir: directories::UserDirs::new()
                .and_then(|dirs| dirs.document_dir().map(|p| p.join("Tapboard")))
                .unwrap_or_else(|| PathBuf::from("./output")),
        }
    }
}

impl TapboardConfig {
    /// Loads config from a specified path.
    /// Returns default config if file doesn't exist.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = TapboardConfig::default();
        assert_eq!(config.filter.min_cutoff, 4.5);
        assert_eq!(config.filter.beta, 1.5);
        assert_eq!(config.tracking.max_hands, 2);
        assert_eq!(config.tracking.fingers.len(), 5);
        assert_eq!(config.touch.mode, DetectionMode::TouchTap);
        assert_eq!(config.touch.contact, ContactPolicy::Single);
        assert!(config.touch.tap_velocity_threshold < 0.0);
        assert_eq!(config.dispatch.target, DispatchTarget::Text);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = TapboardConfig::load_from(dir.path().join("nope.json")).unwrap();
        assert_eq!(config, TapboardConfig::default());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tapboard.json");
        fs::write(
            &path,
            r#"{ "touch": { "mode": "depth_crossing", "contact": "multi" },
                 "tracking": { "fingers": ["index"] } }"#,
        )
        .unwrap();

        let config = TapboardConfig::load_from(&path).unwrap();
        assert_eq!(config.touch.mode, DetectionMode::DepthCrossing);
        assert_eq!(config.touch.contact, ContactPolicy::Multi);
        assert_eq!(config.touch.tap_velocity_threshold, -0.1);
        assert_eq!(config.tracking.fingers, vec![Finger::Index]);
        assert_eq!(config.tracking.max_hands, 2);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("tapboard.json");
        let mut config = TapboardConfig::default();
        config.dispatch.target = DispatchTarget::Os;
        config.filter.beta = 0.5;
        config.save_to(&path).unwrap();

        let loaded = TapboardConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_malformed_json_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tapboard.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(TapboardConfig::load_from(&path).is_err());
    }
}
