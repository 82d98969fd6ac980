// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Calibration and configuration failures.
///
/// Region files tolerate per-record failures (they are logged and skipped);
/// a missing or unreadable thresholds file aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("depth threshold file not found: {0}")]
    MissingThresholds(PathBuf),
    #[error("key region '{key}' has {count} points, expected 4")]
    BadPointCount { key: String, count: usize },
    #[error("key region record is malformed: {0}")]
    MalformedRegion(String),
    #[error("depth range for '{key}' is empty: [{min}, {max})")]
    BadRange { key: String, min: f32, max: f32 },
}

/// Per-frame sensor gaps. Never fatal: the affected finger is skipped for the frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("no hands detected")]
    NoHands,
    #[error("no depth data at ({x}, {y})")]
    NoDepth { x: u32, y: u32 },
    #[error("implausible depth {depth:.3}m at ({x}, {y})")]
    ImplausibleDepth { x: u32, y: u32, depth: f32 },
}

/// Failures of the OS keystroke backend. Logged and dropped by the dispatcher.
#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("no keycode for key '{0}'")]
    Unmapped(String),
    #[error("injection backend failed: {0}")]
    Backend(String),
}
