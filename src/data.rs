// src/data.rs
use anyhow::{Context, Result};
use chrono::Local;
use csv::Writer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::touch::{TouchEvent, TouchStateMachine};
use crate::tracking::FingerObservation;

#[derive(Debug, Clone, Serialize)]
struct ObservationRecord {
    timestamp: f64,
    frame: u64,
    hand: usize,
    finger: String,
    x: i32,
    y: i32,
    raw_x: u32,
    raw_y: u32,
    depth: Option<f32>,
    sensor_error: Option<String>,
    active_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct EventRecord {
    timestamp: f64,
    frame: u64,
    hand: usize,
    finger: String,
    event: String,
    key: String,
}

/// Buffers a session's observations and events, then writes them out as CSV.
pub struct SessionRecorder {
    output_dir: PathBuf,
    session_name: String,
    observations: Vec<ObservationRecord>,
    events: Vec<EventRecord>,
    frames: u64,
}

impl SessionRecorder {
    pub fn new(output_dir: impl AsRef<Path>, session_name: Option<String>) -> Self {
        let session_name = session_name.unwrap_or_else(|| {
            format!("session_{}", Local::now().format("%Y%m%d_%H%M%S"))
        });

        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            session_name,
            observations: Vec::new(),
            events: Vec::new(),
            frames: 0,
        }
    }

    pub fn session_dir(&self) -> PathBuf {
        self.output_dir.join(&self.session_name)
    }

    /// Records one processed frame. `touch` is read after the frame was applied.
    pub fn add_frame(
        &mut self,
        frame: u64,
        observations: &[FingerObservation],
        events: &[TouchEvent],
        touch: &TouchStateMachine,
    ) {
        self.frames = self.frames.max(frame + 1);
        for obs in observations {
            self.observations.push(ObservationRecord {
                timestamp: obs.timestamp,
                frame,
                hand: obs.id.hand,
                finger: obs.id.finger.name().to_string(),
                x: obs.position.x,
                y: obs.position.y,
                raw_x: obs.raw_position.x,
                raw_y: obs.raw_position.y,
                depth: obs.valid_depth(),
                sensor_error: obs.depth.as_ref().err().map(|e| e.to_string()),
                active_key: touch.contact(obs.id).map(|c| c.key.clone()),
            });
        }
        for event in events {
            self.events.push(EventRecord {
                timestamp: event.timestamp,
                frame,
                hand: event.finger.hand,
                finger: event.finger.finger.name().to_string(),
                event: event.event.kind().to_string(),
                key: event.event.key().to_string(),
            });
        }
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Writes `observations.csv` and `events.csv` into the session directory.
    pub fn export_csv(&self) -> Result<PathBuf> {
        let dir = self.session_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating session directory {}", dir.display()))?;

        write_records(&dir.join("observations.csv"), &self.observations)?;
        write_records(&dir.join("events.csv"), &self.events)?;
        Ok(dir)
    }

    pub fn generate_report(&self) -> Result<PathBuf> {
        let report_path = self.session_dir().join("report.html");
        if let Some(parent) = report_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&report_path, self.create_html_report())?;
        Ok(report_path)
    }

    fn create_html_report(&self) -> String {
        let with_depth = self.observations.iter().filter(|o| o.depth.is_some()).count();
        let depth_rate = if self.observations.is_empty() {
            0.0
        } else {
            with_depth as f64 / self.observations.len() as f64 * 100.0
        };

        let mut taps: BTreeMap<&str, usize> = BTreeMap::new();
        for event in self.events.iter().filter(|e| e.event == "tap") {
            *taps.entry(event.key.as_str()).or_default() += 1;
        }
        let tap_rows: String = taps
            .iter()
            .map(|(key, count)| format!("<tr><td>{}</td><td>{}</td></tr>\n", escape(key), count))
            .collect();

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <title>Tapboard Session - {name}</title>
    <style>
        body {{ font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; margin: 40px; background: #f5f5f5; }}
        .stats {{ background: white; padding: 20px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }}
        .stat-label {{ font-weight: bold; color: #666; }}
        .stat-value {{ color: #4682EA; font-size: 1.2em; }}
    </style>
</head>
<body>
    <h1>Tapboard Session Report</h1>
    <div class="stats">
        <h2>Session: {name}</h2>
        <div><span class="stat-label">Frames:</span> <span class="stat-value">{frames}</span></div>
        <div><span class="stat-label">Fingertip samples with depth:</span> <span class="stat-value">{depth_rate:.1}%</span></div>
        <div><span class="stat-label">Key events:</span> <span class="stat-value">{events}</span></div>
        <table>
            <tr><th>Key</th><th>Taps</th></tr>
{tap_rows}        </table>
    </div>
</body>
</html>
"#,
            name = escape(&self.session_name),
            frames = self.frames,
            events = self.events.len(),
        )
    }
}

fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = Writer::from_writer(file);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TouchConfig;
    use crate::error::SensorError;
    use crate::keyboard::{DepthRange, KeyRegion, KeyboardLayout};
    use crate::tracking::{Finger, FingerId};
    use nalgebra::Point2;
    use tempfile::tempdir;

    fn obs(frame: usize, depth: Result<f32, SensorError>) -> FingerObservation {
        FingerObservation {
            id: FingerId::new(0, Finger::Index),
            timestamp: frame as f64 / 30.0,
            position: Point2::new(120, 120),
            raw_position: Point2::new(120, 120),
            depth,
        }
    }

    #[test]
    fn test_export_writes_observations_and_events() {
        let dir = tempdir().unwrap();
        let layout = KeyboardLayout::new(vec![KeyRegion::rect(
            "a",
            100,
            100,
            150,
            150,
            DepthRange::new(0.20, 0.23),
        )]);
        let mut touch = TouchStateMachine::new(TouchConfig::default());
        let mut recorder = SessionRecorder::new(dir.path(), Some("desk".into()));

        let frames = [
            obs(0, Ok(0.22)),
            obs(1, Err(SensorError::NoDepth { x: 120, y: 120 })),
            obs(2, Ok(0.15)),
        ];
        for (i, frame) in frames.iter().enumerate() {
            let observations = std::slice::from_ref(frame);
            let events = touch.process(observations, &layout);
            recorder.add_frame(i as u64, observations, &events, &touch);
        }
        assert_eq!(recorder.observation_count(), 3);
        assert_eq!(recorder.event_count(), 2);

        let session = recorder.export_csv().unwrap();
        assert_eq!(session, dir.path().join("desk"));

        let mut reader = csv::Reader::from_path(session.join("observations.csv")).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "timestamp");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][10], "a");
        assert_eq!(&rows[1][8], "");
        assert!(rows[1][9].contains("no depth"));

        let events = std::fs::read_to_string(session.join("events.csv")).unwrap();
        assert!(events.contains("tap,a"));
        assert!(events.contains("release,a"));
    }

    #[test]
    fn test_report_counts_taps() {
        let dir = tempdir().unwrap();
        let mut recorder = SessionRecorder::new(dir.path(), None);
        assert!(recorder.session_name.starts_with("session_"));

        let finger = FingerId::new(1, Finger::Middle);
        let events = [
            TouchEvent { finger, timestamp: 0.1, event: crate::touch::KeyEvent::Tap("<".into()) },
            TouchEvent { finger, timestamp: 0.1, event: crate::touch::KeyEvent::Release("<".into()) },
        ];
        let touch = TouchStateMachine::new(TouchConfig::default());
        recorder.add_frame(0, &[], &events, &touch);

        let report = std::fs::read_to_string(recorder.generate_report().unwrap()).unwrap();
        assert!(report.contains("<tr><td>&lt;</td><td>1</td></tr>"));
    }
}
