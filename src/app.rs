// src/app.rs
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::watch;

use crate::config::TapboardConfig;
use crate::data::SessionRecorder;
use crate::depth::DepthSource;
use crate::dispatch::{Dispatcher, KeyInjector, LogInjector};
use crate::error::SensorError;
use crate::keyboard::KeyboardLayout;
use crate::mediapipe_bridge::LandmarkFrame;
use crate::touch::{TouchEvent, TouchStateMachine};
use crate::tracking::{Finger, FingerObservation, FingertipTracker};

const METRICS_WINDOW: usize = 30;

/// What a display needs each frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplaySnapshot {
    pub frame: u64,
    pub text: String,
    pub active_key: Option<String>,
    pub touching: bool,
    pub fingertip: Option<(i32, i32)>,
}

#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub avg_fps: f32,
    pub avg_processing_time: f32,
    frame_times: VecDeque<f32>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            avg_fps: 0.0,
            avg_processing_time: 0.0,
            frame_times: VecDeque::with_capacity(METRICS_WINDOW),
        }
    }

    pub fn record(&mut self, elapsed: f32) {
        self.frame_times.push_front(elapsed);
        if self.frame_times.len() > METRICS_WINDOW {
            self.frame_times.pop_back();
        }

        self.avg_processing_time =
            self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
        self.avg_fps = if self.avg_processing_time > 0.0 {
            1.0 / self.avg_processing_time
        } else {
            0.0
        };
    }

    pub fn samples(&self) -> usize {
        self.frame_times.len()
    }
}

/// Output of one pipeline step.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub observations: Vec<FingerObservation>,
    pub events: Vec<TouchEvent>,
    pub snapshot: DisplaySnapshot,
}

/// Fingertips in, key events out: tracking, touch detection and dispatch per frame.
pub struct TapboardApp {
    layout: KeyboardLayout,
    tracker: FingertipTracker,
    touch: TouchStateMachine,
    dispatcher: Dispatcher,
    recorder: Option<SessionRecorder>,
    metrics: PerformanceMetrics,
    frame_index: u64,
    snapshot_tx: watch::Sender<DisplaySnapshot>,
    shut_down: bool,
}

impl TapboardApp {
    /// Loads calibration and wires the pipeline. A missing thresholds file fails here.
    pub fn new(config: TapboardConfig) -> Result<Self> {
        let layout = KeyboardLayout::load(&config.calibration.regions, &config.calibration.thresholds)
            .context("loading keyboard calibration")?;
        if layout.is_empty() {
            tracing::warn!("keyboard layout is empty, no keys will be detected");
        }

        let recorder = config
            .session
            .record
            .then(|| SessionRecorder::new(&config.session.output_dir, None));
        let mut app = Self::from_parts(config, layout, Box::new(LogInjector));
        app.recorder = recorder;
        Ok(app)
    }

    pub fn from_parts(config: TapboardConfig, layout: KeyboardLayout, injector: Box<dyn KeyInjector>) -> Self {
        tracing::info!(
            keys = layout.len(),
            mode = ?config.touch.mode,
            contact = ?config.touch.contact,
            target = ?config.dispatch.target,
            "tapboard ready"
        );
        let (snapshot_tx, _) = watch::channel(DisplaySnapshot::default());
        Self {
            layout,
            tracker: FingertipTracker::new(config.tracking.clone(), config.filter),
            touch: TouchStateMachine::new(config.touch),
            dispatcher: Dispatcher::new(config.dispatch.target, injector),
            recorder: None,
            metrics: PerformanceMetrics::new(),
            frame_index: 0,
            snapshot_tx,
            shut_down: false,
        }
    }

    /// Display updates; never blocks the pipeline.
    pub fn subscribe(&self) -> watch::Receiver<DisplaySnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn process_frame(&mut self, frame: &LandmarkFrame, depth: &dyn DepthSource) -> FrameReport {
        let start = Instant::now();
        if frame.hands.is_empty() {
            tracing::trace!(frame = self.frame_index, "{}", SensorError::NoHands);
        }

        let observations = self.tracker.observe(frame, depth);
        let events = self.touch.process(&observations, &self.layout);
        for event in &events {
            self.dispatcher.dispatch(&event.event);
        }

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.add_frame(self.frame_index, &observations, &events, &self.touch);
        }

        let snapshot = DisplaySnapshot {
            frame: self.frame_index,
            text: self.dispatcher.buffer().contents(),
            active_key: self.touch.active_key().map(str::to_string),
            touching: self.touch.is_touching(),
            fingertip: self.display_fingertip(&observations),
        };
        self.snapshot_tx.send_replace(snapshot.clone());

        self.frame_index += 1;
        self.metrics.record(start.elapsed().as_secs_f32());

        FrameReport {
            observations,
            events,
            snapshot,
        }
    }

    /// The finger holding a key, else the first index finger, else whatever was seen first.
    fn display_fingertip(&self, observations: &[FingerObservation]) -> Option<(i32, i32)> {
        let holding = self
            .touch
            .contacts()
            .find_map(|(id, _)| observations.iter().find(|o| o.id == *id));
        holding
            .or_else(|| observations.iter().find(|o| o.id.finger == Finger::Index))
            .or_else(|| observations.first())
            .map(|o| (o.position.x, o.position.y))
    }

    pub fn typed_text(&self) -> String {
        self.dispatcher.buffer().contents()
    }

    pub fn layout(&self) -> &KeyboardLayout {
        &self.layout
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    pub fn frames_processed(&self) -> u64 {
        self.frame_index
    }

    /// Releases every contact and injected key, then writes the session if recording.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn shutdown(&mut self) -> Result<Vec<TouchEvent>> {
        if self.shut_down {
            return Ok(Vec::new());
        }
        self.shut_down = true;

        let released = self.touch.release_all();
        for event in &released {
            self.dispatcher.dispatch(&event.event);
        }
        self.dispatcher.release_all();
        tracing::info!(
            frames = self.frame_index,
            released = released.len(),
            "pipeline stopped"
        );

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.add_frame(self.frame_index, &[], &released, &self.touch);
            let dir = recorder.export_csv().context("exporting session")?;
            recorder.generate_report().context("writing session report")?;
            tracing::info!("session written to {}", dir.display());
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectionMode, DispatchTarget};
    use crate::dispatch::{KeyCode, RecordingInjector};
    use crate::error::InjectionError;
    use crate::keyboard::{DepthRange, KeyRegion};
    use crate::mediapipe_bridge::{HandLandmarks, HAND_LANDMARK_COUNT};
    use crate::touch::KeyEvent;
    use crate::tracking::tests::hand_at;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<RecordingInjector>>);

    impl KeyInjector for Shared {
        fn key_down(&mut self, key: KeyCode) -> Result<(), InjectionError> {
            self.0.lock().unwrap().key_down(key)
        }

        fn key_up(&mut self, key: KeyCode) -> Result<(), InjectionError> {
            self.0.lock().unwrap().key_up(key)
        }
    }

    fn layout() -> KeyboardLayout {
        KeyboardLayout::new(vec![KeyRegion::rect(
            "a",
            100,
            100,
            150,
            150,
            DepthRange::new(0.20, 0.23),
        )])
    }

    // pixel (120, 120) on a 640x480 frame
    fn frame(index: usize, present: bool) -> LandmarkFrame {
        LandmarkFrame {
            timestamp: index as f64 / 30.0,
            width: 640,
            height: 480,
            hands: if present { vec![hand_at(0.1875, 0.25)] } else { vec![] },
            depth: Default::default(),
        }
    }

    fn flat(depth: f32) -> impl Fn(u32, u32) -> f32 {
        move |_, _| depth
    }

    #[test]
    fn test_tap_types_text_and_publishes_snapshot() {
        let mut app = TapboardApp::from_parts(TapboardConfig::default(), layout(), Box::new(LogInjector));
        let mut rx = app.subscribe();

        for (i, depth) in [0.25, 0.22, 0.21].into_iter().enumerate() {
            app.process_frame(&frame(i, true), &flat(depth));
        }
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.frame, 2);
        assert_eq!(snapshot.active_key.as_deref(), Some("a"));
        assert!(snapshot.touching);
        assert_eq!(snapshot.fingertip, Some((120, 120)));

        let report = app.process_frame(&frame(3, true), &flat(0.19));
        assert_eq!(report.events[0].event, KeyEvent::Tap("a".into()));
        assert_eq!(report.snapshot.text, "a");
        assert!(!report.snapshot.touching);
        assert_eq!(app.typed_text(), "a");
        assert_eq!(app.metrics().samples(), 4);
        assert_eq!(app.frames_processed(), 4);
    }

    #[test]
    fn test_shutdown_releases_injected_keys() {
        let mut config = TapboardConfig::default();
        config.touch.mode = DetectionMode::DepthCrossing;
        config.dispatch.target = DispatchTarget::Os;
        let shared = Shared::default();
        let mut app = TapboardApp::from_parts(config, layout(), Box::new(shared.clone()));

        let report = app.process_frame(&frame(0, true), &flat(0.21));
        assert_eq!(report.events[0].event, KeyEvent::Press("a".into()));

        let released = app.shutdown().unwrap();
        assert_eq!(released.len(), 1);
        assert!(app.shutdown().unwrap().is_empty());

        use crate::dispatch::Stroke;
        let strokes = shared.0.lock().unwrap().strokes.clone();
        assert_eq!(
            strokes,
            vec![Stroke::Down(KeyCode::Char('a')), Stroke::Up(KeyCode::Char('a'))]
        );
    }

    #[test]
    fn test_vanished_hand_lifts_os_key() {
        let mut config = TapboardConfig::default();
        config.touch.mode = DetectionMode::DepthCrossing;
        config.dispatch.target = DispatchTarget::Os;
        let shared = Shared::default();
        let mut app = TapboardApp::from_parts(config, layout(), Box::new(shared.clone()));

        app.process_frame(&frame(0, true), &flat(0.21));
        let report = app.process_frame(&frame(1, false), &flat(0.21));
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].event, KeyEvent::Release("a".into()));
        assert_eq!(shared.0.lock().unwrap().strokes.len(), 2);
    }

    #[test]
    fn test_new_requires_thresholds() {
        let dir = tempdir().unwrap();
        let mut config = TapboardConfig::default();
        config.calibration.regions = dir.path().join("regions.json");
        config.calibration.thresholds = dir.path().join("thresholds.json");
        assert!(TapboardApp::new(config.clone()).is_err());

        std::fs::write(&config.calibration.thresholds, "{}").unwrap();
        let app = TapboardApp::new(config).unwrap();
        assert!(app.layout().is_empty());
    }

    #[test]
    fn test_recording_session_is_exported_on_shutdown() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("thresholds.json"), r#"{"a": [0.20, 0.23]}"#).unwrap();
        std::fs::write(
            dir.path().join("regions.json"),
            r#"[{"key": "a", "points": [{"x":100,"y":100},{"x":150,"y":100},{"x":150,"y":150},{"x":100,"y":150}]}]"#,
        )
        .unwrap();

        let mut config = TapboardConfig::default();
        config.calibration.regions = dir.path().join("regions.json");
        config.calibration.thresholds = dir.path().join("thresholds.json");
        config.session.record = true;
        config.session.output_dir = dir.path().join("sessions");

        let mut app = TapboardApp::new(config).unwrap();
        app.process_frame(&frame(0, true), &flat(0.21));
        app.shutdown().unwrap();

        let session = std::fs::read_dir(dir.path().join("sessions"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        assert!(session.join("observations.csv").exists());
        assert!(session.join("report.html").exists());
        let events = std::fs::read_to_string(session.join("events.csv")).unwrap();
        assert!(events.contains("release,a"));
    }

    #[test]
    fn test_snapshot_follows_holding_finger_then_index() {
        let mut app = TapboardApp::from_parts(TapboardConfig::default(), layout(), Box::new(LogInjector));
        // thumb tip over the key, every other landmark at the frame centre
        let mut landmarks = vec![[0.5, 0.5, 0.0]; HAND_LANDMARK_COUNT];
        landmarks[Finger::Thumb.tip_landmark()] = [0.1875, 0.25, 0.0];
        let hand = HandLandmarks::new(landmarks);
        let frame = |index: usize| LandmarkFrame {
            timestamp: index as f64 / 30.0,
            width: 640,
            height: 480,
            hands: vec![hand.clone()],
            depth: Default::default(),
        };

        let report = app.process_frame(&frame(0), &flat(0.30));
        assert!(!report.snapshot.touching);
        assert_eq!(report.snapshot.fingertip, Some((320, 240)));

        let report = app.process_frame(&frame(1), &flat(0.21));
        assert_eq!(report.snapshot.active_key.as_deref(), Some("a"));
        assert_eq!(report.snapshot.fingertip, Some((120, 120)));
    }

    #[test]
    fn test_metrics_window() {
        let mut metrics = PerformanceMetrics::new();
        for _ in 0..40 {
            metrics.record(0.01);
        }
        assert_eq!(metrics.samples(), METRICS_WINDOW);
        assert!((metrics.avg_fps - 100.0).abs() < 0.1);
    }
}
