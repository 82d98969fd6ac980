// src/main.rs
use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use tapboard::config::{ContactPolicy, DetectionMode, DispatchTarget, CONFIG_FILE};
use tapboard::depth::{DepthSource, NoDepth};
use tapboard::mediapipe_bridge::{LandmarkSource, ReplaySource};
use tapboard::{TapboardApp, TapboardConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    TouchTap,
    DepthCrossing,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ContactArg {
    Single,
    Multi,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetArg {
    Text,
    Os,
}

#[derive(Parser, Debug)]
#[command(name = "tapboard", about = "Type on a printed keyboard with a depth camera")]
struct Cli {
    /// Landmark recording to run (JSON lines, one frame per line)
    replay: PathBuf,

    /// Runtime configuration file
    #[arg(long, env = "TAPBOARD_CONFIG", default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Key region calibration file
    #[arg(long)]
    regions: Option<PathBuf>,

    /// Per-key depth threshold file
    #[arg(long)]
    thresholds: Option<PathBuf>,

    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    #[arg(long, value_enum)]
    contact: Option<ContactArg>,

    #[arg(long, value_enum)]
    target: Option<TargetArg>,

    /// Export the session as CSV on exit
    #[arg(long)]
    record: bool,

    /// Pace frames by their timestamps instead of as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut TapboardConfig) {
        if let Some(path) = &self.regions {
            config.calibration.regions = path.clone();
        }
        if let Some(path) = &self.thresholds {
            config.calibration.thresholds = path.clone();
        }
        if let Some(mode) = self.mode {
            config.touch.mode = match mode {
                ModeArg::TouchTap => DetectionMode::TouchTap,
                ModeArg::DepthCrossing => DetectionMode::DepthCrossing,
            };
        }
        if let Some(contact) = self.contact {
            config.touch.contact = match contact {
                ContactArg::Single => ContactPolicy::Single,
                ContactArg::Multi => ContactPolicy::Multi,
            };
        }
        if let Some(target) = self.target {
            config.dispatch.target = match target {
                TargetArg::Text => DispatchTarget::Text,
                TargetArg::Os => DispatchTarget::Os,
            };
        }
        if self.record {
            config.session.record = true;
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "tapboard=debug,warn" } else { "tapboard=info,warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    info!("tapboard v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = TapboardConfig::load_from(&cli.config)?;
    cli.apply(&mut config);

    let mut app = TapboardApp::new(config)?;
    let mut source = ReplaySource::open(&cli.replay)?;

    let mut display = app.subscribe();
    let display_task = tokio::spawn(async move {
        let mut last_text = String::new();
        while display.changed().await.is_ok() {
            let snapshot = display.borrow_and_update().clone();
            if snapshot.text != last_text {
                info!(text = ?snapshot.text, "typed");
                last_text = snapshot.text;
            }
            tracing::debug!(
                frame = snapshot.frame,
                key = ?snapshot.active_key,
                fingertip = ?snapshot.fingertip,
                "display"
            );
        }
    });

    // contacts and injected keys are released whatever ended the loop
    let result = run(&mut app, &mut source, cli.realtime).await;
    let shutdown = app.shutdown();
    let text = app.typed_text();
    info!(
        fps = app.metrics().avg_fps,
        frames = app.frames_processed(),
        "average pipeline throughput"
    );
    drop(app);
    display_task.await?;

    println!("{text}");
    result.and(shutdown.map(|_| ()))
}

async fn run(app: &mut TapboardApp, source: &mut dyn LandmarkSource, realtime: bool) -> Result<()> {
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut previous: Option<f64> = None;

    loop {
        let Some(frame) = source.next_frame()? else {
            info!("end of recording");
            return Ok(());
        };

        let gap = match previous {
            Some(prev) if realtime => (frame.timestamp - prev).max(0.0),
            _ => 0.0,
        };
        previous = Some(frame.timestamp);
        let wait = pacing_delay(gap, frame.timestamp);
        tokio::select! {
            biased;
            _ = &mut interrupt => {
                info!("interrupted, shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let depth: Box<dyn DepthSource> = match frame.depth.load() {
            Ok(depth) => depth,
            Err(e) => {
                tracing::warn!("frame at {:.3}s has unusable depth: {e:#}", frame.timestamp);
                Box::new(NoDepth)
            }
        };
        app.process_frame(&frame, depth.as_ref());
    }
}

/// Sleep before a replayed frame; unusable gaps (NaN, overflow) are not waited on.
fn pacing_delay(gap: f64, timestamp: f64) -> Duration {
    Duration::try_from_secs_f64(gap).unwrap_or_else(|e| {
        tracing::warn!("frame at {timestamp}s has an unusable timestamp gap ({gap}s): {e}");
        Duration::ZERO
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_delay_tolerates_corrupt_gaps() {
        assert_eq!(pacing_delay(0.5, 1.0), Duration::from_millis(500));
        assert_eq!(pacing_delay(f64::MAX, 1.0), Duration::ZERO);
        assert_eq!(pacing_delay(f64::NAN, 1.0), Duration::ZERO);
        assert_eq!(pacing_delay(f64::INFINITY, 1.0), Duration::ZERO);
    }
}
