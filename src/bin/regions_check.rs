use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use tapboard::config::CalibrationPaths;
use tapboard::keyboard::{load_regions, load_thresholds, KeyboardLayout};

/// Loads the calibration files and reports what the keyboard will see.
#[derive(Parser, Debug)]
#[command(name = "regions_check")]
struct Cli {
    #[arg(long)]
    regions: Option<PathBuf>,

    #[arg(long)]
    thresholds: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tapboard=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let defaults = CalibrationPaths::default();
    let regions_path = cli.regions.unwrap_or(defaults.regions);
    let thresholds_path = cli.thresholds.unwrap_or(defaults.thresholds);

    println!("Checking calibration...\n");

    let thresholds = match load_thresholds(&thresholds_path) {
        Ok(thresholds) => {
            println!("✓ {} depth threshold(s) in {}", thresholds.len(), thresholds_path.display());
            thresholds
        }
        Err(e) => {
            println!("✗ {e}");
            return Err(e.into());
        }
    };

    let records = load_regions(&regions_path)?;
    println!("✓ {} key region(s) in {}", records.len(), regions_path.display());

    let layout = KeyboardLayout::from_parts(&records, &thresholds);
    let missing: Vec<&str> = records
        .iter()
        .map(|r| r.key())
        .filter(|key| layout.region(key).is_none())
        .collect();

    println!("\n{:<12} {:>8} {:>8}   corners", "key", "min (m)", "max (m)");
    for region in layout.regions() {
        let corners: Vec<String> = region
            .corners
            .iter()
            .map(|p| format!("({}, {})", p.x, p.y))
            .collect();
        println!(
            "{:<12} {:>8.3} {:>8.3}   {}",
            region.name,
            region.depth.min,
            region.depth.max,
            corners.join(" ")
        );
    }

    if !missing.is_empty() {
        println!("\n✗ no depth threshold for: {}", missing.join(", "));
    }
    println!("\n{} key(s) usable", layout.len());
    Ok(())
}
