//! Synthetic scene generator
//!
//! Writes a JSONL scene for `actibump --scene`: vehicles drive down the
//! frame in parallel lanes at fixed speeds, one line per frame.
//!
//! Usage:
//!   cargo run --bin scene-gen -- --speeds 20,55 --vehicles 6 --emergency 3 -o scenes/demo.jsonl

use actibump::domain::types::BBox;
use actibump::io::scene::{SceneFrame, SceneVehicle};
use anyhow::{bail, Context};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

const VEHICLE_W: f64 = 120.0;
const VEHICLE_H: f64 = 80.0;

#[derive(Parser, Debug)]
#[command(name = "scene-gen")]
#[command(about = "Generate a synthetic replay scene")]
struct Args {
    /// Output file, `-` for stdout
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Frames per second
    #[arg(long, default_value_t = 25.0)]
    fps: f64,

    /// Number of vehicles
    #[arg(long, default_value_t = 4)]
    vehicles: u64,

    /// Number of lanes
    #[arg(long, default_value_t = 2)]
    lanes: u64,

    /// Vehicle speeds in km/h, assigned round-robin
    #[arg(long, value_delimiter = ',', default_value = "20,50")]
    speeds: Vec<f64>,

    /// Seconds between vehicle entries
    #[arg(long, default_value_t = 1.5)]
    spawn_interval: f64,

    /// Calibration scalar used to turn km/h into pixels
    #[arg(long, default_value_t = 35.0)]
    pixels_per_meter: f64,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Vehicle (1-based) that carries an emergency plate
    #[arg(long)]
    emergency: Option<u64>,

    /// Emergency plate prefix
    #[arg(long, default_value = "MAI")]
    marker: String,
}

/// One synthetic vehicle's trajectory
struct Lane {
    id: u64,
    x: f64,
    enter_t: f64,
    px_per_sec: f64,
    plate: String,
}

impl Lane {
    /// Box at time `t`, `None` before entry or after leaving the frame
    fn bbox_at(&self, t: f64, height: f64) -> Option<BBox> {
        if t < self.enter_t {
            return None;
        }
        let y = (t - self.enter_t) * self.px_per_sec;
        if y > height {
            return None;
        }
        Some(BBox::new(self.x, y, VEHICLE_W, VEHICLE_H))
    }
}

fn build_lanes(args: &Args) -> anyhow::Result<Vec<Lane>> {
    if args.speeds.is_empty() || args.speeds.iter().any(|s| !s.is_finite() || *s <= 0.0) {
        bail!("speeds must be positive");
    }
    if args.lanes == 0 || args.fps <= 0.0 || args.pixels_per_meter <= 0.0 {
        bail!("lanes, fps and pixels_per_meter must be positive");
    }

    let lane_width = args.width as f64 / args.lanes as f64;
    let lanes = (0..args.vehicles)
        .map(|i| {
            let id = i + 1;
            let lane = i % args.lanes;
            let kmh = args.speeds[i as usize % args.speeds.len()];
            let plate = if args.emergency == Some(id) {
                format!("{}{:03}", args.marker, id)
            } else {
                format!("AB{:04}", 1000 + id)
            };
            Lane {
                id,
                x: lane as f64 * lane_width + (lane_width - VEHICLE_W) / 2.0,
                enter_t: i as f64 * args.spawn_interval,
                px_per_sec: kmh / 3.6 * args.pixels_per_meter,
                plate,
            }
        })
        .collect();
    Ok(lanes)
}

fn generate(args: &Args, lanes: &[Lane]) -> Vec<SceneFrame> {
    let height = args.height as f64;
    let end_t = lanes
        .iter()
        .map(|l| l.enter_t + (height + 1.0) / l.px_per_sec)
        .fold(0.0_f64, f64::max);
    let total = (end_t * args.fps).ceil() as u64;

    (0..=total)
        .map(|n| {
            let t = n as f64 / args.fps;
            let vehicles = lanes
                .iter()
                .filter_map(|lane| {
                    lane.bbox_at(t, height).map(|bbox| SceneVehicle {
                        id: lane.id,
                        bbox,
                        plate: Some(lane.plate.clone()),
                        plate_confidence: 0.9,
                    })
                })
                .collect();
            SceneFrame { t, vehicles }
        })
        .collect()
}

fn write_scene(output: &str, frames: &[SceneFrame]) -> anyhow::Result<()> {
    let mut writer: Box<dyn Write> = if output == "-" {
        Box::new(BufWriter::new(io::stdout().lock()))
    } else {
        let path = Path::new(output);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create directory {}", parent.display()))?;
            }
        }
        let file = File::create(path).with_context(|| format!("create scene file {output}"))?;
        Box::new(BufWriter::new(file))
    };
    for frame in frames {
        serde_json::to_writer(&mut writer, frame)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let lanes = build_lanes(&args)?;
    let frames = generate(&args, &lanes);
    write_scene(&args.output, &frames)?;

    info!(
        output = %args.output,
        frames = %frames.len(),
        vehicles = %lanes.len(),
        emergency = ?args.emergency,
        "scene_generated"
    );
    Ok(())
}
