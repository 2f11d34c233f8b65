//! Actibump - vision-driven active speed bump controller
//!
//! Replays a recorded scene through the enforcement loop: vehicles are
//! tracked, their speed measured, policy events applied to the bump state,
//! and raise/lower commands written to the actuator link.
//!
//! Module structure:
//! - `domain/` - Core types (BBox, Frame, Track, PolicyState)
//! - `io/` - External interfaces (actuator, remote store, event log, scene replay)
//! - `services/` - Frame loop logic (registry, speed, policy, throttler, OCR)
//! - `infra/` - Infrastructure (Config, Metrics)

use actibump::infra::{Config, Metrics};
use actibump::io::{
    Actuator, EventLog, RemoteSync, ReplayDetector, ReplayRecognizer, ReplaySource,
    ReplayTrackerFactory, Scene,
};
use actibump::services::{OcrDispatcher, OcrWorker, Pipeline, PipelineIo, PlateTable};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Actibump - active speed bump enforcement loop
#[derive(Parser, Debug)]
#[command(name = "actibump", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Scene file (JSONL) to replay
    #[arg(short, long)]
    scene: String,

    /// Pace frames to scene timestamps instead of running flat out
    #[arg(long)]
    realtime: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides; default INFO, debug for per-frame detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "actibump starting");

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mode = %config.policy_mode().as_str(),
        unit = %config.speed_unit().as_str(),
        limit = %config.speed_limit(),
        geofence_y = %config.geofence_y(),
        detect_every = %config.detect_every_n_frames(),
        protocol = %config.command_protocol().as_str(),
        ocr_enabled = %config.ocr_enabled(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let scene = Arc::new(Scene::load(&args.scene, config.frame_width(), config.frame_height())?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = actibump::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "prometheus_server_failed");
            }
        });
    }

    // Periodic metrics summary
    let reporter_metrics = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            reporter_metrics.report().log();
        }
    });

    let remote = RemoteSync::from_config(&config, metrics.clone());
    let initial_state = remote.load_state().await;

    let plates = Arc::new(PlateTable::new());

    // OCR worker (bounded queue, jobs dropped when full)
    let (ocr, ocr_worker) = if config.ocr_enabled() {
        let (job_tx, job_rx) = mpsc::channel(config.ocr_queue_capacity());
        let worker = OcrWorker::new(
            &config,
            Arc::new(ReplayRecognizer::new(scene.clone())),
            plates.clone(),
            job_rx,
            metrics.clone(),
        );
        let handle = tokio::spawn(worker.run());
        (Some(OcrDispatcher::new(&config, job_tx, metrics.clone())), Some(handle))
    } else {
        (None, None)
    };

    let io = PipelineIo {
        detector: Box::new(ReplayDetector::new(scene.clone())),
        trackers: Box::new(ReplayTrackerFactory::new(scene.clone())),
        actuator: Actuator::from_config(&config, metrics.clone()),
        remote,
        event_log: EventLog::new(config.event_log_file(), config.site_id()),
        plates,
        ocr,
    };
    let mut pipeline = Pipeline::new(config, io, initial_state, metrics.clone());

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let mut source = ReplaySource::new(scene, args.realtime);
    let summary = pipeline.run(&mut source, shutdown_rx).await;

    // Closing the job queue lets the worker drain and exit
    drop(pipeline);
    if let Some(handle) = ocr_worker {
        let _ = handle.await;
    }

    metrics.snapshot().log();
    info!(
        frames = %summary.frames,
        events = %summary.events,
        health = %summary.state.health_units(),
        speeding_count = %summary.state.speeding_count(),
        "actibump shutdown complete"
    );
    Ok(())
}
