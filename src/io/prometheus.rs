//! Prometheus metrics HTTP endpoint
//!
//! Exposes loop metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_frame_metrics(&mut output, site_id, &summary);
    write_track_metrics(&mut output, site_id, &summary);
    write_policy_metrics(&mut output, site_id, &summary);
    write_command_metrics(&mut output, site_id, &summary);
    write_ocr_metrics(&mut output, site_id, &summary);

    output
}

fn write_frame_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "actibump_frames_total",
        "Total frames processed",
        MetricType::Counter,
        site,
        summary.frames_total,
    );
    let _ = writeln!(output, "# HELP actibump_frames_per_sec Frames processed per second");
    let _ = writeln!(output, "# TYPE actibump_frames_per_sec gauge");
    let _ = writeln!(output, "actibump_frames_per_sec{{site=\"{site}\"}} {:.2}", summary.frames_per_sec);
    write_histogram(
        output,
        "actibump_frame_latency_us",
        "Per-frame loop latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.avg_frame_latency_us,
    );
}

fn write_track_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "actibump_active_tracks",
        "Live vehicle tracks",
        MetricType::Gauge,
        site,
        summary.active_tracks,
    );
    write_metric(
        output,
        "actibump_tracks_created_total",
        "Tracks created from detections",
        MetricType::Counter,
        site,
        summary.tracks_created_total,
    );
    write_metric(
        output,
        "actibump_tracks_expired_total",
        "Tracks removed after losing quality",
        MetricType::Counter,
        site,
        summary.tracks_expired_total,
    );
    write_metric(
        output,
        "actibump_detections_total",
        "Boxes returned by the periodic detector",
        MetricType::Counter,
        site,
        summary.detections_total,
    );
}

fn write_policy_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "actibump_health",
        "Speed bump health (0-10000)",
        MetricType::Gauge,
        site,
        summary.health,
    );
    write_metric(
        output,
        "actibump_speeding_events_total",
        "Speeding count events fired",
        MetricType::Counter,
        site,
        summary.speeding_events_total,
    );
    write_metric(
        output,
        "actibump_damage_events_total",
        "Damage events fired",
        MetricType::Counter,
        site,
        summary.damage_events_total,
    );
    write_metric(
        output,
        "actibump_remote_push_ok_total",
        "Successful remote state pushes",
        MetricType::Counter,
        site,
        summary.remote_push_ok_total,
    );
    write_metric(
        output,
        "actibump_remote_push_failed_total",
        "Failed remote state pushes",
        MetricType::Counter,
        site,
        summary.remote_push_failed_total,
    );
}

fn write_command_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "actibump_commands_sent_total",
        "Actuator commands written",
        MetricType::Counter,
        site,
        summary.commands_sent_total,
    );
    write_metric(
        output,
        "actibump_commands_suppressed_total",
        "Actuator commands suppressed as redundant",
        MetricType::Counter,
        site,
        summary.commands_suppressed_total,
    );
    write_metric(
        output,
        "actibump_commands_dropped_total",
        "Actuator commands dropped (no link or write error)",
        MetricType::Counter,
        site,
        summary.commands_dropped_total,
    );
}

fn write_ocr_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "actibump_ocr_enqueued_total",
        "OCR jobs enqueued",
        MetricType::Counter,
        site,
        summary.ocr_enqueued_total,
    );
    write_metric(
        output,
        "actibump_ocr_dropped_total",
        "OCR jobs dropped on a full queue",
        MetricType::Counter,
        site,
        summary.ocr_dropped_total,
    );
    write_metric(
        output,
        "actibump_ocr_completed_total",
        "OCR jobs completed",
        MetricType::Counter,
        site,
        summary.ocr_completed_total,
    );
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Full::new(Bytes::from(format_prometheus_metrics(&metrics, &site_id)))),
        (&Method::GET, "/health") => {
            Response::builder().status(StatusCode::OK).body(Full::new(Bytes::from("ok")))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found"))),
    };
    Ok(response.unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))))
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
