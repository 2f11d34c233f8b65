//! OCR worker - plate recognition off the frame loop
//!
//! The frame loop hands crops to the worker through a bounded mpsc channel
//! with non-blocking enqueue; a full queue drops the job and counts it. The
//! worker writes accepted readings into the shared plate table. Jobs are
//! never cancelled: a queued job completes even if its track is gone.

use crate::domain::types::{CropRegion, Frame, TrackId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::vision::{PlateCrop, PlateRecognizer};
use crate::services::plates::{PlateFilter, PlateTable};
use crate::services::registry::TrackRegistry;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A crop queued for recognition
#[derive(Debug)]
pub struct OcrJob {
    pub track_id: TrackId,
    pub crop: PlateCrop,
    /// When the job was enqueued (for queue delay logging)
    pub enqueued_at: Instant,
}

/// Worker that recognizes plates and updates the plate table
pub struct OcrWorker {
    recognizer: Arc<dyn PlateRecognizer>,
    plates: Arc<PlateTable>,
    filter: PlateFilter,
    job_rx: mpsc::Receiver<OcrJob>,
    metrics: Arc<Metrics>,
}

impl OcrWorker {
    pub fn new(
        config: &Config,
        recognizer: Arc<dyn PlateRecognizer>,
        plates: Arc<PlateTable>,
        job_rx: mpsc::Receiver<OcrJob>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let filter = PlateFilter::new(config.ocr_min_confidence(), config.emergency_marker());
        Self { recognizer, plates, filter, job_rx, metrics }
    }

    /// Run until every sender is dropped
    pub async fn run(mut self) {
        info!("ocr_worker_started");
        while let Some(job) = self.job_rx.recv().await {
            self.process(job).await;
        }
        info!("ocr_worker_stopped");
    }

    async fn process(&self, job: OcrJob) {
        let queue_delay_us = job.enqueued_at.elapsed().as_micros() as u64;
        let readings = match self.recognizer.recognize(&job.crop).await {
            Ok(readings) => readings,
            Err(e) => {
                warn!(track_id = %job.track_id, error = %e, "ocr_recognize_failed");
                self.metrics.record_ocr_completed();
                return;
            }
        };

        for raw in &readings {
            let Some(reading) = self.filter.accept(raw, job.crop.region) else {
                continue;
            };
            let emergency = reading.emergency;
            let text = reading.text.clone();
            let confidence = reading.confidence;
            if self.plates.offer(job.track_id, reading) {
                info!(
                    track_id = %job.track_id,
                    plate = %text,
                    confidence = format!("{:.2}", confidence),
                    emergency = %emergency,
                    "plate_recognized"
                );
            }
            if emergency {
                break;
            }
        }

        debug!(
            track_id = %job.track_id,
            readings = %readings.len(),
            queue_delay_us = %queue_delay_us,
            "ocr_job_processed"
        );
        self.metrics.record_ocr_completed();
    }
}

/// Frame-loop side of the OCR pipeline: rate limits per track and enqueues crops
pub struct OcrDispatcher {
    job_tx: mpsc::Sender<OcrJob>,
    interval_secs: f64,
    last_dispatch: FxHashMap<TrackId, f64>,
    metrics: Arc<Metrics>,
    closed: bool,
}

impl OcrDispatcher {
    pub fn new(config: &Config, job_tx: mpsc::Sender<OcrJob>, metrics: Arc<Metrics>) -> Self {
        Self {
            job_tx,
            interval_secs: config.ocr_interval_ms() as f64 / 1000.0,
            last_dispatch: FxHashMap::default(),
            metrics,
            closed: false,
        }
    }

    /// Enqueue a crop for every track whose last dispatch is at least one interval old
    pub fn dispatch(&mut self, frame: &Frame, registry: &TrackRegistry) -> usize {
        if self.closed {
            return 0;
        }
        let mut enqueued = 0;
        for track in registry.tracks() {
            if let Some(&last) = self.last_dispatch.get(&track.id) {
                if frame.ts - last < self.interval_secs {
                    continue;
                }
            }
            let region = CropRegion::clamped(&track.bbox, frame.width(), frame.height());
            if region.is_empty() {
                continue;
            }
            self.last_dispatch.insert(track.id, frame.ts);

            let job = OcrJob {
                track_id: track.id,
                crop: PlateCrop { frame_ts: frame.ts, region, pixels: frame.image.crop(region) },
                enqueued_at: Instant::now(),
            };
            match self.job_tx.try_send(job) {
                Ok(()) => {
                    self.metrics.record_ocr_enqueued();
                    enqueued += 1;
                }
                Err(mpsc::error::TrySendError::Full(job)) => {
                    self.metrics.record_ocr_dropped();
                    debug!(track_id = %job.track_id, "ocr_queue_full_job_dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("ocr_worker_gone");
                    self.closed = true;
                    break;
                }
            }
        }
        enqueued
    }

    /// Forget dispatch history of a removed track
    pub fn forget(&mut self, id: TrackId) {
        self.last_dispatch.remove(&id);
    }
}
