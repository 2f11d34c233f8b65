//! Per-frame enforcement loop
//!
//! The Pipeline owns every piece of loop state and drives one frame at a time:
//! - tracker update pass and removal of lost tracks
//! - periodic detection and association
//! - speed sampling and policy evaluation
//! - actuator command emission, then remote push and audit log for fired events
//! - OCR dispatch
//!
//! Each step is awaited before the next frame is read. Only end of stream or
//! the shutdown signal ends the loop.

mod handlers;

use crate::domain::policy_state::PolicyState;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::actuator::Actuator;
use crate::io::event_log::EventLog;
use crate::io::remote_store::RemoteSync;
use crate::io::vision::{Detector, FrameSource, TrackerFactory};
use crate::services::ocr_worker::OcrDispatcher;
use crate::services::plates::PlateTable;
use crate::services::policy::PolicyEngine;
use crate::services::registry::TrackRegistry;
use crate::services::speed::SpeedEstimator;
use crate::services::throttler::CommandThrottler;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

pub use handlers::FrameReport;

/// External collaborators and sinks the loop talks to
pub struct PipelineIo {
    pub detector: Box<dyn Detector>,
    pub trackers: Box<dyn TrackerFactory>,
    pub actuator: Actuator,
    pub remote: RemoteSync,
    pub event_log: EventLog,
    pub plates: Arc<PlateTable>,
    /// `None` when OCR is disabled
    pub ocr: Option<OcrDispatcher>,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub events: u64,
    pub state: PolicyState,
}

pub struct Pipeline {
    pub(crate) config: Config,
    pub(crate) registry: TrackRegistry,
    pub(crate) estimator: SpeedEstimator,
    pub(crate) policy: PolicyEngine,
    pub(crate) throttler: CommandThrottler,
    pub(crate) actuator: Actuator,
    pub(crate) remote: RemoteSync,
    pub(crate) event_log: EventLog,
    pub(crate) plates: Arc<PlateTable>,
    pub(crate) ocr: Option<OcrDispatcher>,
    pub(crate) detector: Box<dyn Detector>,
    pub(crate) trackers: Box<dyn TrackerFactory>,
    pub(crate) metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(config: Config, io: PipelineIo, initial_state: PolicyState, metrics: Arc<Metrics>) -> Self {
        metrics.set_health(initial_state.health_units());
        Self {
            registry: TrackRegistry::new(&config),
            estimator: SpeedEstimator::new(&config),
            policy: PolicyEngine::new(&config, initial_state),
            throttler: CommandThrottler::new(&config),
            actuator: io.actuator,
            remote: io.remote,
            event_log: io.event_log,
            plates: io.plates,
            ocr: io.ocr,
            detector: io.detector,
            trackers: io.trackers,
            metrics,
            config,
        }
    }

    /// Consume frames until end of stream or shutdown
    pub async fn run(
        &mut self,
        source: &mut dyn FrameSource,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunSummary {
        info!(
            detect_every = %self.config.detect_every_n_frames(),
            unit = %self.estimator.unit().as_str(),
            actuator = %self.actuator.is_connected(),
            remote = %self.remote.is_configured(),
            ocr = %self.ocr.is_some(),
            "pipeline_started"
        );

        let mut frames = 0u64;
        let mut events = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("pipeline_shutdown");
                        break;
                    }
                    continue;
                }
                next = source.next_frame() => next,
            };

            match next {
                Ok(Some(frame)) => {
                    let report = self.process_frame(&frame).await;
                    frames += 1;
                    events += report.events.len() as u64;
                }
                Ok(None) => {
                    info!(frames = %frames, "end_of_stream");
                    break;
                }
                Err(e) => {
                    error!(frames = %frames, error = %format!("{e:#}"), "frame_source_failed");
                    break;
                }
            }
        }

        let state = self.policy.state().clone();
        info!(
            frames = %frames,
            events = %events,
            health = %state.health_units(),
            status = %state.status(),
            speeding_count = %state.speeding_count(),
            "pipeline_stopped"
        );
        RunSummary { frames, events, state }
    }

    pub fn policy_state(&self) -> &PolicyState {
        self.policy.state()
    }

    pub fn active_tracks(&self) -> usize {
        self.registry.len()
    }
}
