use super::Pipeline;
use crate::domain::policy_state::PolicyState;
use crate::domain::types::{Frame, TrackId};
use crate::services::matcher;
use crate::services::policy::{PolicyEvent, PolicyEventKind};
use crate::services::throttler::ActuatorCommand;
use std::time::Instant;
use tracing::{debug, info};

/// What one frame did
#[derive(Debug, Default)]
pub struct FrameReport {
    pub expired: Vec<TrackId>,
    pub created: Vec<TrackId>,
    pub events: Vec<PolicyEvent>,
    /// Command written (or attempted) this frame, `None` when suppressed
    pub command: Option<ActuatorCommand>,
}

impl Pipeline {
    /// Run every per-frame step in order
    pub async fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let start = Instant::now();
        let mut report = FrameReport::default();

        // Tracker pass; lost tracks go before anything else looks at them
        report.expired = self.registry.update_all(frame);
        for &id in &report.expired {
            self.retire(id, frame.ts);
        }

        if frame.index % self.config.detect_every_n_frames() == 0 {
            report.created = self.handle_detection(frame);
        }

        self.registry.sample_speeds(frame.ts, &self.estimator);

        let plates = &self.plates;
        let (events, decision) = self.policy.evaluate(&mut self.registry, |id| plates.is_emergency(id));

        match self.throttler.next(&decision, frame.ts) {
            Some(command) => {
                self.actuator.send(command).await;
                report.command = Some(command);
            }
            None => self.metrics.record_command_suppressed(),
        }

        for event in &events {
            self.handle_policy_event(event).await;
        }
        report.events = events;

        if let Some(ocr) = self.ocr.as_mut() {
            ocr.dispatch(frame, &self.registry);
        }

        self.metrics.set_active_tracks(self.registry.len());
        self.metrics.set_health(self.policy.state().health_units());
        self.metrics.record_frame(start.elapsed().as_micros() as u64);
        report
    }

    fn handle_detection(&mut self, frame: &Frame) -> Vec<TrackId> {
        let detections = self.detector.detect(frame);
        self.metrics.record_detections(detections.len());

        let association = matcher::associate(&mut self.registry, frame, &detections, self.trackers.as_mut());
        for _ in &association.created {
            self.metrics.record_track_created();
        }

        // Readings written by late OCR jobs for tracks that are already gone
        let registry = &self.registry;
        let pruned = self.plates.retain_live(|id| registry.contains(id));

        debug!(
            frame = %frame.index,
            detections = %detections.len(),
            matched = %association.matched.len(),
            created = %association.created.len(),
            pruned_plates = %pruned,
            "detection_pass"
        );
        association.created.into_vec()
    }

    fn retire(&mut self, id: TrackId, ts: f64) {
        let Some(track) = self.registry.remove(id) else {
            return;
        };
        self.policy.on_track_removed(&track);
        let plate = self.plates.remove(id);
        if let Some(ocr) = self.ocr.as_mut() {
            ocr.forget(id);
        }
        self.metrics.record_track_expired();
        info!(
            track_id = %id,
            ts = %ts,
            speed = ?track.speed,
            plate = ?plate.as_ref().map(|p| p.text.as_str()),
            "track_expired"
        );
    }

    async fn handle_policy_event(&self, event: &PolicyEvent) {
        match event.kind {
            PolicyEventKind::Damage => self.metrics.record_damage_event(),
            PolicyEventKind::Speeding => self.metrics.record_speeding_event(),
        }

        let plate = self.plates.get(event.track_id).map(|p| p.text);
        self.event_log.write_event(event, plate.as_deref());

        // State as of this event, not the end of the frame
        let state = PolicyState::new(event.health, event.speeding_count);
        self.remote.push_state(&state).await;
    }
}
