//! Event policy engine
//!
//! Classifies every live track against the speed limit and fires at most one
//! policy event per track lifetime, depending on the deployment mode:
//! - `damage`: speeding AND center at or past the geofence line subtracts
//!   (speed/10)^2 from bump health
//! - `count`: the first speeding classification increments the speeding count
//!
//! Also produces the frame-level decision consumed by the command throttler.

use crate::domain::geometry::center;
use crate::domain::policy_state::{BumpStatus, PolicyState};
use crate::domain::track::{OneShot, SpeedClass, Track};
use crate::domain::types::TrackId;
use crate::infra::config::{Config, PolicyMode};
use crate::services::registry::TrackRegistry;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEventKind {
    Damage,
    Speeding,
}

impl PolicyEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyEventKind::Damage => "damage",
            PolicyEventKind::Speeding => "speeding",
        }
    }
}

/// A fired one-shot event and the policy state it produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyEvent {
    pub track_id: TrackId,
    pub kind: PolicyEventKind,
    pub speed: f64,
    /// Health actually subtracted (0 for count events)
    pub damage: f64,
    pub health: f64,
    pub status: BumpStatus,
    pub speeding_count: u64,
}

/// Frame-level summary for the actuator
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameDecision {
    pub any_speeding: bool,
    /// Highest smoothed speed among speeding tracks
    pub max_speeding_speed: Option<f64>,
    /// A live track carries an emergency plate reading
    pub emergency: bool,
}

pub struct PolicyEngine {
    mode: PolicyMode,
    limit: f64,
    geofence_y: f64,
    state: PolicyState,
}

impl PolicyEngine {
    pub fn new(config: &Config, state: PolicyState) -> Self {
        info!(
            mode = %config.policy_mode().as_str(),
            limit = %config.speed_limit(),
            geofence_y = %config.geofence_y(),
            health = %state.health(),
            speeding_count = %state.speeding_count(),
            "policy_engine_initialized"
        );
        Self {
            mode: config.policy_mode(),
            limit: config.speed_limit(),
            geofence_y: config.geofence_y(),
            state,
        }
    }

    pub fn state(&self) -> &PolicyState {
        &self.state
    }

    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    /// Evaluate every live track once for this frame.
    ///
    /// `is_emergency` reports whether a track carries an emergency plate.
    pub fn evaluate<F>(
        &mut self,
        registry: &mut TrackRegistry,
        is_emergency: F,
    ) -> (Vec<PolicyEvent>, FrameDecision)
    where
        F: Fn(TrackId) -> bool,
    {
        let mut events = Vec::new();
        let mut decision = FrameDecision::default();

        for view in registry.policy_views() {
            if is_emergency(view.id) {
                decision.emergency = true;
                if view.flags.fire(OneShot::EmergencySeen) {
                    warn!(track_id = %view.id, "emergency_vehicle_detected");
                }
            }

            let speed = match (SpeedClass::classify(view.speed, self.limit), view.speed) {
                (SpeedClass::Speeding, Some(speed)) => speed,
                _ => continue,
            };
            decision.any_speeding = true;
            decision.max_speeding_speed =
                Some(decision.max_speeding_speed.map_or(speed, |max| max.max(speed)));

            let event = match self.mode {
                PolicyMode::Damage => {
                    if center(view.bbox).y < self.geofence_y || !view.flags.fire(OneShot::DamageApplied) {
                        continue;
                    }
                    let damage = (speed / 10.0).powi(2);
                    let applied = self.state.apply_damage(damage);
                    info!(
                        track_id = %view.id,
                        speed = format!("{:.1}", speed),
                        damage = format!("{:.2}", applied),
                        health = format!("{:.1}", self.state.health()),
                        status = %self.state.status(),
                        "damage_event"
                    );
                    self.snapshot(view.id, PolicyEventKind::Damage, speed, applied)
                }
                PolicyMode::Count => {
                    if !view.flags.fire(OneShot::SpeedingCounted) {
                        continue;
                    }
                    let count = self.state.record_speeding();
                    info!(
                        track_id = %view.id,
                        speed = format!("{:.1}", speed),
                        speeding_count = %count,
                        "speeding_event"
                    );
                    self.snapshot(view.id, PolicyEventKind::Speeding, speed, 0.0)
                }
            };
            events.push(event);
        }

        (events, decision)
    }

    /// Final bookkeeping for a removed track. Nothing fires retroactively.
    pub fn on_track_removed(&mut self, track: &Track) {
        debug!(
            track_id = %track.id,
            speed = ?track.speed,
            lifetime_secs = format!("{:.2}", track.prev_ts.max(track.created_ts) - track.created_ts),
            damage_applied = %track.flags.is_set(OneShot::DamageApplied),
            speeding_counted = %track.flags.is_set(OneShot::SpeedingCounted),
            "track_retired"
        );
    }

    fn snapshot(&self, track_id: TrackId, kind: PolicyEventKind, speed: f64, damage: f64) -> PolicyEvent {
        PolicyEvent {
            track_id,
            kind,
            speed,
            damage,
            health: self.state.health(),
            status: self.state.status(),
            speeding_count: self.state.speeding_count(),
        }
    }
}
