//! Track registry - owns every live track and its visual tracker
//!
//! Tracks are kept in a BTreeMap so every pass visits them in ascending
//! identity order. Identities come from a monotonically increasing counter
//! and are never reused, even after removal.

use crate::domain::track::{OneShotFlags, Track};
use crate::domain::types::{BBox, Frame, TrackId};
use crate::infra::config::Config;
use crate::io::vision::{TrackerFactory, VisualTracker};
use crate::services::speed::SpeedEstimator;
use std::collections::BTreeMap;
use tracing::{debug, trace};

struct Entry {
    track: Track,
    tracker: Box<dyn VisualTracker>,
}

/// Borrowed view handed to the policy engine: read-only position and speed,
/// mutable one-shot flags
pub struct PolicyView<'a> {
    pub id: TrackId,
    pub bbox: &'a BBox,
    pub speed: Option<f64>,
    pub flags: &'a mut OneShotFlags,
}

pub struct TrackRegistry {
    entries: BTreeMap<TrackId, Entry>,
    next_id: u64,
    quality_floor: f64,
    exit_grace_frames: u32,
}

impl TrackRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
            quality_floor: config.quality_floor(),
            exit_grace_frames: config.exit_grace_frames(),
        }
    }

    /// Allocate a fresh identity and start a tracker on `bbox`
    pub fn create(
        &mut self,
        frame: &Frame,
        bbox: BBox,
        factory: &mut dyn TrackerFactory,
    ) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;

        let tracker = factory.start(frame, &bbox);
        let track = Track::new(id, bbox, frame.ts, self.quality_floor);
        self.entries.insert(id, Entry { track, tracker });

        debug!(track_id = %id, x = %bbox.x, y = %bbox.y, w = %bbox.w, h = %bbox.h, ts = %frame.ts, "track_created");
        id
    }

    /// Drive every tracker one frame forward.
    ///
    /// Returns the identities whose quality stayed below the floor for longer
    /// than the exit grace. They are not removed here; callers pass each one
    /// to [`remove`](Self::remove).
    pub fn update_all(&mut self, frame: &Frame) -> Vec<TrackId> {
        let mut expired = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            let quality = entry.tracker.update(frame);
            let track = &mut entry.track;
            track.quality = quality;
            track.bbox = entry.tracker.position();

            // NaN quality counts as lost
            if quality >= self.quality_floor {
                track.low_quality_frames = 0;
                continue;
            }
            track.low_quality_frames = track.low_quality_frames.saturating_add(1);
            trace!(track_id = %id, quality = %quality, low_frames = %track.low_quality_frames, "track_low_quality");
            if track.low_quality_frames > self.exit_grace_frames {
                expired.push(*id);
            }
        }
        expired
    }

    /// Evict a track with all of its per-track state
    pub fn remove(&mut self, id: TrackId) -> Option<Track> {
        self.entries.remove(&id).map(|entry| entry.track)
    }

    /// Take a speed sample for every track whose previous sample is old enough.
    ///
    /// On an accepted sample the previous box and timestamp advance to the
    /// current ones; otherwise they are left untouched.
    pub fn sample_speeds(&mut self, now: f64, estimator: &SpeedEstimator) -> usize {
        let mut sampled = 0;
        for (id, entry) in self.entries.iter_mut() {
            let track = &mut entry.track;
            let dt = now - track.prev_ts;
            if !estimator.accepts(dt) {
                continue;
            }
            let instant = estimator.estimate(&track.prev_bbox, &track.bbox, dt);
            let smoothed = estimator.smooth(track.speed, instant);
            track.speed = Some(smoothed);
            track.prev_bbox = track.bbox;
            track.prev_ts = now;
            sampled += 1;
            trace!(track_id = %id, dt = %dt, instant = %instant, smoothed = %smoothed, "speed_sample");
        }
        sampled
    }

    /// First track, in ascending identity order, whose box satisfies `pred`
    pub fn find_first<F>(&self, mut pred: F) -> Option<TrackId>
    where
        F: FnMut(&BBox) -> bool,
    {
        self.entries.iter().find(|(_, entry)| pred(&entry.track.bbox)).map(|(id, _)| *id)
    }

    pub fn policy_views(&mut self) -> impl Iterator<Item = PolicyView<'_>> {
        self.entries.values_mut().map(|entry| {
            let Track { id, bbox, speed, flags, .. } = &mut entry.track;
            PolicyView { id: *id, bbox: &*bbox, speed: *speed, flags }
        })
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.entries.values().map(|entry| &entry.track)
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.entries.get(&id).map(|entry| &entry.track)
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::domain::track::OneShot;

    fn bbox(x: f64, y: f64) -> BBox {
        BBox::new(x, y, 50.0, 50.0)
    }

    #[test]
    fn test_ids_are_monotonic_and_never_reused() {
        let mut registry = TrackRegistry::new(&Config::default());
        let mut factory = ScriptedFactory::default();
        let f = frame(1, 0.0);

        let a = registry.create(&f, bbox(0.0, 0.0), &mut factory);
        let b = registry.create(&f, bbox(100.0, 0.0), &mut factory);
        assert!(registry.remove(b).is_some());
        let c = registry.create(&f, bbox(200.0, 0.0), &mut factory);

        assert_eq!(a, TrackId(1));
        assert_eq!(b, TrackId(2));
        assert_eq!(c, TrackId(3));
        assert!(!registry.contains(b));
    }

    #[test]
    fn test_low_quality_expires_immediately_without_grace() {
        let mut registry = TrackRegistry::new(&Config::default());
        let mut factory = ScriptedFactory {
            scripts: vec![vec![(9.0, bbox(0.0, 0.0)), (6.9, bbox(5.0, 0.0))]],
            started: 0,
        };
        let id = registry.create(&frame(1, 0.0), bbox(0.0, 0.0), &mut factory);

        assert!(registry.update_all(&frame(2, 0.1)).is_empty());
        assert_eq!(registry.update_all(&frame(3, 0.2)), vec![id]);
        // update_all only reports; removal is explicit
        assert!(registry.contains(id));
    }

    #[test]
    fn test_grace_counter_resets_on_good_frame() {
        let config = Config::default().with_exit_grace_frames(2);
        let mut registry = TrackRegistry::new(&config);
        let b = bbox(0.0, 0.0);
        let mut factory = ScriptedFactory {
            scripts: vec![vec![(1.0, b), (1.0, b), (8.0, b), (1.0, b), (1.0, b), (1.0, b)]],
            started: 0,
        };
        let id = registry.create(&frame(1, 0.0), b, &mut factory);

        let mut expired_at = None;
        for i in 0..6u64 {
            if !registry.update_all(&frame(i + 2, i as f64)).is_empty() {
                expired_at = Some(i);
                break;
            }
        }
        // Two low frames, reset, then the third consecutive low frame expires
        assert_eq!(expired_at, Some(5));
        assert_eq!(registry.get(id).map(|t| t.low_quality_frames), Some(3));
    }

    #[test]
    fn test_speed_sampling_advances_previous_only_on_valid_sample() {
        let config = Config::default();
        let estimator = SpeedEstimator::new(&config);
        let mut registry = TrackRegistry::new(&config);
        let mut factory = ScriptedFactory {
            scripts: vec![vec![(10.0, bbox(100.0, 100.0)), (10.0, bbox(135.0, 100.0))]],
            started: 0,
        };
        let id = registry.create(&frame(1, 0.0), bbox(100.0, 100.0), &mut factory);

        // Same timestamp as creation: no sample
        assert_eq!(registry.sample_speeds(0.0, &estimator), 0);
        assert!(registry.get(id).and_then(|t| t.speed).is_none());

        registry.update_all(&frame(2, 0.005));
        assert_eq!(registry.sample_speeds(0.005, &estimator), 0);
        assert_eq!(registry.get(id).map(|t| t.prev_ts), Some(0.0));

        registry.update_all(&frame(3, 1.0));
        assert_eq!(registry.sample_speeds(1.0, &estimator), 1);
        let track = registry.get(id).unwrap();
        assert!((track.speed.unwrap() - 3.6).abs() < 1e-9);
        assert_eq!(track.prev_bbox, bbox(135.0, 100.0));
        assert_eq!(track.prev_ts, 1.0);
    }

    #[test]
    fn test_removal_drops_flags_with_the_track() {
        let mut registry = TrackRegistry::new(&Config::default());
        let mut factory = ScriptedFactory::default();
        let id = registry.create(&frame(1, 0.0), bbox(0.0, 0.0), &mut factory);
        for view in registry.policy_views() {
            view.flags.fire(OneShot::DamageApplied);
        }

        let removed = registry.remove(id).unwrap();
        assert!(removed.flags.is_set(OneShot::DamageApplied));
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_first_uses_ascending_order() {
        let mut registry = TrackRegistry::new(&Config::default());
        let mut factory = ScriptedFactory::default();
        let f = frame(1, 0.0);
        registry.create(&f, bbox(0.0, 0.0), &mut factory);
        registry.create(&f, bbox(10.0, 0.0), &mut factory);
        assert_eq!(registry.find_first(|_| true), Some(TrackId(1)));
        assert_eq!(registry.find_first(|b| b.x > 5.0), Some(TrackId(2)));
    }
}
