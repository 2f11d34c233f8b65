//! Detection-to-track association
//!
//! A detection continues an existing track when the two boxes are mutually
//! centered (each holds the other's center). The first qualifying track in
//! ascending identity order wins. This is an O(n*m) scan and can pick the
//! wrong track when vehicles overlap heavily.
//!
//! Tracks created earlier in the same batch are candidates for later
//! detections, so duplicate detections of one vehicle collapse into a single
//! track. Matched trackers are never re-seeded and nothing is removed here.

use crate::domain::geometry::mutually_centered;
use crate::domain::types::{BBox, Frame, TrackId};
use crate::io::vision::TrackerFactory;
use crate::services::registry::TrackRegistry;
use smallvec::SmallVec;

/// Outcome of one association pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Association {
    /// (detection index, existing or same-batch track)
    pub matched: SmallVec<[(usize, TrackId); 8]>,
    /// Tracks created for unmatched detections, in detection order
    pub created: SmallVec<[TrackId; 8]>,
}

/// Associate `detections` against the registry, creating tracks for the unmatched
pub fn associate(
    registry: &mut TrackRegistry,
    frame: &Frame,
    detections: &[BBox],
    factory: &mut dyn TrackerFactory,
) -> Association {
    let mut association = Association::default();
    for (idx, det) in detections.iter().enumerate() {
        match registry.find_first(|track_box| mutually_centered(det, track_box)) {
            Some(id) => association.matched.push((idx, id)),
            None => association.created.push(registry.create(frame, *det, factory)),
        }
    }
    association
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::Config;
    use crate::services::registry::test_support::{frame, ScriptedFactory};

    #[test]
    fn test_identical_detection_matches_existing_track() {
        let mut registry = TrackRegistry::new(&Config::default());
        let mut factory = ScriptedFactory::default();
        let f = frame(5, 0.2);
        let b = BBox::new(300.0, 200.0, 80.0, 60.0);
        let id = registry.create(&f, b, &mut factory);

        let result = associate(&mut registry, &f, &[b], &mut factory);
        assert_eq!(result.matched.as_slice(), &[(0, id)]);
        assert!(result.created.is_empty());
        assert_eq!(registry.len(), 1);
        assert_eq!(factory.started, 1);
    }

    #[test]
    fn test_unmatched_detection_creates_track() {
        let mut registry = TrackRegistry::new(&Config::default());
        let mut factory = ScriptedFactory::default();
        let f = frame(5, 0.2);
        registry.create(&f, BBox::new(0.0, 0.0, 50.0, 50.0), &mut factory);

        let result = associate(&mut registry, &f, &[BBox::new(600.0, 300.0, 50.0, 50.0)], &mut factory);
        assert!(result.matched.is_empty());
        assert_eq!(result.created.as_slice(), &[TrackId(2)]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_detections_in_one_batch_collapse() {
        let mut registry = TrackRegistry::new(&Config::default());
        let mut factory = ScriptedFactory::default();
        let f = frame(5, 0.2);
        let det = BBox::new(400.0, 400.0, 60.0, 60.0);
        let near = BBox::new(405.0, 402.0, 60.0, 60.0);

        let result = associate(&mut registry, &f, &[det, near], &mut factory);
        assert_eq!(result.created.as_slice(), &[TrackId(1)]);
        assert_eq!(result.matched.as_slice(), &[(1, TrackId(1))]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_first_track_in_id_order_wins() {
        let mut registry = TrackRegistry::new(&Config::default());
        let mut factory = ScriptedFactory::default();
        let f = frame(5, 0.2);
        // Two overlapping tracks that both satisfy mutual containment with the detection
        let first = registry.create(&f, BBox::new(100.0, 100.0, 100.0, 100.0), &mut factory);
        registry.create(&f, BBox::new(110.0, 100.0, 100.0, 100.0), &mut factory);

        let result =
            associate(&mut registry, &f, &[BBox::new(105.0, 100.0, 100.0, 100.0)], &mut factory);
        assert_eq!(result.matched.as_slice(), &[(0, first)]);
    }

    #[test]
    fn test_empty_detections_are_a_no_op() {
        let mut registry = TrackRegistry::new(&Config::default());
        let mut factory = ScriptedFactory::default();
        let result = associate(&mut registry, &frame(5, 0.2), &[], &mut factory);
        assert_eq!(result, Association::default());
        assert!(registry.is_empty());
    }
}
