//! License-plate lookup keyed by track identity
//!
//! The OCR worker is the only writer; the frame loop reads it to raise the
//! emergency override and prunes entries of removed tracks. A reading is
//! replaced only when the new one takes precedence:
//! - no reading yet, or
//! - the new reading carries the emergency marker, or
//! - it is more confident and the current one is not an emergency reading.

use crate::domain::types::{BBox, CropRegion, TrackId};
use crate::io::vision::RawReading;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;

const MIN_PLATE_LEN: usize = 4;

/// Accepted plate reading, box in frame coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateReading {
    pub text: String,
    pub confidence: f64,
    pub bbox: BBox,
    pub emergency: bool,
}

impl PlateReading {
    /// Whether this reading should replace `current`
    pub fn supersedes(&self, current: Option<&PlateReading>) -> bool {
        match current {
            None => true,
            Some(_) if self.emergency => true,
            Some(cur) => self.confidence > cur.confidence && !cur.emergency,
        }
    }
}

/// Normalizes raw recognizer output and rejects weak readings
#[derive(Debug, Clone)]
pub struct PlateFilter {
    min_confidence: f64,
    emergency_marker: String,
}

impl PlateFilter {
    pub fn new(min_confidence: f64, emergency_marker: &str) -> Self {
        Self { min_confidence, emergency_marker: normalize(emergency_marker) }
    }

    /// Accept a raw reading taken from `region`, mapping its box back to the frame
    pub fn accept(&self, raw: &RawReading, region: CropRegion) -> Option<PlateReading> {
        let text = normalize(&raw.text);
        if text.len() < MIN_PLATE_LEN || !(raw.confidence > self.min_confidence) {
            return None;
        }
        let emergency = !self.emergency_marker.is_empty() && text.contains(&self.emergency_marker);
        let bbox = BBox::new(raw.bbox.x + region.x as f64, raw.bbox.y + region.y as f64, raw.bbox.w, raw.bbox.h);
        Some(PlateReading { text, confidence: raw.confidence, bbox, emergency })
    }
}

/// Uppercase ASCII alphanumerics only
pub fn normalize(text: &str) -> String {
    text.chars().filter(char::is_ascii_alphanumeric).map(|c| c.to_ascii_uppercase()).collect()
}

/// Shared plate lookup
#[derive(Default)]
pub struct PlateTable {
    readings: RwLock<FxHashMap<TrackId, PlateReading>>,
}

impl PlateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `reading` if it takes precedence over the current one
    pub fn offer(&self, id: TrackId, reading: PlateReading) -> bool {
        let mut readings = self.readings.write();
        if !reading.supersedes(readings.get(&id)) {
            return false;
        }
        readings.insert(id, reading);
        true
    }

    pub fn get(&self, id: TrackId) -> Option<PlateReading> {
        self.readings.read().get(&id).cloned()
    }

    pub fn is_emergency(&self, id: TrackId) -> bool {
        self.readings.read().get(&id).is_some_and(|r| r.emergency)
    }

    pub fn remove(&self, id: TrackId) -> Option<PlateReading> {
        self.readings.write().remove(&id)
    }

    /// Drop entries written after their track was already removed
    pub fn retain_live<F>(&self, mut is_live: F) -> usize
    where
        F: FnMut(TrackId) -> bool,
    {
        let mut readings = self.readings.write();
        let before = readings.len();
        readings.retain(|id, _| is_live(*id));
        before - readings.len()
    }

    pub fn len(&self) -> usize {
        self.readings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(text: &str, confidence: f64, emergency: bool) -> PlateReading {
        PlateReading { text: text.to_string(), confidence, bbox: BBox::new(0.0, 0.0, 1.0, 1.0), emergency }
    }

    fn raw(text: &str, confidence: f64) -> RawReading {
        RawReading { bbox: BBox::new(5.0, 6.0, 40.0, 12.0), text: text.to_string(), confidence }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("ab-12 3c"), "AB123C");
        assert_eq!(normalize("  .. "), "");
    }

    #[test]
    fn test_filter_rejects_short_and_weak_readings() {
        let filter = PlateFilter::new(0.4, "MAI");
        let region = CropRegion { x: 0, y: 0, width: 100, height: 100 };
        assert!(filter.accept(&raw("AB1", 0.9), region).is_none());
        assert!(filter.accept(&raw("A-B-1", 0.9), region).is_none());
        assert!(filter.accept(&raw("AB12", 0.4), region).is_none());
        assert!(filter.accept(&raw("AB12", 0.41), region).is_some());
    }

    #[test]
    fn test_filter_maps_box_to_frame_and_flags_marker() {
        let filter = PlateFilter::new(0.4, "MAI");
        let region = CropRegion { x: 100, y: 200, width: 80, height: 60 };
        let accepted = filter.accept(&raw("mai 1234", 0.8), region).unwrap();
        assert_eq!(accepted.text, "MAI1234");
        assert!(accepted.emergency);
        assert_eq!(accepted.bbox, BBox::new(105.0, 206.0, 40.0, 12.0));
    }

    #[test]
    fn test_precedence_rules() {
        let table = PlateTable::new();
        let id = TrackId(1);

        assert!(table.offer(id, reading("AB1234", 0.5, false)));
        assert!(!table.offer(id, reading("AB1235", 0.45, false)));
        assert!(table.offer(id, reading("AB1236", 0.9, false)));

        // Emergency always wins, even when less confident
        assert!(table.offer(id, reading("MAI001", 0.42, true)));
        assert!(table.is_emergency(id));

        // Once emergency, a more confident normal reading cannot replace it
        assert!(!table.offer(id, reading("AB9999", 0.99, false)));
        assert_eq!(table.get(id).map(|r| r.text), Some("MAI001".to_string()));
    }

    #[test]
    fn test_retain_live_drops_late_writes() {
        let table = PlateTable::new();
        table.offer(TrackId(1), reading("AB1234", 0.5, false));
        table.offer(TrackId(2), reading("CD5678", 0.5, false));
        assert_eq!(table.retain_live(|id| id == TrackId(2)), 1);
        assert!(table.get(TrackId(1)).is_none());
        assert_eq!(table.len(), 1);
    }
}
