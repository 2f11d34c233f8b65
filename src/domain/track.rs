//! Per-vehicle track state

use crate::domain::types::{BBox, TrackId};
use serde::Serialize;

/// Markers that flip false -> true at most once per track lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OneShot {
    /// Counted toward the cumulative speeding counter
    SpeedingCounted = 0b001,
    /// Accrued wear damage on the bump
    DamageApplied = 0b010,
    /// Reported as an emergency vehicle
    EmergencySeen = 0b100,
}

impl OneShot {
    pub fn as_str(&self) -> &'static str {
        match self {
            OneShot::SpeedingCounted => "speeding_counted",
            OneShot::DamageApplied => "damage_applied",
            OneShot::EmergencySeen => "emergency_seen",
        }
    }
}

/// Set of one-shot markers. There is no way to clear a marker once set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OneShotFlags(u8);

impl OneShotFlags {
    #[inline]
    pub fn is_set(&self, flag: OneShot) -> bool {
        self.0 & flag as u8 != 0
    }

    /// Set `flag`, returning true only on the call that actually flipped it
    #[inline]
    pub fn fire(&mut self, flag: OneShot) -> bool {
        if self.is_set(flag) {
            return false;
        }
        self.0 |= flag as u8;
        true
    }
}

/// Speed classification of a track against the configured limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedClass {
    /// No speed measurement yet
    Unknown,
    Safe,
    Speeding,
}

impl SpeedClass {
    #[inline]
    pub fn classify(speed: Option<f64>, limit: f64) -> Self {
        match speed {
            None => SpeedClass::Unknown,
            Some(s) if s > limit => SpeedClass::Speeding,
            Some(_) => SpeedClass::Safe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedClass::Unknown => "unknown",
            SpeedClass::Safe => "safe",
            SpeedClass::Speeding => "speeding",
        }
    }
}

/// One vehicle believed to be visible
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    /// Box reported by the tracker on the latest frame
    pub bbox: BBox,
    /// Box at the last accepted speed sample (creation box until then)
    pub prev_bbox: BBox,
    /// Stream time of `prev_bbox`
    pub prev_ts: f64,
    /// Smoothed speed, `None` until the first valid sample
    pub speed: Option<f64>,
    pub quality: f64,
    /// Consecutive frames below the quality floor
    pub low_quality_frames: u32,
    pub created_ts: f64,
    pub flags: OneShotFlags,
}

impl Track {
    pub fn new(id: TrackId, bbox: BBox, ts: f64, quality: f64) -> Self {
        Self {
            id,
            bbox,
            prev_bbox: bbox,
            prev_ts: ts,
            speed: None,
            quality,
            low_quality_frames: 0,
            created_ts: ts,
            flags: OneShotFlags::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_fires_once() {
        let mut flags = OneShotFlags::default();
        assert!(!flags.is_set(OneShot::DamageApplied));
        assert!(flags.fire(OneShot::DamageApplied));
        assert!(!flags.fire(OneShot::DamageApplied));
        assert!(!flags.fire(OneShot::DamageApplied));
        assert!(flags.is_set(OneShot::DamageApplied));
    }

    #[test]
    fn test_one_shot_flags_are_independent() {
        let mut flags = OneShotFlags::default();
        assert!(flags.fire(OneShot::SpeedingCounted));
        assert!(!flags.is_set(OneShot::DamageApplied));
        assert!(!flags.is_set(OneShot::EmergencySeen));
        assert!(flags.fire(OneShot::EmergencySeen));
        assert!(flags.is_set(OneShot::SpeedingCounted));
    }

    #[test]
    fn test_speed_class() {
        assert_eq!(SpeedClass::classify(None, 35.0), SpeedClass::Unknown);
        assert_eq!(SpeedClass::classify(Some(35.0), 35.0), SpeedClass::Safe);
        assert_eq!(SpeedClass::classify(Some(35.1), 35.0), SpeedClass::Speeding);
    }

    #[test]
    fn test_new_track_seeds_previous_state() {
        let bbox = BBox::new(100.0, 100.0, 50.0, 50.0);
        let track = Track::new(TrackId(3), bbox, 2.5, 10.0);
        assert_eq!(track.prev_bbox, bbox);
        assert_eq!(track.prev_ts, 2.5);
        assert!(track.speed.is_none());
        assert_eq!(track.flags, OneShotFlags::default());
    }
}
