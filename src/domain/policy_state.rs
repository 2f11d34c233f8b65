//! Process-wide enforcement state: bump health and speeding count
//!
//! Owned by the policy engine and passed around explicitly. Every mutation
//! keeps the values inside their documented bounds.

use serde::{Deserialize, Serialize, Serializer};

/// Upper bound (and default) of the bump health scale
pub const MAX_HEALTH: f64 = 10_000.0;

const GOOD_THRESHOLD: f64 = 7_000.0;
const DAMAGED_THRESHOLD: f64 = 3_000.0;

/// Status label derived from health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BumpStatus {
    Good,
    Damaged,
    Critical,
}

impl BumpStatus {
    /// Good >= 7000, Damaged >= 3000, Critical below
    pub fn from_health(health: f64) -> Self {
        if health >= GOOD_THRESHOLD {
            BumpStatus::Good
        } else if health >= DAMAGED_THRESHOLD {
            BumpStatus::Damaged
        } else {
            BumpStatus::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BumpStatus::Good => "Good",
            BumpStatus::Damaged => "Damaged",
            BumpStatus::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for BumpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the remotely persisted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BumpRecord {
    #[serde(default, serialize_with = "whole_units")]
    pub health: Option<f64>,
    #[serde(default)]
    pub status: Option<BumpStatus>,
    #[serde(default)]
    pub car_count: Option<u64>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Cumulative health and speeding count
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyState {
    health: f64,
    speeding_count: u64,
}

impl Default for PolicyState {
    fn default() -> Self {
        Self { health: MAX_HEALTH, speeding_count: 0 }
    }
}

impl PolicyState {
    pub fn new(health: f64, speeding_count: u64) -> Self {
        Self { health: clamp_health(health), speeding_count }
    }

    /// Build from a loaded record, filling absent fields from the default
    pub fn from_record(record: &BumpRecord) -> Self {
        let default = Self::default();
        Self::new(
            record.health.unwrap_or(default.health),
            record.car_count.unwrap_or(default.speeding_count),
        )
    }

    pub fn health(&self) -> f64 {
        self.health
    }

    /// Health as pushed to the remote store: whole units within bounds
    pub fn health_units(&self) -> u32 {
        self.health.floor() as u32
    }

    pub fn speeding_count(&self) -> u64 {
        self.speeding_count
    }

    pub fn status(&self) -> BumpStatus {
        BumpStatus::from_health(self.health)
    }

    /// Subtract `damage` from health, saturating at 0. Returns the applied amount.
    pub fn apply_damage(&mut self, damage: f64) -> f64 {
        if !damage.is_finite() || damage <= 0.0 {
            return 0.0;
        }
        let before = self.health;
        self.health = clamp_health(self.health - damage);
        before - self.health
    }

    /// Increment the speeding counter, saturating at `u64::MAX`
    pub fn record_speeding(&mut self) -> u64 {
        self.speeding_count = self.speeding_count.saturating_add(1);
        self.speeding_count
    }

    /// Snapshot for the remote store
    pub fn to_record(&self, last_updated: String) -> BumpRecord {
        BumpRecord {
            health: Some(self.health_units() as f64),
            status: Some(self.status()),
            car_count: Some(self.speeding_count),
            last_updated: Some(last_updated),
        }
    }
}

/// Health column is an integer; the store rejects fractional input
fn whole_units<S: Serializer>(health: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
    match health {
        Some(h) => s.serialize_some(&(clamp_health(*h).floor() as u32)),
        None => s.serialize_none(),
    }
}

fn clamp_health(health: f64) -> f64 {
    if health.is_nan() {
        return 0.0;
    }
    health.clamp(0.0, MAX_HEALTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = PolicyState::default();
        assert_eq!(state.health(), 10_000.0);
        assert_eq!(state.speeding_count(), 0);
        assert_eq!(state.status(), BumpStatus::Good);
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(BumpStatus::from_health(10_000.0), BumpStatus::Good);
        assert_eq!(BumpStatus::from_health(7_000.0), BumpStatus::Good);
        assert_eq!(BumpStatus::from_health(6_999.9), BumpStatus::Damaged);
        assert_eq!(BumpStatus::from_health(3_000.0), BumpStatus::Damaged);
        assert_eq!(BumpStatus::from_health(2_999.0), BumpStatus::Critical);
        assert_eq!(BumpStatus::from_health(0.0), BumpStatus::Critical);
    }

    #[test]
    fn test_damage_saturates_at_zero() {
        let mut state = PolicyState::new(50.0, 0);
        let applied = state.apply_damage(80.0);
        assert_eq!(applied, 50.0);
        assert_eq!(state.health(), 0.0);
        assert_eq!(state.apply_damage(10.0), 0.0);
        assert_eq!(state.health(), 0.0);
    }

    #[test]
    fn test_health_stays_bounded_under_arbitrary_damage() {
        let mut state = PolicyState::default();
        let damages = [16.0, -5.0, f64::NAN, 1e9, f64::INFINITY, 0.0, 42.25];
        for d in damages {
            state.apply_damage(d);
            assert!((0.0..=MAX_HEALTH).contains(&state.health()));
        }
        assert_eq!(state.health(), 0.0);
    }

    #[test]
    fn test_new_clamps_out_of_range_health() {
        assert_eq!(PolicyState::new(25_000.0, 0).health(), MAX_HEALTH);
        assert_eq!(PolicyState::new(-3.0, 0).health(), 0.0);
    }

    #[test]
    fn test_from_record_fills_missing_fields() {
        let record = BumpRecord { health: Some(4200.0), status: None, car_count: None, last_updated: None };
        let state = PolicyState::from_record(&record);
        assert_eq!(state.health(), 4200.0);
        assert_eq!(state.speeding_count(), 0);
        assert_eq!(state.status(), BumpStatus::Damaged);
    }

    #[test]
    fn test_to_record_pushes_whole_units() {
        let mut state = PolicyState::default();
        state.apply_damage(12.25);
        state.record_speeding();
        let record = state.to_record("2026-01-01T00:00:00Z".to_string());
        assert_eq!(record.health, Some(9987.0));
        assert_eq!(record.status, Some(BumpStatus::Good));
        assert_eq!(record.car_count, Some(1));
    }

    #[test]
    fn test_record_serializes_health_as_integer() {
        let record = PolicyState::new(8123.9, 4).to_record("2026-01-01T00:00:00.000Z".to_string());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["health"], serde_json::json!(8123));
        assert_eq!(json["status"], "Good");
        assert_eq!(json["car_count"], 4);

        let loaded: BumpRecord = serde_json::from_str(r#"{"health": 4200, "status": "Damaged"}"#).unwrap();
        assert_eq!(loaded.health, Some(4200.0));
        assert!(loaded.car_count.is_none());
    }

    #[test]
    fn test_speeding_count_saturates() {
        let mut state = PolicyState::new(MAX_HEALTH, u64::MAX - 1);
        assert_eq!(state.record_speeding(), u64::MAX);
        assert_eq!(state.record_speeding(), u64::MAX);
    }
}
