//! Policy event audit log
//!
//! Every fired policy event is appended as one JSON object per line to the
//! file named in config. An empty path disables the log.

use crate::domain::policy_state::BumpStatus;
use crate::domain::types::{epoch_ms, TrackId};
use crate::services::policy::{PolicyEvent, PolicyEventKind};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct EventLine<'a> {
    id: String,
    ts: u64,
    site: &'a str,
    track_id: TrackId,
    kind: PolicyEventKind,
    speed: f64,
    damage: f64,
    health: f64,
    status: BumpStatus,
    count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    plate: Option<&'a str>,
}

pub struct EventLog {
    file_path: Option<String>,
    site_id: String,
}

impl EventLog {
    pub fn new(file_path: &str, site_id: &str) -> Self {
        let file_path = if file_path.trim().is_empty() {
            info!("event_log_disabled");
            None
        } else {
            info!(file_path = %file_path, "event_log_initialized");
            Some(file_path.to_string())
        };
        Self { file_path, site_id: site_id.to_string() }
    }

    /// Append one event. Returns true if written.
    pub fn write_event(&self, event: &PolicyEvent, plate: Option<&str>) -> bool {
        let Some(file_path) = self.file_path.as_deref() else {
            return false;
        };
        let line = EventLine {
            id: Uuid::now_v7().to_string(),
            ts: epoch_ms(),
            site: &self.site_id,
            track_id: event.track_id,
            kind: event.kind,
            speed: round2(event.speed),
            damage: round2(event.damage),
            health: round2(event.health),
            status: event.status,
            count: event.speeding_count,
            plate,
        };
        let json = match serde_json::to_string(&line) {
            Ok(json) => json,
            Err(e) => {
                error!(track_id = %event.track_id, error = %e, "event_log_encode_failed");
                return false;
            }
        };

        match append_line(file_path, &json) {
            Ok(()) => {
                debug!(file = %file_path, track_id = %event.track_id, kind = %event.kind.as_str(), "event_logged");
                true
            }
            Err(e) => {
                error!(track_id = %event.track_id, error = %e, "event_log_write_failed");
                false
            }
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn append_line(file_path: &str, line: &str) -> std::io::Result<()> {
    let path = Path::new(file_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}
