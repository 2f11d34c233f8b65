//! IO modules - external system interfaces
//!
//! - `vision` - collaborator traits for frames, detection, tracking and OCR
//! - `scene` - JSONL scene replay implementing the vision traits
//! - `actuator` - serial command link to the bump controller
//! - `remote_store` - REST record store for health and speeding count
//! - `event_log` - policy events to file (JSONL format)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod actuator;
pub mod event_log;
pub mod prometheus;
pub mod remote_store;
pub mod scene;
pub mod vision;

// Re-export commonly used types
pub use actuator::{Actuator, ActuatorSink, SerialSink};
pub use event_log::EventLog;
pub use remote_store::{PostgrestStore, RemoteStore, RemoteSync};
pub use scene::{ReplayDetector, ReplayRecognizer, ReplaySource, ReplayTrackerFactory, Scene};
pub use vision::{Detector, FrameSource, PlateRecognizer, TrackerFactory, VisualTracker};
