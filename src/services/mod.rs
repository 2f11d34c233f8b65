//! Services - per-frame logic and loop state
//!
//! - `speed` - displacement to speed conversion and smoothing
//! - `registry` - live tracks, identities and tracker lifetimes
//! - `matcher` - detection-to-track association
//! - `policy` - speed classification and one-shot policy events
//! - `throttler` - actuator command selection and re-send suppression
//! - `plates` - plate reading filter and per-track plate table
//! - `ocr_worker` - background plate recognition
//! - `pipeline` - the frame loop tying everything together

pub mod matcher;
pub mod ocr_worker;
pub mod pipeline;
pub mod plates;
pub mod policy;
pub mod registry;
pub mod speed;
pub mod throttler;

// Re-export commonly used types
pub use ocr_worker::{OcrDispatcher, OcrJob, OcrWorker};
pub use pipeline::{Pipeline, PipelineIo, RunSummary};
pub use plates::PlateTable;
pub use policy::{FrameDecision, PolicyEngine, PolicyEvent, PolicyEventKind};
pub use throttler::{ActuatorCommand, CommandKind, CommandThrottler};
