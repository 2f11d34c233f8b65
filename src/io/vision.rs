//! Vision collaborator interfaces
//!
//! The frame loop only talks to detection, tracking and OCR through these
//! traits. Production deployments plug in model-backed implementations;
//! `io::scene` provides replay implementations driven by a recorded scene.

use crate::domain::types::{BBox, CropRegion, Frame};
use async_trait::async_trait;
use bytes::Bytes;

/// Per-vehicle visual tracker started on one frame and box
pub trait VisualTracker: Send {
    /// Advance one frame and return the tracking quality
    fn update(&mut self, frame: &Frame) -> f64;

    /// Box after the latest update
    fn position(&self) -> BBox;
}

/// Creates a tracker for a newly detected vehicle
pub trait TrackerFactory: Send {
    fn start(&mut self, frame: &Frame, bbox: &BBox) -> Box<dyn VisualTracker>;
}

/// Periodic full-frame vehicle detector
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Vec<BBox>;
}

/// Source of decoded frames. `Ok(None)` marks end of stream.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> anyhow::Result<Option<Frame>>;
}

/// Image crop handed to the recognizer
#[derive(Debug, Clone)]
pub struct PlateCrop {
    /// Stream time of the frame the crop was cut from
    pub frame_ts: f64,
    /// Crop position in frame coordinates
    pub region: CropRegion,
    /// Packed RGB8 pixels of the region (empty for replayed scenes)
    pub pixels: Bytes,
}

/// One raw text reading; `bbox` is relative to the crop
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub bbox: BBox,
    pub text: String,
    pub confidence: f64,
}

/// License-plate OCR recognizer
#[async_trait]
pub trait PlateRecognizer: Send + Sync {
    async fn recognize(&self, crop: &PlateCrop) -> anyhow::Result<Vec<RawReading>>;
}
