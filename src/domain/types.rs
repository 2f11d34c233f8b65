//! Shared types for the speed bump loop

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for track IDs to provide type safety
///
/// IDs are allocated by the registry in strictly increasing order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point in pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box in pixel space, left-top-width-height
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    #[inline]
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    #[inline(always)]
    pub fn left(&self) -> f64 {
        self.x
    }

    #[inline(always)]
    pub fn top(&self) -> f64 {
        self.y
    }

    #[inline(always)]
    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    #[inline(always)]
    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x, b.y, b.w, b.h]
    }
}

/// Raw frame pixels (packed RGB8, row-major)
#[derive(Debug, Clone)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl FrameImage {
    pub const CHANNELS: usize = 3;

    /// An image with dimensions but no pixel payload (replayed scenes)
    pub fn blank(width: u32, height: u32) -> Self {
        Self { width, height, data: Bytes::new() }
    }

    /// Copy the pixels under `region` out of the frame.
    ///
    /// Returns an empty payload when the frame carries no pixel data.
    pub fn crop(&self, region: CropRegion) -> Bytes {
        let expected = self.width as usize * self.height as usize * Self::CHANNELS;
        let fits = region.x + region.width <= self.width && region.y + region.height <= self.height;
        if self.data.len() < expected || region.is_empty() || !fits {
            return Bytes::new();
        }

        let stride = self.width as usize * Self::CHANNELS;
        let row_len = region.width as usize * Self::CHANNELS;
        let mut out = Vec::with_capacity(row_len * region.height as usize);
        for row in region.y..region.y + region.height {
            let start = row as usize * stride + region.x as usize * Self::CHANNELS;
            out.extend_from_slice(&self.data[start..start + row_len]);
        }
        Bytes::from(out)
    }
}

/// Integer pixel region clamped to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// Clamp a floating point box to `[0, frame_w) x [0, frame_h)`
    pub fn clamped(bbox: &BBox, frame_w: u32, frame_h: u32) -> Self {
        let x1 = bbox.left().max(0.0).min(frame_w as f64) as u32;
        let y1 = bbox.top().max(0.0).min(frame_h as f64) as u32;
        let x2 = bbox.right().max(0.0).min(frame_w as f64) as u32;
        let y2 = bbox.bottom().max(0.0).min(frame_h as f64) as u32;
        Self { x: x1, y: y1, width: x2.saturating_sub(x1), height: y2.saturating_sub(y1) }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_bbox(&self) -> BBox {
        BBox::new(self.x as f64, self.y as f64, self.width as f64, self.height as f64)
    }
}

/// One decoded video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in the stream, starting at 1 for the first frame read
    pub index: u64,
    /// Capture time in seconds since stream start
    pub ts: f64,
    pub image: Arc<FrameImage>,
}

impl Frame {
    pub fn new(index: u64, ts: f64, image: Arc<FrameImage>) -> Self {
        Self { index, ts, image }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height
    }
}
