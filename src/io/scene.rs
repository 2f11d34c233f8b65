//! Scene replay - offline collaborators driven by a recorded scene
//!
//! A scene is a JSONL file with one frame per line:
//! `{"t": 0.04, "vehicles": [{"id": 1, "bbox": [x, y, w, h], "plate": "AB1234"}]}`
//!
//! Frame `i` of the stream (1-based) is line `i` of the file. The detector
//! returns the ground-truth boxes, a tracker follows the vehicle it was
//! started on, and the recognizer reads the plate of the vehicle under a crop.

use crate::domain::geometry::{intersection_area, mutually_centered};
use crate::domain::types::{BBox, Frame, FrameImage};
use crate::io::vision::{
    Detector, FrameSource, PlateCrop, PlateRecognizer, RawReading, TrackerFactory, VisualTracker,
};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Quality a replay tracker reports while its vehicle is visible
pub const VISIBLE_QUALITY: f64 = 10.0;

fn default_plate_confidence() -> f64 {
    0.9
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneVehicle {
    pub id: u64,
    pub bbox: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
    #[serde(default = "default_plate_confidence")]
    pub plate_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneFrame {
    pub t: f64,
    #[serde(default)]
    pub vehicles: Vec<SceneVehicle>,
}

#[derive(Debug, Clone)]
pub struct Scene {
    frames: Vec<SceneFrame>,
    width: u32,
    height: u32,
}

impl Scene {
    pub fn new(frames: Vec<SceneFrame>, width: u32, height: u32) -> Self {
        Self { frames, width, height }
    }

    /// Load a JSONL scene file; blank lines are skipped
    pub fn load<P: AsRef<Path>>(path: P, width: u32, height: u32) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scene file {}", path.display()))?;
        let frames = parse_lines(&content)
            .with_context(|| format!("Failed to parse scene file {}", path.display()))?;
        info!(file = %path.display(), frames = %frames.len(), "scene_loaded");
        Ok(Self::new(frames, width, height))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Scene frame backing stream frame `index` (1-based)
    pub fn frame(&self, index: u64) -> Option<&SceneFrame> {
        let idx = usize::try_from(index).ok()?.checked_sub(1)?;
        self.frames.get(idx)
    }

    /// Latest scene frame at or before `ts`
    pub fn frame_at(&self, ts: f64) -> Option<&SceneFrame> {
        let after = self.frames.partition_point(|f| f.t <= ts);
        after.checked_sub(1).and_then(|idx| self.frames.get(idx))
    }
}

fn parse_lines(content: &str) -> anyhow::Result<Vec<SceneFrame>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<SceneFrame>(line).with_context(|| format!("line {}", n + 1))
        })
        .collect()
}

/// Frame source replaying the scene, optionally paced to its timestamps
pub struct ReplaySource {
    scene: Arc<Scene>,
    next: usize,
    realtime: bool,
    started: Option<Instant>,
}

impl ReplaySource {
    pub fn new(scene: Arc<Scene>, realtime: bool) -> Self {
        Self { scene, next: 0, realtime, started: None }
    }
}

#[async_trait]
impl FrameSource for ReplaySource {
    async fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        let Some(scene_frame) = self.scene.frames.get(self.next) else {
            debug!(frames = %self.next, "scene_end_of_stream");
            return Ok(None);
        };
        self.next += 1;

        if self.realtime {
            let started = *self.started.get_or_insert_with(Instant::now);
            let due = started + Duration::try_from_secs_f64(scene_frame.t).unwrap_or_default();
            tokio::time::sleep_until(due).await;
        }

        let image = Arc::new(FrameImage::blank(self.scene.width, self.scene.height));
        Ok(Some(Frame::new(self.next as u64, scene_frame.t, image)))
    }
}

/// Detector returning ground-truth boxes
pub struct ReplayDetector {
    scene: Arc<Scene>,
}

impl ReplayDetector {
    pub fn new(scene: Arc<Scene>) -> Self {
        Self { scene }
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Vec<BBox> {
        self.scene
            .frame(frame.index)
            .map(|f| f.vehicles.iter().map(|v| v.bbox).collect())
            .unwrap_or_default()
    }
}

/// Tracker following one ground-truth vehicle
pub struct ReplayTracker {
    scene: Arc<Scene>,
    vehicle_id: Option<u64>,
    bbox: BBox,
}

impl VisualTracker for ReplayTracker {
    fn update(&mut self, frame: &Frame) -> f64 {
        let Some(id) = self.vehicle_id else {
            return 0.0;
        };
        let found = self.scene.frame(frame.index).and_then(|f| f.vehicles.iter().find(|v| v.id == id));
        match found {
            Some(vehicle) => {
                self.bbox = vehicle.bbox;
                VISIBLE_QUALITY
            }
            None => 0.0,
        }
    }

    fn position(&self) -> BBox {
        self.bbox
    }
}

pub struct ReplayTrackerFactory {
    scene: Arc<Scene>,
}

impl ReplayTrackerFactory {
    pub fn new(scene: Arc<Scene>) -> Self {
        Self { scene }
    }
}

impl TrackerFactory for ReplayTrackerFactory {
    fn start(&mut self, frame: &Frame, bbox: &BBox) -> Box<dyn VisualTracker> {
        let vehicle_id = self.scene.frame(frame.index).and_then(|f| {
            f.vehicles
                .iter()
                .filter(|v| mutually_centered(&v.bbox, bbox))
                .max_by(|a, b| {
                    intersection_area(&a.bbox, bbox).total_cmp(&intersection_area(&b.bbox, bbox))
                })
                .map(|v| v.id)
        });
        Box::new(ReplayTracker { scene: self.scene.clone(), vehicle_id, bbox: *bbox })
    }
}

/// Recognizer reading the plate of the vehicle most covered by the crop
pub struct ReplayRecognizer {
    scene: Arc<Scene>,
}

impl ReplayRecognizer {
    pub fn new(scene: Arc<Scene>) -> Self {
        Self { scene }
    }
}

#[async_trait]
impl PlateRecognizer for ReplayRecognizer {
    async fn recognize(&self, crop: &PlateCrop) -> anyhow::Result<Vec<RawReading>> {
        let region = crop.region.as_bbox();
        let Some(frame) = self.scene.frame_at(crop.frame_ts) else {
            return Ok(Vec::new());
        };
        let best = frame
            .vehicles
            .iter()
            .map(|v| (intersection_area(&v.bbox, &region), v))
            .filter(|(overlap, _)| *overlap > 0.0)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, v)| v);

        let reading = best.and_then(|v| {
            v.plate.as_ref().map(|text| RawReading {
                // Lower middle of the crop, where a plate sits on a vehicle box
                bbox: BBox::new(region.w * 0.3, region.h * 0.7, region.w * 0.4, region.h * 0.15),
                text: text.clone(),
                confidence: v.plate_confidence,
            })
        });
        Ok(reading.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CropRegion;
    use std::io::Write;

    fn vehicle(id: u64, x: f64, plate: Option<&str>) -> SceneVehicle {
        SceneVehicle {
            id,
            bbox: BBox::new(x, 300.0, 80.0, 60.0),
            plate: plate.map(str::to_string),
            plate_confidence: 0.9,
        }
    }

    fn scene() -> Arc<Scene> {
        Arc::new(Scene::new(
            vec![
                SceneFrame { t: 0.0, vehicles: vec![vehicle(1, 100.0, Some("AB1234")), vehicle(2, 600.0, None)] },
                SceneFrame { t: 0.04, vehicles: vec![vehicle(1, 110.0, Some("AB1234"))] },
                SceneFrame { t: 0.08, vehicles: vec![] },
            ],
            1280,
            720,
        ))
    }

    #[test]
    fn test_load_skips_blank_lines_and_reports_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"t": 0.0, "vehicles": [{{"id": 1, "bbox": [1, 2, 3, 4]}}]}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"t": 0.04}}"#).unwrap();
        let scene = Scene::load(file.path(), 640, 480).unwrap();
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.frame(1).unwrap().vehicles[0].bbox, BBox::new(1.0, 2.0, 3.0, 4.0));
        assert!(scene.frame(2).unwrap().vehicles.is_empty());
        assert!(scene.frame(0).is_none());

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, r#"{{"t": 0.0}}"#).unwrap();
        writeln!(bad, "not json").unwrap();
        let err = format!("{:#}", Scene::load(bad.path(), 640, 480).unwrap_err());
        assert!(err.contains("line 2"), "{err}");
    }

    #[tokio::test]
    async fn test_source_replays_frames_then_ends() {
        let mut source = ReplaySource::new(scene(), false);
        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame().await.unwrap() {
            indices.push((frame.index, frame.ts));
        }
        assert_eq!(indices, vec![(1, 0.0), (2, 0.04), (3, 0.08)]);
    }

    #[test]
    fn test_tracker_follows_vehicle_until_gone() {
        let scene = scene();
        let mut source_frames = (1..=3u64)
            .map(|i| Frame::new(i, 0.04 * (i - 1) as f64, Arc::new(FrameImage::blank(1280, 720))));
        let first = source_frames.next().unwrap();

        let mut factory = ReplayTrackerFactory::new(scene.clone());
        let mut tracker = factory.start(&first, &BBox::new(100.0, 300.0, 80.0, 60.0));

        let second = source_frames.next().unwrap();
        assert_eq!(tracker.update(&second), VISIBLE_QUALITY);
        assert_eq!(tracker.position(), BBox::new(110.0, 300.0, 80.0, 60.0));

        let third = source_frames.next().unwrap();
        assert_eq!(tracker.update(&third), 0.0);
    }

    #[test]
    fn test_detector_returns_ground_truth() {
        let mut detector = ReplayDetector::new(scene());
        let frame = Frame::new(1, 0.0, Arc::new(FrameImage::blank(1280, 720)));
        assert_eq!(detector.detect(&frame).len(), 2);
    }

    #[tokio::test]
    async fn test_recognizer_reads_plate_under_crop() {
        let recognizer = ReplayRecognizer::new(scene());
        let crop = PlateCrop {
            frame_ts: 0.0,
            region: CropRegion { x: 100, y: 300, width: 80, height: 60 },
            pixels: bytes::Bytes::new(),
        };
        let readings = recognizer.recognize(&crop).await.unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].text, "AB1234");

        // Vehicle 2 carries no plate
        let crop = PlateCrop { region: CropRegion { x: 600, y: 300, width: 80, height: 60 }, ..crop };
        assert!(recognizer.recognize(&crop).await.unwrap().is_empty());
    }
}
