//! Domain models - core types for vehicle tracking and enforcement
//!
//! This module contains the canonical data types used throughout the system:
//! - `types` - TrackId, BBox, Frame and pixel regions
//! - `geometry` - box centers, containment and displacement
//! - `track` - per-vehicle state and one-shot markers
//! - `policy_state` - bump health, speeding count and the persisted record

pub mod geometry;
pub mod policy_state;
pub mod track;
pub mod types;
