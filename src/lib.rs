//! Actibump library
//!
//! Vision-driven enforcement loop for an active speed bump. Exposes modules
//! for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
