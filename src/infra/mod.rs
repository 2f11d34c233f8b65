//! Infrastructure - configuration and metrics
//!
//! - `config` - Application configuration (TOML loading, env overrides, defaults)
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use config::{CommandProtocol, Config, PolicyMode, SpeedUnit};
pub use metrics::Metrics;
