//! Configuration for the sound meter.
//!
//! Provides `AppConfig` (top-level settings), one sub-config per concern,
//! `AppPaths` for the platform config directory, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, AudioConfig, ConfigError, DisplayConfig, MeterConfig, ReportConfig};
