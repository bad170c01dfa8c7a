//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files.  Missing sections and
//! fields fall back to their defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;
use crate::audio::loudness::{DEFAULT_REFERENCE_AMPLITUDE, DEFAULT_SILENCE_FALLBACK};
use crate::audio::{AudioFormat, CpalOpener, LoudnessMeter};
use crate::pipeline::CaptureSettings;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A setting outside the range the meter can work with.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("audio.sample_rate_hz must be positive")]
    SampleRate,

    #[error("audio.block_multiplier must be at least 1")]
    BlockMultiplier,

    #[error("meter.reference_amplitude must be finite and positive, got {0}")]
    ReferenceAmplitude(f64),

    #[error("meter.silence_fallback_loudness must be finite, got {0}")]
    SilenceFallback(f64),

    #[error("report.channel_capacity must be at least 1")]
    ChannelCapacity,
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for microphone capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture rate in Hz.
    pub sample_rate_hz: u32,
    /// Block length as a multiple of the device's minimum buffer.
    pub block_multiplier: usize,
    /// Input device name; `None` means the system default.
    pub device_name: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44_100,
            block_multiplier: 2,
            device_name: None,
        }
    }
}

// ---------------------------------------------------------------------------
// MeterConfig
// ---------------------------------------------------------------------------

/// Loudness formula tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Amplitude that maps to a loudness of 0.
    pub reference_amplitude: f64,
    /// Reported for a block of pure silence.
    pub silence_fallback_loudness: f64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            reference_amplitude: DEFAULT_REFERENCE_AMPLITUDE,
            silence_fallback_loudness: DEFAULT_SILENCE_FALLBACK,
        }
    }
}

// ---------------------------------------------------------------------------
// ReportConfig / DisplayConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Undelivered samples kept before the oldest is dropped.
    pub channel_capacity: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Digits after the decimal point on the terminal line.
    pub decimals: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { decimals: 2 }
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Top-level settings, persisted as `settings.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub meter: MeterConfig,
    pub report: ReportConfig,
    pub display: DisplayConfig,
}

impl AppConfig {
    /// Load from the platform-appropriate `settings.toml`, or defaults if the
    /// file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.sample_rate_hz == 0 {
            return Err(ConfigError::SampleRate);
        }
        if self.audio.block_multiplier == 0 {
            return Err(ConfigError::BlockMultiplier);
        }
        let reference = self.meter.reference_amplitude;
        if !reference.is_finite() || reference <= 0.0 {
            return Err(ConfigError::ReferenceAmplitude(reference));
        }
        let fallback = self.meter.silence_fallback_loudness;
        if !fallback.is_finite() {
            return Err(ConfigError::SilenceFallback(fallback));
        }
        if self.report.channel_capacity == 0 {
            return Err(ConfigError::ChannelCapacity);
        }
        Ok(())
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::mono_i16(self.audio.sample_rate_hz)
    }

    pub fn meter(&self) -> LoudnessMeter {
        LoudnessMeter::new(
            self.meter.reference_amplitude,
            self.meter.silence_fallback_loudness,
        )
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            format: self.audio_format(),
            meter: self.meter(),
            block_multiplier: self.audio.block_multiplier,
            channel_capacity: self.report.channel_capacity,
        }
    }

    /// Opener for the configured input device.
    pub fn opener(&self) -> CpalOpener {
        CpalOpener::new(self.audio.device_name.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let mut original = AppConfig::default();
        original.audio.sample_rate_hz = 48_000;
        original.audio.device_name = Some("USB Microphone".into());
        original.meter.silence_fallback_loudness = -1.0;
        original.display.decimals = 1;

        original.save_to(&path).expect("save should succeed");
        let loaded = AppConfig::load_from(&path).expect("load should succeed");
        assert_eq!(loaded, original);
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[audio]\nsample_rate_hz = 22050\n").unwrap();

        let config = AppConfig::load_from(&path).expect("should load");
        assert_eq!(config.audio.sample_rate_hz, 22_050);
        assert_eq!(config.audio.block_multiplier, 2);
        assert_eq!(config.meter, MeterConfig::default());
    }

    #[test]
    fn invalid_file_is_rejected() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[report]\nchannel_capacity = 0\n").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::ChannelCapacity)
        );
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.audio.sample_rate_hz, 44_100);
        assert_eq!(cfg.audio.block_multiplier, 2);
        assert!(cfg.audio.device_name.is_none());
        assert_eq!(cfg.meter.reference_amplitude, 20.0);
        assert_eq!(cfg.meter.silence_fallback_loudness, 1.0);
        assert_eq!(cfg.report.channel_capacity, 32);
        assert_eq!(cfg.display.decimals, 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let mut cfg = AppConfig::default();
        cfg.audio.sample_rate_hz = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::SampleRate));

        let mut cfg = AppConfig::default();
        cfg.audio.block_multiplier = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::BlockMultiplier));

        let mut cfg = AppConfig::default();
        cfg.meter.reference_amplitude = -3.0;
        assert_eq!(cfg.validate(), Err(ConfigError::ReferenceAmplitude(-3.0)));

        let mut cfg = AppConfig::default();
        cfg.meter.silence_fallback_loudness = f64::INFINITY;
        assert!(matches!(cfg.validate(), Err(ConfigError::SilenceFallback(_))));
    }

    #[test]
    fn capture_settings_follow_config() {
        let mut cfg = AppConfig::default();
        cfg.audio.sample_rate_hz = 16_000;
        cfg.audio.block_multiplier = 3;
        cfg.meter.reference_amplitude = 10.0;
        cfg.report.channel_capacity = 4;

        let settings = cfg.capture_settings();
        assert_eq!(settings.format, AudioFormat::mono_i16(16_000));
        assert_eq!(settings.block_multiplier, 3);
        assert_eq!(settings.channel_capacity, 4);
        assert_eq!(settings.meter, LoudnessMeter::new(10.0, 1.0));
    }
}
