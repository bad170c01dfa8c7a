//! Blocking PCM source abstraction.
//!
//! [`SourceOpener`] acquires the microphone and yields an [`AudioSource`];
//! the source is then read block by block until it is closed.  Openers are
//! `Send + Sync` and shared with the capture thread, which opens the source
//! itself: some platform streams (cpal's among them) must stay on the thread
//! that created them.
//!
//! [`SourceGuard`] ties the source's lifetime to a scope so `close()` runs
//! exactly once on every exit path, including early returns on read errors.

use thiserror::Error;

// ---------------------------------------------------------------------------
// AudioFormat
// ---------------------------------------------------------------------------

/// Capture format requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub channel_count: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Monophonic 16-bit PCM at `sample_rate_hz`.
    pub fn mono_i16(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            channel_count: 1,
            bits_per_sample: 16,
        }
    }

    /// Reject formats the meter cannot process.
    pub fn validate(&self) -> Result<(), OpenError> {
        if self.sample_rate_hz == 0 {
            return Err(OpenError::InvalidConfig("sample rate must be positive".into()));
        }
        if self.channel_count != 1 {
            return Err(OpenError::InvalidConfig(format!(
                "unsupported channel count: {} (mono only)",
                self.channel_count
            )));
        }
        if self.bits_per_sample != 16 {
            return Err(OpenError::InvalidConfig(format!(
                "unsupported bit depth: {} (16-bit only)",
                self.bits_per_sample
            )));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::mono_i16(44_100)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure to acquire the microphone.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OpenError {
    #[error("microphone access denied")]
    PermissionDenied,

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("invalid capture configuration: {0}")]
    InvalidConfig(String),
}

/// Failure while reading from an open source.  Always fatal to the capture
/// loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("audio stream closed")]
    StreamClosed,

    #[error("audio stream failed: {0}")]
    Stream(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// An open monophonic 16-bit PCM stream.
pub trait AudioSource {
    /// Format the stream was opened with.
    fn format(&self) -> AudioFormat;

    /// Smallest read size (in samples) the device recommends.  Invariant for
    /// the lifetime of the source.
    fn min_buffer_len(&self) -> usize;

    /// Fill up to `buffer.len()` samples, blocking until data is available.
    ///
    /// Returns the number of samples written, which may be less than
    /// requested at stream boundaries.
    fn read(&mut self, buffer: &mut [i16]) -> Result<usize, ReadError>;

    /// Release the device.  Idempotent.
    fn close(&mut self);
}

/// Acquires an [`AudioSource`] for a given format.
pub trait SourceOpener: Send + Sync + 'static {
    type Source: AudioSource;

    fn open(&self, format: &AudioFormat) -> Result<Self::Source, OpenError>;
}

// ---------------------------------------------------------------------------
// SourceGuard
// ---------------------------------------------------------------------------

/// Owns an [`AudioSource`] and closes it when dropped.
pub struct SourceGuard<S: AudioSource> {
    source: S,
}

impl<S: AudioSource> SourceGuard<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: AudioSource> std::ops::Deref for SourceGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.source
    }
}

impl<S: AudioSource> std::ops::DerefMut for SourceGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: AudioSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.source.close();
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    #[test]
    fn default_format_is_mono_16_bit_44k() {
        let format = AudioFormat::default();
        assert_eq!(format.sample_rate_hz, 44_100);
        assert_eq!(format.channel_count, 1);
        assert_eq!(format.bits_per_sample, 16);
        assert!(format.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unsupported_formats() {
        assert!(matches!(
            AudioFormat::mono_i16(0).validate(),
            Err(OpenError::InvalidConfig(_))
        ));

        let stereo = AudioFormat {
            channel_count: 2,
            ..AudioFormat::default()
        };
        assert!(matches!(stereo.validate(), Err(OpenError::InvalidConfig(_))));

        let eight_bit = AudioFormat {
            bits_per_sample: 8,
            ..AudioFormat::default()
        };
        assert!(matches!(eight_bit.validate(), Err(OpenError::InvalidConfig(_))));
    }

    #[test]
    fn guard_closes_exactly_once() {
        let opener = ScriptedOpener::endless(5);
        let mut source = opener.open(&AudioFormat::default()).unwrap();
        source.close();
        {
            let _guard = SourceGuard::new(source);
        }
        assert_eq!(opener.probe.closes(), 1);
    }

    #[test]
    fn guard_closes_on_error_path() {
        fn read_once<S: AudioSource>(source: S) -> Result<usize, ReadError> {
            let mut guard = SourceGuard::new(source);
            let mut buf = [0_i16; 8];
            guard.read(&mut buf)
        }

        let opener = ScriptedOpener::finite(vec![Step::Fail(ReadError::Stream("boom".into()))]);
        let source = opener.open(&AudioFormat::default()).unwrap();
        assert!(read_once(source).is_err());
        assert_eq!(opener.probe.closes(), 1);
    }

    #[test]
    fn read_after_close_reports_stream_closed() {
        let opener = ScriptedOpener::endless(1);
        let mut source = opener.open(&AudioFormat::default()).unwrap();
        source.close();
        let mut buf = [0_i16; 4];
        assert_eq!(source.read(&mut buf), Err(ReadError::StreamClosed));
    }

    #[test]
    fn open_error_is_returned() {
        let opener = ScriptedOpener::failing_open(OpenError::PermissionDenied);
        assert!(matches!(
            opener.open(&AudioFormat::default()),
            Err(OpenError::PermissionDenied)
        ));
        assert_eq!(opener.probe.opens(), 0);
    }
}
