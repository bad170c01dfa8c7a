//! Block loudness: RMS of 16-bit PCM mapped onto a decibel-like scale.
//!
//! ```text
//! ms       = Σ sample² / n          (n = samples actually read)
//! rms      = √ms
//! loudness = 10 · log10(rms / reference)     if rms > 0
//!          = silence_fallback                if rms == 0
//! ```
//!
//! The silence fallback is a sentinel meaning "no signal".  It is not a
//! decibel figure derived from the formula above, and it is configurable.
//!
//! # Example
//!
//! ```rust
//! use sound_meter::audio::loudness;
//!
//! let value = loudness::compute(&[1000, -1000, 1000, -1000]).unwrap();
//! assert!((value - 16.9897).abs() < 1e-3);
//!
//! assert_eq!(loudness::compute(&[0; 512]).unwrap(), 1.0);
//! assert!(loudness::compute(&[]).is_err());
//! ```

use thiserror::Error;

/// Default amplitude that maps to 0 on the loudness scale.
pub const DEFAULT_REFERENCE_AMPLITUDE: f64 = 20.0;

/// Default value reported for an all-zero block.
pub const DEFAULT_SILENCE_FALLBACK: f64 = 1.0;

// ---------------------------------------------------------------------------
// ComputationError
// ---------------------------------------------------------------------------

/// A block could not be turned into a loudness value.
///
/// Unreachable when the audio source honours its contract; the capture loop
/// skips the iteration and keeps running.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComputationError {
    #[error("cannot compute loudness of an empty block")]
    EmptyBlock,

    #[error("loudness computation produced a non-finite value ({0})")]
    NonFinite(f64),
}

// ---------------------------------------------------------------------------
// LoudnessSample
// ---------------------------------------------------------------------------

/// Estimated loudness of the most recent capture window.
///
/// Always finite; the only way to build one is through [`LoudnessSample::new`]
/// or [`LoudnessMeter::measure`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct LoudnessSample(f64);

impl LoudnessSample {
    /// Wrap `value`, rejecting NaN and ±∞.
    pub fn new(value: f64) -> Option<Self> {
        value.is_finite().then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<LoudnessSample> for f64 {
    fn from(sample: LoudnessSample) -> Self {
        sample.0
    }
}

// ---------------------------------------------------------------------------
// LoudnessMeter
// ---------------------------------------------------------------------------

/// Stateless loudness computer holding the two tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessMeter {
    /// Amplitude that maps to 0 (default `20.0`).  Must be finite and > 0.
    pub reference_amplitude: f64,
    /// Value reported when the block is pure silence (default `1.0`).
    pub silence_fallback: f64,
}

impl Default for LoudnessMeter {
    fn default() -> Self {
        Self {
            reference_amplitude: DEFAULT_REFERENCE_AMPLITUDE,
            silence_fallback: DEFAULT_SILENCE_FALLBACK,
        }
    }
}

impl LoudnessMeter {
    pub fn new(reference_amplitude: f64, silence_fallback: f64) -> Self {
        Self {
            reference_amplitude,
            silence_fallback,
        }
    }

    /// Root-mean-square amplitude of `block`, over exactly `block.len()`
    /// samples.
    pub fn rms(block: &[i16]) -> Result<f64, ComputationError> {
        if block.is_empty() {
            return Err(ComputationError::EmptyBlock);
        }
        // |sample| ≤ 32768, so each square is exact in f64 and the sum of
        // any realistic block stays far below 2^53.
        let sum_sq: f64 = block
            .iter()
            .map(|&s| {
                let s = f64::from(s);
                s * s
            })
            .sum();
        Ok((sum_sq / block.len() as f64).sqrt())
    }

    /// Loudness of `block` as a plain `f64`.
    pub fn compute(&self, block: &[i16]) -> Result<f64, ComputationError> {
        let rms = Self::rms(block)?;
        let loudness = if rms > 0.0 {
            10.0 * (rms / self.reference_amplitude).log10()
        } else {
            self.silence_fallback
        };

        if loudness.is_finite() {
            Ok(loudness)
        } else {
            Err(ComputationError::NonFinite(loudness))
        }
    }

    /// Loudness of `block` wrapped for the reporter channel.
    pub fn measure(&self, block: &[i16]) -> Result<LoudnessSample, ComputationError> {
        let value = self.compute(block)?;
        LoudnessSample::new(value).ok_or(ComputationError::NonFinite(value))
    }
}

/// Loudness of `block` with the default reference and silence fallback.
pub fn compute(block: &[i16]) -> Result<f64, ComputationError> {
    LoudnessMeter::default().compute(block)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn alternating_thousand_scenario() {
        let block = [1000_i16, -1000, 1000, -1000];
        assert_relative_eq!(LoudnessMeter::rms(&block).unwrap(), 1000.0);
        assert_relative_eq!(
            compute(&block).unwrap(),
            10.0 * 50.0_f64.log10(),
            epsilon = 1e-12
        );
        assert_relative_eq!(compute(&block).unwrap(), 16.9897, epsilon = 1e-4);
    }

    #[test]
    fn silence_returns_fallback_for_any_length() {
        for len in [1, 2, 7, 512, 4096] {
            let block = vec![0_i16; len];
            assert_eq!(compute(&block).unwrap(), DEFAULT_SILENCE_FALLBACK);
        }
    }

    #[test]
    fn custom_silence_fallback_is_used() {
        let meter = LoudnessMeter::new(20.0, -99.0);
        assert_eq!(meter.compute(&[0, 0, 0]).unwrap(), -99.0);
    }

    #[test]
    fn empty_block_is_rejected() {
        assert_eq!(compute(&[]), Err(ComputationError::EmptyBlock));
        assert_eq!(
            LoudnessMeter::default().measure(&[]),
            Err(ComputationError::EmptyBlock)
        );
    }

    #[test]
    fn divisor_is_actual_block_length() {
        // Same content, different lengths: a constant block has the same RMS
        // regardless of n, which only holds when the divisor is n.
        let short = vec![500_i16; 3];
        let long = vec![500_i16; 3000];
        assert_relative_eq!(compute(&short).unwrap(), compute(&long).unwrap());
        assert_relative_eq!(LoudnessMeter::rms(&short).unwrap(), 500.0);
    }

    #[test]
    fn extremes_are_finite() {
        let blocks: [&[i16]; 5] = [
            &[i16::MIN],
            &[i16::MAX],
            &[i16::MIN, i16::MAX, i16::MIN, i16::MAX],
            &[1],
            &[-1, 0, 0, 0, 0, 0, 0, 0],
        ];
        for block in blocks {
            let value = compute(block).unwrap();
            assert!(value.is_finite(), "{block:?} → {value}");
        }

        let full_scale = vec![i16::MIN; 1 << 16];
        assert!(compute(&full_scale).unwrap().is_finite());
    }

    #[test]
    fn compute_is_deterministic() {
        let block: Vec<i16> = (0..2048).map(|i| ((i * 37) % 2001 - 1000) as i16).collect();
        let meter = LoudnessMeter::default();
        let first = meter.compute(&block).unwrap();
        for _ in 0..10 {
            assert_eq!(meter.compute(&block).unwrap(), first);
        }
    }

    #[test]
    fn louder_block_is_never_quieter() {
        let quiet: Vec<i16> = (0..256).map(|i| (i % 50) as i16).collect();
        let loud: Vec<i16> = quiet.iter().map(|&s| s.saturating_mul(3)).collect();
        let louder_still: Vec<i16> = loud.iter().map(|&s| s.saturating_add(7)).collect();

        let a = compute(&quiet).unwrap();
        let b = compute(&loud).unwrap();
        let c = compute(&louder_still).unwrap();
        assert!(b >= a, "{b} < {a}");
        assert!(c >= b, "{c} < {b}");

        let neg_quiet: Vec<i16> = quiet.iter().map(|&s| -s).collect();
        let neg_loud: Vec<i16> = loud.iter().map(|&s| -s).collect();
        assert!(compute(&neg_loud).unwrap() >= compute(&neg_quiet).unwrap());
    }

    #[test]
    fn reference_shifts_scale() {
        let block = [200_i16; 16];
        // rms == reference → 0
        assert_relative_eq!(LoudnessMeter::new(200.0, 1.0).compute(&block).unwrap(), 0.0);
        // rms == 10 × reference → 10
        assert_relative_eq!(
            LoudnessMeter::new(20.0, 1.0).compute(&block).unwrap(),
            10.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn degenerate_reference_is_reported_not_propagated() {
        let meter = LoudnessMeter::new(0.0, 1.0);
        assert!(matches!(
            meter.compute(&[100, 100]),
            Err(ComputationError::NonFinite(_))
        ));
    }

    #[test]
    fn loudness_sample_rejects_non_finite() {
        assert!(LoudnessSample::new(f64::NAN).is_none());
        assert!(LoudnessSample::new(f64::INFINITY).is_none());
        assert!(LoudnessSample::new(f64::NEG_INFINITY).is_none());
        assert_eq!(LoudnessSample::new(3.5).map(f64::from), Some(3.5));
    }
}
