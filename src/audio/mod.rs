//! Audio side of the meter: microphone capture and loudness computation.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → downmix + i16 → SampleQueue
//!           → CpalSource::read (blocking, one block) → LoudnessMeter
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sound_meter::audio::{AudioFormat, AudioSource, CpalOpener, LoudnessMeter, SourceOpener};
//!
//! let mut source = CpalOpener::default().open(&AudioFormat::default()).unwrap();
//! let mut block = vec![0_i16; 2 * source.min_buffer_len()];
//! let meter = LoudnessMeter::default();
//!
//! let n = source.read(&mut block).unwrap();
//! println!("{:.2}", meter.compute(&block[..n]).unwrap());
//! source.close();
//! ```

pub mod buffer;
pub mod capture;
pub mod loudness;
pub mod source;

pub use buffer::RingBuffer;
pub use capture::{CpalOpener, CpalSource, SampleQueue};
pub use loudness::{ComputationError, LoudnessMeter, LoudnessSample};
pub use source::{AudioFormat, AudioSource, OpenError, ReadError, SourceGuard, SourceOpener};

#[cfg(test)]
pub use source::mock;
