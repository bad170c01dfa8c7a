//! Real-time sound-level meter.
//!
//! Captures monophonic 16-bit PCM from the microphone in fixed-size blocks,
//! turns each block into a single loudness number and hands it to a display
//! consumer on another thread.

pub mod audio;
pub mod config;
pub mod pipeline;
pub mod report;
