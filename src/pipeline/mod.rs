//! Capture control for the sound meter.
//!
//! # Architecture
//!
//! ```text
//! CaptureController::start()          ← caller thread
//!        │
//!        ├─ PermissionOracle   → PermissionDenied
//!        └─ spawn "capture-loop" thread
//!              │
//!              ├─ SourceOpener::open  → DeviceOpenFailed (back to start)
//!              └─ CaptureLoop::run
//!                    ├─ AudioSource::read (blocking)
//!                    ├─ LoudnessMeter::measure
//!                    └─ ReportSender::send  ──▶ ReportReceiver (display task)
//!
//! CaptureController::stop()  → stop flag + join → source closed
//! ```

pub mod controller;
pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use controller::{
    AlwaysPermitted, CaptureController, CaptureListener, CaptureSettings, DeviceError,
    PermissionOracle, StartError, StopError,
};
pub use runner::CaptureLoop;
pub use state::{CaptureState, LoopExit, LoopState, LoopSummary};
