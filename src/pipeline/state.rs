//! Controller and capture-loop state machines.
//!
//! ```text
//! CaptureState (controller):
//!   Idle ──start (permitted, source opened)──▶ Capturing
//!   Capturing ──stop / fatal source error──▶ Idle
//!
//! LoopState (capture thread):
//!   Running ──stop flag observed──▶ StopRequested ──▶ Stopped
//!   Running ──fatal read error / consumer gone──▶ Stopped
//! ```

// ---------------------------------------------------------------------------
// CaptureState
// ---------------------------------------------------------------------------

/// Whether a controller currently owns a running capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Capturing,
}

impl CaptureState {
    pub fn is_capturing(&self) -> bool {
        matches!(self, CaptureState::Capturing)
    }

    /// A short human-readable label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            CaptureState::Idle => "Idle",
            CaptureState::Capturing => "Capturing",
        }
    }
}

// ---------------------------------------------------------------------------
// LoopState
// ---------------------------------------------------------------------------

/// Phase of a capture loop.  Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoopState {
    Running,
    StopRequested,
    Stopped,
}

/// Why a capture loop exited without a device error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The controller raised the stop flag.
    StopRequested,
    /// The report receiver was dropped; nobody is listening.
    ConsumerGone,
}

/// What a capture loop did before it exited cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub exit: LoopExit,
    /// Blocks whose loudness was sent to the reporter channel.
    pub blocks_reported: u64,
    /// Blocks skipped because loudness could not be computed.
    pub blocks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capture_state_is_idle() {
        assert_eq!(CaptureState::default(), CaptureState::Idle);
        assert!(!CaptureState::Idle.is_capturing());
        assert!(CaptureState::Capturing.is_capturing());
    }

    #[test]
    fn labels() {
        assert_eq!(CaptureState::Idle.label(), "Idle");
        assert_eq!(CaptureState::Capturing.label(), "Capturing");
    }

    #[test]
    fn loop_states_are_ordered() {
        assert!(LoopState::Running < LoopState::StopRequested);
        assert!(LoopState::StopRequested < LoopState::Stopped);
    }
}
