//! The capture loop: read a block, compute its loudness, report it.
//!
//! # Loop flow
//!
//! ```text
//! ┌─▶ stop flag set? ──yes──▶ StopRequested ──▶ Stopped (Ok)
//! │        │ no
//! │        ▼
//! │   source.read(block)  ──Err──▶ Stopped (Err, source closed)
//! │        │ n samples
//! │        ▼
//! │   meter.measure(&block[..n]) ──Err──▶ skip (warn)
//! │        │ sample
//! │        ▼
//! └── reporter.send(sample) ──receiver gone──▶ Stopped (Ok)
//! ```
//!
//! The stop flag is polled between iterations, so an in-flight read and
//! computation always complete before the loop exits.  The source is closed
//! exactly once, when [`CaptureLoop::run`] returns, whatever the exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::{AudioSource, LoudnessMeter, ReadError, SourceGuard};
use crate::report::ReportSender;

use super::state::{LoopExit, LoopState, LoopSummary};

/// Owns an open [`AudioSource`] for the lifetime of one capture session.
pub struct CaptureLoop<S: AudioSource> {
    source: Option<SourceGuard<S>>,
    meter: LoudnessMeter,
    reporter: ReportSender,
    stop: Arc<AtomicBool>,
    block_len: usize,
    state: LoopState,
    blocks_reported: u64,
    blocks_skipped: u64,
}

impl<S: AudioSource> CaptureLoop<S> {
    /// Take ownership of `source`.
    ///
    /// The block length is fixed here, once, as `block_multiplier` times the
    /// device's minimum-buffer recommendation.
    pub fn new(
        source: S,
        meter: LoudnessMeter,
        reporter: ReportSender,
        stop: Arc<AtomicBool>,
        block_multiplier: usize,
    ) -> Self {
        let block_len = source
            .min_buffer_len()
            .saturating_mul(block_multiplier)
            .max(1);
        Self {
            source: Some(SourceGuard::new(source)),
            meter,
            reporter,
            stop,
            block_len,
            state: LoopState::Running,
            blocks_reported: 0,
            blocks_skipped: 0,
        }
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn blocks_reported(&self) -> u64 {
        self.blocks_reported
    }

    pub fn blocks_skipped(&self) -> u64 {
        self.blocks_skipped
    }

    /// Run until stopped, the consumer disappears, or the source fails.
    ///
    /// On return the loop is [`LoopState::Stopped`] and the source has been
    /// closed.
    pub fn run(&mut self) -> Result<LoopSummary, ReadError> {
        let outcome = self.pump();

        // Dropping the guard closes the source.
        self.source = None;
        self.state = LoopState::Stopped;

        match outcome {
            Ok(exit) => {
                log::info!(
                    "capture: loop stopped ({exit:?}) after {} blocks ({} skipped)",
                    self.blocks_reported,
                    self.blocks_skipped
                );
                Ok(LoopSummary {
                    exit,
                    blocks_reported: self.blocks_reported,
                    blocks_skipped: self.blocks_skipped,
                })
            }
            Err(e) => {
                log::error!(
                    "capture: source failed after {} blocks: {e}",
                    self.blocks_reported
                );
                Err(e)
            }
        }
    }

    fn pump(&mut self) -> Result<LoopExit, ReadError> {
        let source = self.source.as_mut().ok_or(ReadError::StreamClosed)?;
        let mut block = vec![0_i16; self.block_len];

        loop {
            if self.stop.load(Ordering::SeqCst) {
                self.state = LoopState::StopRequested;
                return Ok(LoopExit::StopRequested);
            }

            let n = source.read(&mut block)?;

            match self.meter.measure(&block[..n]) {
                Ok(sample) => {
                    log::debug!("capture: {n} samples → {:.2}", sample.value());
                    if self.reporter.send(sample).is_err() {
                        return Ok(LoopExit::ConsumerGone);
                    }
                    self.blocks_reported += 1;
                }
                Err(e) => {
                    log::warn!("capture: skipping block of {n} samples: {e}");
                    self.blocks_skipped += 1;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::audio::mock::{ScriptedOpener, ScriptedSource, Step};
    use crate::audio::{AudioFormat, SourceOpener};
    use crate::report::{report_channel, ReportReceiver};

    fn make_loop(
        opener: &ScriptedOpener,
        stop: Arc<AtomicBool>,
    ) -> (CaptureLoop<ScriptedSource>, ReportReceiver) {
        let (tx, rx) = report_channel(64);
        let source = opener.open(&AudioFormat::default()).unwrap();
        (CaptureLoop::new(source, LoudnessMeter::default(), tx, stop, 2), rx)
    }

    #[test]
    fn block_len_is_multiplier_times_min_buffer() {
        let opener = ScriptedOpener::endless(0);
        let (capture, _rx) = make_loop(&opener, Arc::new(AtomicBool::new(false)));
        assert_eq!(capture.block_len(), 128);
        assert_eq!(capture.state(), LoopState::Running);
    }

    #[test]
    fn reports_each_block_then_fails_and_closes() {
        let opener = ScriptedOpener::finite(vec![
            Step::Fill(1000),
            Step::Samples(vec![0, 0, 0]),
            Step::Samples(vec![1000, -1000, 1000, -1000]),
        ]);
        let (mut capture, mut rx) = make_loop(&opener, Arc::new(AtomicBool::new(false)));

        assert_eq!(capture.run(), Err(ReadError::StreamClosed));
        assert_eq!(capture.state(), LoopState::Stopped);
        assert_eq!(capture.blocks_reported(), 3);
        assert_eq!(opener.probe.closes(), 1);

        let values: Vec<f64> = std::iter::from_fn(|| rx.try_recv())
            .map(f64::from)
            .collect();
        assert_eq!(values.len(), 3);
        assert_relative_eq!(values[0], 16.9897, epsilon = 1e-4);
        assert_eq!(values[1], 1.0);
        assert_relative_eq!(values[2], 16.9897, epsilon = 1e-4);
    }

    #[test]
    fn empty_block_is_skipped_not_fatal() {
        let opener = ScriptedOpener::finite(vec![Step::Samples(vec![]), Step::Fill(200)]);
        let (mut capture, mut rx) = make_loop(&opener, Arc::new(AtomicBool::new(false)));

        assert_eq!(capture.run(), Err(ReadError::StreamClosed));
        assert_eq!(capture.blocks_skipped(), 1);
        assert_eq!(capture.blocks_reported(), 1);
        assert_relative_eq!(rx.try_recv().map(f64::from).unwrap(), 10.0, epsilon = 1e-9);
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn stop_flag_checked_before_first_read() {
        let opener = ScriptedOpener::endless(5);
        let (mut capture, _rx) = make_loop(&opener, Arc::new(AtomicBool::new(true)));

        let summary = capture.run().unwrap();
        assert_eq!(summary.exit, LoopExit::StopRequested);
        assert_eq!(summary.blocks_reported, 0);
        assert_eq!(opener.probe.reads(), 0);
        assert_eq!(opener.probe.closes(), 1);
    }

    #[test]
    fn stop_flag_from_another_thread_ends_loop() {
        let opener = ScriptedOpener::endless(5);
        let stop = Arc::new(AtomicBool::new(false));
        let (mut capture, _rx) = make_loop(&opener, Arc::clone(&stop));

        let setter = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            stop.store(true, Ordering::SeqCst);
        });
        let summary = capture.run().unwrap();
        setter.join().unwrap();

        assert_eq!(summary.exit, LoopExit::StopRequested);
        assert!(summary.blocks_reported > 0);
        // At most the one in-flight read completes after the flag is set.
        assert_eq!(opener.probe.reads() as u64, summary.blocks_reported);
        assert_eq!(opener.probe.closes(), 1);
    }

    #[test]
    fn dropped_receiver_ends_loop_cleanly() {
        let opener = ScriptedOpener::endless(5);
        let (mut capture, rx) = make_loop(&opener, Arc::new(AtomicBool::new(false)));
        drop(rx);

        let summary = capture.run().unwrap();
        assert_eq!(summary.exit, LoopExit::ConsumerGone);
        assert_eq!(summary.blocks_reported, 0);
        assert_eq!(opener.probe.closes(), 1);
    }

    #[test]
    fn second_run_reports_stream_closed() {
        let opener = ScriptedOpener::endless(5);
        let (mut capture, _rx) = make_loop(&opener, Arc::new(AtomicBool::new(true)));
        capture.run().unwrap();
        assert_eq!(capture.run(), Err(ReadError::StreamClosed));
        assert_eq!(opener.probe.closes(), 1);
    }
}
