//! Display side of the meter.
//!
//! [`DisplayConsumer`] is the seam to whatever shows the number.  Each call
//! to [`report`](DisplayConsumer::report) replaces the previously shown
//! value; consumers must never append.  [`run_display`] is the consumer's
//! own run loop: it awaits samples from the reporter channel and hands each
//! one to the consumer, so blocking capture reads never touch this task.

use std::io::Write;

use crate::report::channel::ReportReceiver;

// ---------------------------------------------------------------------------
// DisplayConsumer
// ---------------------------------------------------------------------------

/// Receives one loudness value per captured block.
pub trait DisplayConsumer: Send {
    fn report(&mut self, loudness: f64);
}

impl<F> DisplayConsumer for F
where
    F: FnMut(f64) + Send,
{
    fn report(&mut self, loudness: f64) {
        self(loudness)
    }
}

/// Forward every sample from `rx` to `consumer` until the channel closes.
///
/// Returns the number of samples reported.
pub async fn run_display<C: DisplayConsumer>(mut rx: ReportReceiver, mut consumer: C) -> u64 {
    let mut reported = 0;
    while let Some(sample) = rx.recv().await {
        consumer.report(sample.value());
        reported += 1;
    }

    let dropped = rx.dropped();
    if dropped > 0 {
        log::info!("display: channel closed after {reported} reports ({dropped} dropped under backpressure)");
    } else {
        log::info!("display: channel closed after {reported} reports");
    }
    reported
}

// ---------------------------------------------------------------------------
// TerminalDisplay
// ---------------------------------------------------------------------------

/// Rewrites a single terminal line with the latest loudness.
pub struct TerminalDisplay<W: Write + Send> {
    out: W,
    decimals: usize,
    last_width: usize,
}

impl<W: Write + Send> TerminalDisplay<W> {
    pub fn new(out: W, decimals: usize) -> Self {
        Self {
            out,
            decimals,
            last_width: 0,
        }
    }

    /// Consume the display and return the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&self, loudness: f64) -> String {
        format!("loudness: {:>8.*}", self.decimals, loudness)
    }
}

impl<W: Write + Send> DisplayConsumer for TerminalDisplay<W> {
    fn report(&mut self, loudness: f64) {
        let text = self.render(loudness);
        // Pad over any leftovers from a longer previous value.
        let pad = self.last_width.saturating_sub(text.len());
        self.last_width = text.len();
        let written = write!(self.out, "\r{text}{:pad$}", "").and_then(|_| self.out.flush());
        if let Err(e) = written {
            log::debug!("display: terminal write failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
