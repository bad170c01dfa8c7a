//! Loudness hand-off from the capture thread to the display.
//!
//! A bounded FIFO of [`LoudnessSample`]s.  [`ReportSender::send`] never blocks:
//! when the queue is full the oldest sample is evicted, since loudness is a
//! "latest value wins" signal.  [`ReportReceiver::recv`] is async and yields
//! samples in the order they were sent.
//!
//! The channel closes once every [`ReportSender`] has been dropped; `recv`
//! then drains what is left and returns `None`.
//!
//! `tokio::sync::mpsc` only offers reject-newest (`try_send`) or waiting
//! (`send`) when full, so the queue is owned here to evict the oldest.
//!
//! # Example
//!
//! ```rust
//! use sound_meter::audio::LoudnessSample;
//! use sound_meter::report::report_channel;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let (tx, mut rx) = report_channel(8);
//! tx.send(LoudnessSample::new(12.5).unwrap()).unwrap();
//! drop(tx);
//!
//! assert_eq!(rx.recv().await.map(f64::from), Some(12.5));
//! assert_eq!(rx.recv().await, None);
//! # });
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

use crate::audio::{LoudnessSample, RingBuffer};

/// The receiver is gone; the sample was not queued.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
#[error("report receiver dropped")]
pub struct SendError(pub LoudnessSample);

struct Shared {
    queue: Mutex<RingBuffer<LoudnessSample>>,
    notify: Notify,
    senders: AtomicUsize,
    receiver_alive: AtomicBool,
    dropped: AtomicU64,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.senders.load(Ordering::SeqCst) == 0
    }
}

/// Create a channel holding at most `capacity` undelivered samples.
///
/// # Panics
///
/// Panics if `capacity == 0`.
pub fn report_channel(capacity: usize) -> (ReportSender, ReportReceiver) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(RingBuffer::new(capacity)),
        notify: Notify::new(),
        senders: AtomicUsize::new(1),
        receiver_alive: AtomicBool::new(true),
        dropped: AtomicU64::new(0),
    });
    (
        ReportSender {
            shared: Arc::clone(&shared),
        },
        ReportReceiver { shared },
    )
}

// ---------------------------------------------------------------------------
// ReportSender
// ---------------------------------------------------------------------------

/// Producer half.  Cloneable; the channel closes when the last clone drops.
pub struct ReportSender {
    shared: Arc<Shared>,
}

impl ReportSender {
    /// Queue `sample` without blocking, evicting the oldest undelivered
    /// sample if the queue is full.
    pub fn send(&self, sample: LoudnessSample) -> Result<(), SendError> {
        if !self.shared.receiver_alive.load(Ordering::SeqCst) {
            return Err(SendError(sample));
        }
        let evicted = self.shared.queue.lock().push(sample);
        if evicted.is_some() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.notify.notify_one();
        Ok(())
    }
}

impl Clone for ReportSender {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for ReportSender {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.notify.notify_one();
        }
    }
}

// ---------------------------------------------------------------------------
// ReportReceiver
// ---------------------------------------------------------------------------

/// Consumer half.
pub struct ReportReceiver {
    shared: Arc<Shared>,
}

impl ReportReceiver {
    /// Wait for the next sample.  Returns `None` once the channel is closed
    /// and drained.
    pub async fn recv(&mut self) -> Option<LoudnessSample> {
        loop {
            if let Some(sample) = self.try_recv() {
                return Some(sample);
            }
            if self.shared.is_closed() {
                // A send may have raced the close check.
                return self.try_recv();
            }
            self.shared.notify.notified().await;
        }
    }

    /// Take the oldest undelivered sample, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<LoudnessSample> {
        self.shared.queue.lock().pop_front()
    }

    /// Drain everything queued and return only the newest sample.
    pub fn latest(&mut self) -> Option<LoudnessSample> {
        let mut queue = self.shared.queue.lock();
        let mut newest = None;
        while let Some(sample) = queue.pop_front() {
            newest = Some(sample);
        }
        newest
    }

    /// Samples evicted by backpressure since the channel was created.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for ReportReceiver {
    fn drop(&mut self) {
        self.shared.receiver_alive.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
