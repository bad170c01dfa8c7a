//! Start/stop control over a single capture loop.
//!
//! [`CaptureController`] owns at most one running [`CaptureLoop`] at a time.
//! `start` checks permission, spawns the `capture-loop` thread and waits for
//! it to open the source, so open failures come back synchronously.  `stop`
//! raises the stop flag and joins the thread; when it returns the source is
//! closed and no further samples will be reported.
//!
//! A fatal source error ends the loop on its own.  The controller is back to
//! [`CaptureState::Idle`] as soon as the thread exits; the error is kept for
//! [`CaptureController::take_last_error`] and pushed to the optional
//! [`CaptureListener`].
//!
//! # Example
//!
//! ```rust,no_run
//! use sound_meter::audio::CpalOpener;
//! use sound_meter::pipeline::{AlwaysPermitted, CaptureController, CaptureSettings};
//!
//! let (mut controller, mut rx) =
//!     CaptureController::new(CpalOpener::default(), AlwaysPermitted, CaptureSettings::default());
//! controller.start().unwrap();
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! controller.stop().unwrap();
//! while let Some(sample) = rx.try_recv() {
//!     println!("{:.2}", sample.value());
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::audio::{AudioFormat, AudioSource, LoudnessMeter, OpenError, ReadError, SourceOpener};
use crate::report::{report_channel, ReportReceiver, ReportSender};

use super::runner::CaptureLoop;
use super::state::{CaptureState, LoopSummary};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("microphone permission not granted")]
    PermissionDenied,

    #[error("capture already running")]
    AlreadyCapturing,

    #[error("could not open audio device: {0}")]
    DeviceOpenFailed(#[source] OpenError),

    #[error("could not spawn capture thread: {0}")]
    Spawn(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StopError {
    #[error("capture is not running")]
    NotCapturing,

    #[error("capture thread panicked")]
    LoopPanicked,
}

/// A device failure that ended a capture session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Read(#[from] ReadError),
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Answers whether the user has granted microphone access.
pub trait PermissionOracle: Send + Sync {
    fn is_capture_permitted(&self) -> bool;
}

impl<F> PermissionOracle for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_capture_permitted(&self) -> bool {
        self()
    }
}

/// For platforms where access is enforced by the device itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPermitted;

impl PermissionOracle for AlwaysPermitted {
    fn is_capture_permitted(&self) -> bool {
        true
    }
}

/// Capture lifecycle notifications, delivered from the capture thread.
pub trait CaptureListener: Send + Sync {
    fn on_state_changed(&self, _state: CaptureState) {}

    fn on_error(&self, _error: &DeviceError) {}
}

// ---------------------------------------------------------------------------
// CaptureSettings
// ---------------------------------------------------------------------------

/// Everything a capture session needs besides the device itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub format: AudioFormat,
    pub meter: LoudnessMeter,
    /// Block length as a multiple of the device's minimum buffer.
    pub block_multiplier: usize,
    /// Undelivered samples kept before the oldest is dropped.
    pub channel_capacity: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            meter: LoudnessMeter::default(),
            block_multiplier: 2,
            channel_capacity: 32,
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureController
// ---------------------------------------------------------------------------

type LoopOutcome = Result<LoopSummary, DeviceError>;

struct ActiveLoop {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<LoopOutcome>,
}

pub struct CaptureController<O: SourceOpener> {
    opener: Arc<O>,
    permission: Box<dyn PermissionOracle>,
    listener: Option<Arc<dyn CaptureListener>>,
    settings: CaptureSettings,
    reporter: ReportSender,
    active: Option<ActiveLoop>,
    last_error: Option<DeviceError>,
    last_summary: Option<LoopSummary>,
}

impl<O: SourceOpener> CaptureController<O> {
    /// Build a controller and the receiving end of its reporter channel.
    ///
    /// The channel closes when the controller is dropped.
    pub fn new<P>(opener: O, permission: P, settings: CaptureSettings) -> (Self, ReportReceiver)
    where
        P: PermissionOracle + 'static,
    {
        let (reporter, receiver) = report_channel(settings.channel_capacity.max(1));
        let controller = Self {
            opener: Arc::new(opener),
            permission: Box::new(permission),
            listener: None,
            settings,
            reporter,
            active: None,
            last_error: None,
            last_summary: None,
        };
        (controller, receiver)
    }

    pub fn with_listener(mut self, listener: Arc<dyn CaptureListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// `Capturing` while a capture thread is alive.
    pub fn state(&self) -> CaptureState {
        match &self.active {
            Some(active) if !active.handle.is_finished() => CaptureState::Capturing,
            _ => CaptureState::Idle,
        }
    }

    /// Collect a loop that ended on its own, then report the state.
    pub fn poll(&mut self) -> CaptureState {
        self.reap();
        self.state()
    }

    /// The device error that ended the most recent session, if any.
    pub fn take_last_error(&mut self) -> Option<DeviceError> {
        self.reap();
        self.last_error.take()
    }

    /// Counters from the most recent session that ended cleanly.
    pub fn last_summary(&self) -> Option<LoopSummary> {
        self.last_summary
    }

    /// Begin capturing.
    ///
    /// Returns once the source is open and the loop is running.  A device
    /// error from an earlier session stays available to
    /// [`take_last_error`](Self::take_last_error) until it is taken or a later
    /// session fails.
    pub fn start(&mut self) -> Result<(), StartError> {
        self.reap();
        if self.active.is_some() {
            return Err(StartError::AlreadyCapturing);
        }
        if !self.permission.is_capture_permitted() {
            log::warn!("capture: microphone permission not granted");
            return Err(StartError::PermissionDenied);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(AudioFormat, usize), OpenError>>(1);

        let opener = Arc::clone(&self.opener);
        let reporter = self.reporter.clone();
        let listener = self.listener.clone();
        let settings = self.settings;
        let loop_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("capture-loop".into())
            .spawn(move || -> LoopOutcome {
                let source = match opener.open(&settings.format) {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.clone()));
                        return Err(e.into());
                    }
                };

                let opened = source.format();
                let mut capture = CaptureLoop::new(
                    source,
                    settings.meter,
                    reporter,
                    loop_stop,
                    settings.block_multiplier,
                );
                if let Some(listener) = &listener {
                    listener.on_state_changed(CaptureState::Capturing);
                }
                let _ = ready_tx.send(Ok((opened, capture.block_len())));

                let outcome = capture.run().map_err(DeviceError::from);
                drop(capture);

                if let Some(listener) = &listener {
                    if let Err(e) = &outcome {
                        listener.on_error(e);
                    }
                    listener.on_state_changed(CaptureState::Idle);
                }
                outcome
            })
            .map_err(|e| StartError::Spawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok((opened, block_len))) => {
                log::info!(
                    "capture: started ({} Hz, {} ch, {block_len}-sample blocks)",
                    opened.sample_rate_hz,
                    opened.channel_count
                );
                self.active = Some(ActiveLoop { stop, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                log::error!("capture: failed to open source: {e}");
                match e {
                    OpenError::PermissionDenied => Err(StartError::PermissionDenied),
                    other => Err(StartError::DeviceOpenFailed(other)),
                }
            }
            Err(_) => {
                // The thread died before reporting; it can only have panicked.
                let _ = handle.join();
                Err(StartError::Spawn("capture thread exited while opening the source".into()))
            }
        }
    }

    /// Stop capturing and wait for the loop to exit.
    ///
    /// A device error raised by the final iteration is kept for
    /// [`take_last_error`](Self::take_last_error), not returned here.
    pub fn stop(&mut self) -> Result<(), StopError> {
        let Some(active) = self.active.take() else {
            return Err(StopError::NotCapturing);
        };
        if active.handle.is_finished() {
            self.settle(active.handle)?;
            return Err(StopError::NotCapturing);
        }

        active.stop.store(true, Ordering::SeqCst);
        self.settle(active.handle)
    }

    fn reap(&mut self) {
        let finished = self
            .active
            .as_ref()
            .is_some_and(|active| active.handle.is_finished());
        if finished {
            if let Some(active) = self.active.take() {
                // A panic is already logged by settle.
                let _ = self.settle(active.handle);
            }
        }
    }

    fn settle(&mut self, handle: JoinHandle<LoopOutcome>) -> Result<(), StopError> {
        match handle.join() {
            Ok(Ok(summary)) => {
                log::debug!("capture: session summary {summary:?}");
                self.last_summary = Some(summary);
                Ok(())
            }
            Ok(Err(e)) => {
                log::warn!("capture: session ended by device error: {e}");
                self.last_error = Some(e);
                Ok(())
            }
            Err(_) => {
                log::error!("capture: capture thread panicked");
                Err(StopError::LoopPanicked)
            }
        }
    }
}

impl<O: SourceOpener> Drop for CaptureController<O> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.stop.store(true, Ordering::SeqCst);
            let _ = active.handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
