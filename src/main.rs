//! Application entry point for the terminal sound meter.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create the [`tokio`] runtime that hosts the display task.
//! 4. Build the [`CaptureController`] and spawn [`run_display`] on its
//!    receiver.
//! 5. Start capturing and wait for Ctrl-C or the end of the session.
//! 6. Stop, close the channel and let the display drain.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Notify;

use sound_meter::config::AppConfig;
use sound_meter::pipeline::{
    AlwaysPermitted, CaptureController, CaptureListener, CaptureState, DeviceError, StopError,
};
use sound_meter::report::{run_display, TerminalDisplay};

/// Wakes `main` when the capture thread goes idle on its own.
#[derive(Default)]
struct SessionWatch {
    idle: Notify,
}

impl CaptureListener for SessionWatch {
    fn on_state_changed(&self, state: CaptureState) {
        log::debug!("capture state: {}", state.label());
        if !state.is_capturing() {
            self.idle.notify_one();
        }
    }

    fn on_error(&self, error: &DeviceError) {
        log::error!("capture failed: {error}");
    }
}

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("sound meter starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 4. Controller + display
    let watch = Arc::new(SessionWatch::default());
    let (controller, receiver) =
        CaptureController::new(config.opener(), AlwaysPermitted, config.capture_settings());
    let mut controller = controller.with_listener(watch.clone());

    let display = TerminalDisplay::new(std::io::stdout(), config.display.decimals);
    let display_task = rt.spawn(run_display(receiver, display));

    // 5. Capture until Ctrl-C or device failure
    controller.start().context("failed to start capture")?;

    rt.block_on(async {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    log::warn!("Ctrl-C handler failed ({e}); stopping");
                }
            }
            _ = watch.idle.notified() => {}
        }
    });

    // 6. Shutdown
    match controller.stop() {
        Ok(()) | Err(StopError::NotCapturing) => {}
        Err(e) => return Err(e.into()),
    }
    let failure = controller.take_last_error();
    drop(controller);

    let reported = rt.block_on(display_task).context("display task failed")?;
    println!();
    log::info!("sound meter stopped after {reported} readings");

    match failure {
        Some(e) => Err(anyhow::Error::new(e).context("capture ended unexpectedly")),
        None => Ok(()),
    }
}
