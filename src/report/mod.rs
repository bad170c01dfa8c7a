//! Reporting loudness to the display.
//!
//! The capture thread pushes into a [`ReportSender`]; the display side runs
//! [`run_display`] over the matching [`ReportReceiver`].

pub mod channel;
pub mod display;

pub use channel::{report_channel, ReportReceiver, ReportSender, SendError};
pub use display::{run_display, DisplayConsumer, TerminalDisplay};
