//! Output Sinks
//!
//! Each sink owns one destination and knows its transport:
//!
//! - [`display`]: LED panel over UDP, fire and forget
//! - [`pixel`]: pixelflut canvas over TCP, retried forever
//! - [`terminal`]: ANSI text to a local terminal or a viewer connection
//!
//! Encoding happens earlier, in [`crate::cache`]; sinks only move bytes.

pub mod display;
pub mod pixel;
pub mod terminal;

use thiserror::Error;

pub use display::DisplaySink;
pub use pixel::{PixelClient, PixelError, PixelRef, PixelSink, PixelflutClient};
pub use terminal::{write_frame, TerminalSink};

/// Errors surfaced from sink delivery
///
/// Display and pixel failures are absorbed by their sinks; only the
/// terminal reports back.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing to the terminal failed
    #[error("Terminal write failed: {0}")]
    Terminal(#[from] std::io::Error),
}
