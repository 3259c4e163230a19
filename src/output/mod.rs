//! Output backends for displaying processed video.

pub mod window_output;

pub use window_output::{WindowConfig, WindowOutput};

use crate::frame::VideoFrame;
use anyhow::Result;
use std::time::Duration;

/// Input observed on the display between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    /// A printable key was pressed
    Key(char),
    /// The user asked to close the window
    CloseRequested,
}

/// Trait for video output backends.
///
/// Implementations close their window when dropped.
pub trait OutputBackend {
    /// Write a frame to the output.
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()>;

    /// Waits up to `timeout` for input and returns every event queued since
    /// the last call, oldest first.
    fn poll_events(&mut self, timeout: Duration) -> Result<Vec<DisplayEvent>>;
}
