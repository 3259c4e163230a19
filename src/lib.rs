//! Edgecam: webcam viewer with a fixed processing pipeline
//!
//! Captures video from a webcam, converts each frame to grayscale (and
//! optionally fills the outer contours of its edges), and displays the result
//! until the quit key is pressed.

pub mod capture;
pub mod config;
pub mod frame;
pub mod output;
pub mod pipeline;
pub mod runner;
pub mod utils;
