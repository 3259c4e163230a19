//! Webcam capture backends.

mod nokhwa_backend;

pub use nokhwa_backend::NokhwaCapture;

use crate::frame::VideoFrame;
use thiserror::Error;

/// Errors raised by capture backends.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device could not be opened. Not recoverable.
    #[error("camera {index} unavailable: {reason}")]
    DeviceUnavailable { index: u32, reason: String },
    /// A single frame could not be read from an open device.
    #[error("failed to read frame: {0}")]
    ReadFailed(String),
    /// A frame was read but could not be decoded to RGB.
    #[error("failed to decode frame: {0}")]
    Decode(String),
    /// Device enumeration failed.
    #[error("failed to query cameras: {0}")]
    Query(String),
}

impl CaptureError {
    /// Whether the loop may skip this frame and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::ReadFailed(_) | CaptureError::Decode(_))
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Trait for webcam capture backends.
///
/// Implementations own the device exclusively and release it when dropped.
pub trait CaptureBackend {
    /// Returns a list of available camera devices.
    fn list_devices() -> CaptureResult<Vec<CameraInfo>>
    where
        Self: Sized;

    /// Opens the camera with the specified configuration.
    fn open(config: CaptureConfig) -> CaptureResult<Self>
    where
        Self: Sized;

    /// Captures a single frame from the camera.
    fn capture_frame(&mut self) -> CaptureResult<VideoFrame>;

    /// Returns the current frame dimensions.
    fn frame_size(&self) -> (u32, u32);
}

/// Information about a camera device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Device index
    pub index: u32,
    /// Human-readable name
    pub name: String,
}

/// Configuration for camera capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Camera device index
    pub device_index: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { device_index: 0 }
    }
}
