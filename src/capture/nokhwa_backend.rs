//! Nokhwa-based webcam capture backend.

use super::{CameraInfo, CaptureBackend, CaptureConfig, CaptureError, CaptureResult};
use crate::frame::{PixelFormat, VideoFrame};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Webcam capture using the nokhwa library.
pub struct NokhwaCapture {
    camera: Camera,
    index: u32,
    width: u32,
    height: u32,
}

/// Formats tried when the driver rejects the camera's own preferred format.
fn fallback_formats() -> Vec<CameraFormat> {
    vec![
        CameraFormat::new(Resolution::new(1280, 720), FrameFormat::MJPEG, 30),
        CameraFormat::new(Resolution::new(1280, 720), FrameFormat::YUYV, 30),
        CameraFormat::new(Resolution::new(640, 480), FrameFormat::MJPEG, 30),
        CameraFormat::new(Resolution::new(640, 480), FrameFormat::YUYV, 30),
        CameraFormat::new(Resolution::new(640, 480), FrameFormat::NV12, 30),
    ]
}

/// Creates the camera and checks that the stream really opens.
/// Just creating the object isn't enough for some drivers.
fn try_open(index: u32, request: RequestedFormatType) -> Result<Camera, nokhwa::NokhwaError> {
    let requested = RequestedFormat::new::<RgbFormat>(request);
    let mut camera = Camera::new(CameraIndex::Index(index), requested)?;
    camera.open_stream()?;
    Ok(camera)
}

impl CaptureBackend for NokhwaCapture {
    fn list_devices() -> CaptureResult<Vec<CameraInfo>> {
        let devices =
            nokhwa::query(ApiBackend::Auto).map_err(|e| CaptureError::Query(e.to_string()))?;
        Ok(devices
            .into_iter()
            .map(|d| CameraInfo {
                index: d.index().as_index().unwrap_or(0),
                name: d.human_name().to_string(),
            })
            .collect())
    }

    fn open(config: CaptureConfig) -> CaptureResult<Self> {
        let index = config.device_index;

        // The device's own default format first, no resolution or rate is imposed.
        let camera = match try_open(index, RequestedFormatType::None) {
            Ok(camera) => camera,
            Err(first_err) => {
                warn!("Camera {} rejected its default format ({}), trying fallbacks", index, first_err);
                let mut opened = None;
                for seed in fallback_formats() {
                    match try_open(index, RequestedFormatType::Closest(seed)) {
                        Ok(camera) => {
                            info!("Verified connection with seed format: {:?}", seed);
                            opened = Some(camera);
                            break;
                        }
                        Err(e) => debug!("Seed format {:?} failed: {}", seed, e),
                    }
                }
                opened.ok_or_else(|| CaptureError::DeviceUnavailable {
                    index,
                    reason: first_err.to_string(),
                })?
            }
        };

        let resolution = camera.resolution();
        info!("Camera {} opened with resolution: {}", index, resolution);

        Ok(Self {
            camera,
            index,
            width: resolution.width(),
            height: resolution.height(),
        })
    }

    fn capture_frame(&mut self) -> CaptureResult<VideoFrame> {
        let frame = self
            .camera
            .frame()
            .map_err(|e| CaptureError::ReadFailed(e.to_string()))?;
        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::Decode(e.to_string()))?;
        let (width, height) = decoded.dimensions();
        if (width, height) != (self.width, self.height) {
            debug!("Camera resolution changed to {}x{}", width, height);
            self.width = width;
            self.height = height;
        }

        let timestamp_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_micros() as u64);

        Ok(VideoFrame::from_data(width, height, PixelFormat::Rgb, decoded.into_raw())
            .with_timestamp(timestamp_us))
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for NokhwaCapture {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!("Failed to stop camera {} stream: {}", self.index, e);
        }
        info!("Camera {} released", self.index);
    }
}
