//! Per-frame image transforms.
//!
//! All image processing is delegated to `image` and `imageproc`; this module
//! only chains their calls into the two fixed pipelines the viewer offers.

use crate::frame::{PixelFormat, VideoFrame};
use anyhow::Result;
use clap::ValueEnum;
use image::{GrayImage, Rgb};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Canny low threshold used by the contour pipeline.
pub const DEFAULT_CANNY_LOW: f32 = 10.0;
/// Canny high threshold used by the contour pipeline.
pub const DEFAULT_CANNY_HIGH: f32 = 30.0;
/// Blue, in RGB channel order.
pub const DEFAULT_FILL_COLOR: [u8; 3] = [0, 0, 255];

/// One boundary, as an ordered list of pixel coordinates.
pub type Contour = Vec<Point<i32>>;

/// Which processing pipeline to run on each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Edge detection with external contours filled on the color frame
    #[default]
    Contours,
    /// Grayscale only
    Grayscale,
}

impl Variant {
    /// Title of the window the variant displays into.
    pub fn window_title(&self) -> &'static str {
        match self {
            Variant::Contours => "output",
            Variant::Grayscale => "webcam",
        }
    }
}

/// A transform applied to every captured frame before display.
pub trait FrameProcessor {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Produces the image to display for `frame`.
    fn process(&mut self, frame: &VideoFrame) -> Result<VideoFrame>;
}

impl<P: FrameProcessor + ?Sized> FrameProcessor for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn process(&mut self, frame: &VideoFrame) -> Result<VideoFrame> {
        (**self).process(frame)
    }
}

/// Parameters of the contour-fill pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContourParams {
    pub canny_low: f32,
    pub canny_high: f32,
    pub fill_color: Rgb<u8>,
}

impl Default for ContourParams {
    fn default() -> Self {
        Self {
            canny_low: DEFAULT_CANNY_LOW,
            canny_high: DEFAULT_CANNY_HIGH,
            fill_color: Rgb(DEFAULT_FILL_COLOR),
        }
    }
}

/// Converts a frame to single channel intensity. Gray frames pass through unchanged.
pub fn to_grayscale(frame: &VideoFrame) -> Result<VideoFrame> {
    if frame.format == PixelFormat::Gray {
        return Ok(frame.clone());
    }
    let gray = frame.to_gray_image()?;
    Ok(VideoFrame::from_gray_image(gray).with_timestamp(frame.timestamp_us))
}

/// Binary edge map (0 or 255) of a gray image.
pub fn detect_edges(gray: &GrayImage, low: f32, high: f32) -> GrayImage {
    imageproc::edges::canny(gray, low, high)
}

/// Outer boundaries of the connected regions of `edges`, skipping anything nested.
pub fn find_external_contours(edges: &GrayImage) -> Vec<Contour> {
    find_contours::<i32>(edges)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| c.points)
        .collect()
}

/// Draws each contour as a solid region onto an RGB copy of `frame`.
pub fn fill_contours(frame: &VideoFrame, contours: &[Contour], color: Rgb<u8>) -> Result<VideoFrame> {
    let mut canvas = frame.to_rgb_image()?;

    for contour in contours {
        let mut poly = contour.clone();
        poly.dedup();
        while poly.len() > 1 && poly.first() == poly.last() {
            poly.pop();
        }

        match poly.len() {
            0 => {}
            1 => {
                let p = poly[0];
                if p.x >= 0 && p.y >= 0 && (p.x as u32) < canvas.width() && (p.y as u32) < canvas.height() {
                    canvas.put_pixel(p.x as u32, p.y as u32, color);
                }
            }
            2 => draw_segment(&mut canvas, poly[0], poly[1], color),
            _ => {
                draw_polygon_mut(&mut canvas, &poly, color);
                // The boundary pixels belong to the region too.
                for (i, &start) in poly.iter().enumerate() {
                    draw_segment(&mut canvas, start, poly[(i + 1) % poly.len()], color);
                }
            }
        }
    }

    Ok(VideoFrame::from_rgb_image(canvas).with_timestamp(frame.timestamp_us))
}

fn draw_segment(canvas: &mut image::RgbImage, start: Point<i32>, end: Point<i32>, color: Rgb<u8>) {
    draw_line_segment_mut(
        canvas,
        (start.x as f32, start.y as f32),
        (end.x as f32, end.y as f32),
        color,
    );
}

/// Displays the grayscale frame.
#[derive(Debug, Default)]
pub struct Grayscale;

impl FrameProcessor for Grayscale {
    fn name(&self) -> &'static str {
        "grayscale"
    }

    fn process(&mut self, frame: &VideoFrame) -> Result<VideoFrame> {
        to_grayscale(frame)
    }
}

/// Fills the external contours of the frame's edges on top of the color frame.
#[derive(Debug, Default)]
pub struct ContourFill {
    params: ContourParams,
}

impl ContourFill {
    pub fn new(params: ContourParams) -> Self {
        Self { params }
    }
}

impl FrameProcessor for ContourFill {
    fn name(&self) -> &'static str {
        "contours"
    }

    fn process(&mut self, frame: &VideoFrame) -> Result<VideoFrame> {
        let gray = to_grayscale(frame)?.to_gray_image()?;
        let edges = detect_edges(&gray, self.params.canny_low, self.params.canny_high);
        let contours = find_external_contours(&edges);
        trace!("Found {} external contours", contours.len());
        fill_contours(frame, &contours, self.params.fill_color)
    }
}

/// Builds the processor for a variant.
pub fn build_processor(variant: Variant, params: ContourParams) -> Box<dyn FrameProcessor> {
    match variant {
        Variant::Contours => Box::new(ContourFill::new(params)),
        Variant::Grayscale => Box::new(Grayscale),
    }
}
